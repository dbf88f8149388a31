//! Hickory request handler driving the [`ResolutionEngine`].

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::Record;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error, warn};

use crate::engine::{Resolution, ResolutionEngine};
use crate::metrics::{self, Timer};
use crate::record::ZoneQuery;

/// Answers every request through the resolution pipeline.
#[derive(Clone)]
pub struct ZoneHandler {
    engine: Arc<ResolutionEngine>,
}

impl ZoneHandler {
    /// Create a handler for `engine`.
    pub fn new(engine: Arc<ResolutionEngine>) -> Self {
        Self { engine }
    }

    /// The engine queries are resolved with.
    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }
}

#[async_trait]
impl RequestHandler for ZoneHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();

        if request.header().message_type() != MessageType::Query
            || request.header().op_code() != OpCode::Query
        {
            debug!(op_code = ?request.header().op_code(), "unsupported request");
            return send_error_response(request, &mut response_handle, ResponseCode::NotImp).await;
        }

        let request_info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, src = %request.src(), "failed to parse request info");
                return send_error_response(request, &mut response_handle, ResponseCode::FormErr)
                    .await;
            }
        };

        let query = ZoneQuery::new(
            request_info.query.name().clone(),
            request_info.query.query_type(),
        );
        let record_type = query.query_type.to_string();
        debug!(query = %query, src = %request.src(), "query received");

        match self.engine.resolve(&query).await {
            Ok(resolution) => {
                metrics::record_query(&record_type, resolution.stage, timer.elapsed());
                send_resolution(request, &mut response_handle, &resolution).await
            }
            Err(e) => {
                warn!(query = %query, error = %e, "query resolution failed");
                metrics::record_query_error(&record_type, timer.elapsed());
                send_error_response(request, &mut response_handle, ResponseCode::ServFail).await
            }
        }
    }
}

async fn send_resolution<R: ResponseHandler>(
    request: &Request,
    response_handle: &mut R,
    resolution: &Resolution,
) -> ResponseInfo {
    let builder = MessageResponseBuilder::from_message_request(request);
    let mut header = Header::response_from_request(request.header());
    header.set_authoritative(resolution.is_authoritative());
    header.set_recursion_available(resolution.recursion_available);
    header.set_response_code(resolution.response_code);

    debug!(
        stage = resolution.stage.label(),
        answers = resolution.answers.len(),
        "sending response"
    );

    let response = builder.build(
        header,
        resolution.answers.iter(),
        resolution.name_servers.iter(),
        &[] as &[Record],
        resolution.additionals.iter(),
    );

    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to send response");
            ResponseInfo::from(*request.header())
        }
    }
}

async fn send_error_response<R: ResponseHandler>(
    request: &Request,
    response_handle: &mut R,
    code: ResponseCode,
) -> ResponseInfo {
    debug!(code = ?code, "sending error response");
    let builder = MessageResponseBuilder::from_message_request(request);
    let mut header = Header::response_from_request(request.header());
    header.set_response_code(code);
    header.set_recursion_available(true);
    let response = builder.build(header, &[], &[], &[], &[]);

    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to send error response");
            ResponseInfo::from(*request.header())
        }
    }
}
