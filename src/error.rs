//! Request-scoped failures and the status each one surfaces to the client.
//!
//! Nothing in here is fatal to the process: every variant ends one request
//! (or one tunnel) with a definitive response and the proxy keeps serving.

use thiserror::Error;

use crate::http::response::{Response, ResponseBuilder, StatusCode};

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Policy denial. Not a failure of the proxy.
    #[error("host {0} is blacklisted")]
    BlockedHost(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Dial, connect or connect-timeout failure towards the requested host.
    #[error("upstream {authority} unreachable: {reason}")]
    UpstreamUnreachable { authority: String, reason: String },

    /// The origin was reached but the exchange did not produce a usable response.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("transport does not support connection upgrade")]
    TransportHijackUnsupported,
}

impl ProxyError {
    pub fn unreachable(authority: impl Into<String>, reason: impl ToString) -> Self {
        ProxyError::UpstreamUnreachable {
            authority: authority.into(),
            reason: reason.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BlockedHost(_) => StatusCode::Forbidden,
            ProxyError::MalformedRequest(_) => StatusCode::BadRequest,
            ProxyError::UpstreamUnreachable { .. } => StatusCode::ServiceUnavailable,
            ProxyError::UpstreamFetch(_) => StatusCode::BadGateway,
            ProxyError::TransportHijackUnsupported => StatusCode::InternalServerError,
        }
    }

    /// Plain-text error response for this failure.
    pub fn into_response(self) -> Response {
        let status = self.status();
        let body = format!("{} {}\r\n\r\n{}\n", status.as_u16(), status.reason_phrase(), self);

        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .header("Connection", "close")
            .body(body)
            .build()
    }
}
