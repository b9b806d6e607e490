use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use skywire_common::constants::headers::RATELIMIT_RESET;

use crate::client::http::RawResponse;
use crate::errors::{Error, RequestError, Result};

/// XRPC error body: `{"error": "...", "message": "..."}`, both optional.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct XrpcErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

impl XrpcErrorBody {
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Convert non-2xx responses into a structured error that includes the server body.
///
/// If the status is successful (2xx), the original response is returned.
/// Otherwise the body is decoded as an XRPC error when it has that shape, and
/// the error is synthesized from the status code alone when it does not.
pub(crate) fn check_http_status(response: RawResponse) -> Result<RawResponse> {
    if response.status.is_success() {
        return Ok(response);
    }

    let status = response.status;
    let body = XrpcErrorBody::parse(&response.body);
    let mut message = body.message.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string()
    });
    if status.as_u16() == 429 {
        if let Some(reset) = response.header(RATELIMIT_RESET) {
            message = format!("{message} (rate limit resets at {reset})");
        }
    }

    Err(Error::from(RequestError::Server {
        status,
        error: body.error,
        message,
    }))
}

/// Seconds since the unix epoch.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
