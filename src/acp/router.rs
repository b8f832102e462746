//! Inbound message routing.
//!
//! Every decoded inbound message is classified once:
//!
//! | `method`                     | Action                                        |
//! |------------------------------|-----------------------------------------------|
//! | absent, empty, or non-string | [`Completion`] sent to the prompt waiter      |
//! | `session/update`             | [`Handler::handle_notification`]              |
//! | `session/request_permission` | [`Handler::handle_permission_request`]        |
//! | *(any other)*                | Logged at `WARN`; no handler invoked          |
//!
//! A message without a method is the answer to the single outstanding
//! `session/prompt`.  The wire format carries no other correlation, so only
//! one prompt may be in flight at a time.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::acp::connection::Connection;
use crate::acp::types::{
    Response, ResponseError, SessionRequestPermissionRequest, SessionUpdateRequest,
    METHOD_REQUEST_PERMISSION, METHOD_SESSION_UPDATE,
};
use crate::{AppError, Result};

/// Future returned by [`Handler`] methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Capability the router dispatches inbound requests and notifications to.
///
/// Both methods receive the raw re-encoded message alongside its typed form.
/// An error returned by a handler terminates the receive loop.
pub trait Handler: Send + Sync {
    /// Answer a tool permission request.
    ///
    /// `conn` is the live connection the request arrived on; reply through
    /// [`Connection::send_tool_response`].
    fn handle_permission_request<'a>(
        &'a self,
        conn: &'a Connection,
        raw: &'a [u8],
        req: SessionRequestPermissionRequest,
    ) -> HandlerFuture<'a>;

    /// Observe a progress notification.
    fn handle_notification<'a>(
        &'a self,
        raw: &'a [u8],
        req: SessionUpdateRequest,
    ) -> HandlerFuture<'a>;
}

/// Signal that the outstanding prompt has been answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// `result.stopReason` of the response, when present.
    pub stop_reason: Option<String>,
    /// `error` object of the response, when present.
    pub error: Option<ResponseError>,
}

impl Completion {
    /// Extract the completion details from a correlated response.
    ///
    /// Parsing is lenient: an unexpected shape yields an empty completion.
    #[must_use]
    pub fn from_response(message: &Map<String, Value>) -> Self {
        let response: Response =
            serde_json::from_value(Value::Object(message.clone())).unwrap_or_default();
        Self {
            stop_reason: response.result.and_then(|r| r.stop_reason),
            error: response.error,
        }
    }
}

/// Route one decoded inbound message.
///
/// # Errors
///
/// - [`AppError::Acp`] if a known method's payload does not match its
///   structured shape.
/// - Any error returned by the invoked handler.
pub async fn route_message(
    handler: &dyn Handler,
    done: &mpsc::Sender<Completion>,
    conn: &Connection,
    message: Map<String, Value>,
) -> Result<()> {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_owned);

    let Some(method) = method else {
        let completion = Completion::from_response(&message);
        debug!(
            stop_reason = completion.stop_reason.as_deref(),
            "acp router: prompt response received"
        );
        if done.send(completion).await.is_err() {
            debug!("acp router: completion receiver dropped");
        }
        return Ok(());
    };

    let raw = serde_json::to_vec(&message)?;

    match method.as_str() {
        METHOD_SESSION_UPDATE => {
            let req: SessionUpdateRequest = serde_json::from_slice(&raw)
                .map_err(|e| AppError::Acp(format!("malformed {METHOD_SESSION_UPDATE}: {e}")))?;
            handler.handle_notification(&raw, req).await
        }
        METHOD_REQUEST_PERMISSION => {
            let req: SessionRequestPermissionRequest = serde_json::from_slice(&raw)
                .map_err(|e| {
                    AppError::Acp(format!("malformed {METHOD_REQUEST_PERMISSION}: {e}"))
                })?;
            handler.handle_permission_request(conn, &raw, req).await
        }
        other => {
            warn!(
                method = other,
                raw = %String::from_utf8_lossy(&raw),
                "acp router: unrecognised inbound method"
            );
            Ok(())
        }
    }
}
