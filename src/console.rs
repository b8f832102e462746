//! Plain-text console handler.
//!
//! Prints agent message chunks as they stream in, summarises other session
//! updates in one line, and asks the operator to pick a permission option
//! by number.  Input is shared with the interaction driver through
//! [`SharedInput`]; the driver never reads while a prompt is in flight, so
//! the two never compete for a line.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::acp::connection::Connection;
use crate::acp::router::{Handler, HandlerFuture};
use crate::acp::types::{
    PermissionOption, SessionRequestPermissionRequest, SessionUpdateRequest,
    OPTION_ID_REJECT_ONCE,
};
use crate::{AppError, Result};

/// Line-oriented operator input shared by the driver and the handler.
pub type SharedInput = Arc<Mutex<Box<dyn AsyncBufRead + Send + Unpin>>>;

/// Wrap `reader` for sharing.
pub fn shared_input<R>(reader: R) -> SharedInput
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(reader)))
}

/// Read one line, without its terminator.  `Ok(None)` at end of input.
///
/// # Errors
///
/// Returns [`AppError::Io`] if the underlying read fails.
pub async fn read_line(input: &SharedInput) -> Result<Option<String>> {
    let mut line = String::new();
    let n = input
        .lock()
        .await
        .read_line(&mut line)
        .await
        .map_err(|e| AppError::Io(format!("failed to read input: {e}")))?;

    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

/// [`Handler`] that renders to stdout and reads decisions from [`SharedInput`].
pub struct ConsoleHandler {
    input: SharedInput,
}

impl ConsoleHandler {
    /// Handler reading permission answers from `input`.
    #[must_use]
    pub fn new(input: SharedInput) -> Self {
        Self { input }
    }

    async fn ask_permission(
        &self,
        conn: &Connection,
        req: SessionRequestPermissionRequest,
    ) -> Result<()> {
        let params = &req.params;
        let title = params
            .tool_call
            .title
            .as_deref()
            .unwrap_or(params.tool_call.tool_call_id.as_str());

        {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "\n[permission] {title}");
            if !params.tool_call.raw_input.is_empty() {
                let input = serde_json::Value::Object(params.tool_call.raw_input.clone());
                let _ = writeln!(out, "  {input}");
            }
            for (index, option) in params.options.iter().enumerate() {
                let _ = writeln!(out, "  {}) {} [{}]", index + 1, option.name, option.option_id);
            }
            let _ = write!(out, "choice> ");
            let _ = out.flush();
        }

        let answer = read_line(&self.input).await?;
        let option_id = choose_option(&params.options, answer.as_deref());
        conn.send_tool_response(req.id, &option_id).await
    }
}

impl Handler for ConsoleHandler {
    fn handle_permission_request<'a>(
        &'a self,
        conn: &'a Connection,
        _raw: &'a [u8],
        req: SessionRequestPermissionRequest,
    ) -> HandlerFuture<'a> {
        Box::pin(self.ask_permission(conn, req))
    }

    fn handle_notification<'a>(
        &'a self,
        _raw: &'a [u8],
        req: SessionUpdateRequest,
    ) -> HandlerFuture<'a> {
        render_update(&req);
        Box::pin(std::future::ready(Ok(())))
    }
}

fn render_update(req: &SessionUpdateRequest) {
    let update = &req.params.update;
    let mut out = std::io::stdout().lock();
    match update.kind.as_str() {
        "agent_message_chunk" => {
            if let Some(text) = update.text() {
                let _ = write!(out, "{text}");
            }
        }
        "tool_call" => {
            let title = update
                .extra
                .get("title")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("tool call");
            let _ = writeln!(out, "\n[tool] {title}");
        }
        "plan" => {
            let _ = writeln!(out, "\n[plan updated]");
        }
        other => {
            debug!(kind = other, "console: session update");
        }
    }
    let _ = out.flush();
}

/// Map the operator's answer to an option id.
///
/// A 1-based index selects that option.  Anything else (blank, invalid,
/// end of input) selects the first reject option offered, falling back to
/// [`OPTION_ID_REJECT_ONCE`].
#[must_use]
pub fn choose_option(options: &[PermissionOption], answer: Option<&str>) -> String {
    let picked = answer
        .and_then(|a| a.trim().parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| options.get(i));

    if let Some(option) = picked {
        return option.option_id.clone();
    }

    options
        .iter()
        .find(|o| o.option_id == OPTION_ID_REJECT_ONCE || o.kind.starts_with("reject"))
        .map_or_else(|| OPTION_ID_REJECT_ONCE.to_owned(), |o| o.option_id.clone())
}
