//! ACP wire types.
//!
//! Outbound messages are serialised from the typed request structs below.
//! Inbound messages are first decoded into a generic JSON object for
//! dispatch and only then re-decoded into [`SessionUpdateRequest`] or
//! [`SessionRequestPermissionRequest`] by the router.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC version tag carried by every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Fixed id of the `session/new` handshake request.
pub const SESSION_NEW_ID: i64 = 0;

/// Fixed id of every `session/prompt` request.
pub const SESSION_PROMPT_ID: i64 = 1;

/// Handshake method.
pub const METHOD_SESSION_NEW: &str = "session/new";
/// User prompt method.
pub const METHOD_SESSION_PROMPT: &str = "session/prompt";
/// Inbound progress notification method.
pub const METHOD_SESSION_UPDATE: &str = "session/update";
/// Inbound tool-permission request method.
pub const METHOD_REQUEST_PERMISSION: &str = "session/request_permission";

/// Permission option: allow this tool for the rest of the session.
pub const OPTION_ID_ALLOW_ALWAYS: &str = "allow_always";
/// Permission option: allow this single call.
pub const OPTION_ID_ALLOW_ONCE: &str = "allow";
/// Permission option: reject this single call.
pub const OPTION_ID_REJECT_ONCE: &str = "reject";

/// JSON-RPC request id; the peer may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    Str(String),
}

impl Default for RequestId {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRequest<P> {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Request id.
    pub id: RequestId,
    /// Method name.
    pub method: &'static str,
    /// Method-specific parameters.
    pub params: P,
}

/// `session/new` request.
pub type SessionNewRequest = OutboundRequest<SessionNewParams>;

/// `session/prompt` request.
pub type SessionPromptRequest = OutboundRequest<SessionPromptParams>;

/// Parameters of `session/new`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNewParams {
    /// Working directory the agent should operate in.
    pub cwd: String,
    /// MCP servers offered to the agent; always empty.
    pub mcp_servers: Vec<McpServer>,
}

/// An MCP server definition offered to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct McpServer {
    /// Display name.
    pub name: String,
    /// Executable the agent launches.
    pub command: String,
    /// Arguments for `command`.
    pub args: Vec<String>,
    /// `KEY=value` environment entries.
    pub env: Vec<String>,
}

/// Parameters of `session/prompt`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPromptParams {
    /// Session obtained from the handshake.
    pub session_id: String,
    /// Prompt segments; the client always sends exactly one text segment.
    pub prompt: Vec<PromptSegment>,
}

/// One segment of a user prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptSegment {
    /// Segment type; only `"text"` is sent.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Prompt text.
    pub text: String,
}

impl PromptSegment {
    /// A plain text segment.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

impl SessionNewRequest {
    /// Build the handshake request for `cwd`.
    #[must_use]
    pub fn session_new(cwd: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: RequestId::Number(SESSION_NEW_ID),
            method: METHOD_SESSION_NEW,
            params: SessionNewParams {
                cwd,
                mcp_servers: Vec::new(),
            },
        }
    }
}

impl SessionPromptRequest {
    /// Build a single-segment text prompt for `session_id`.
    #[must_use]
    pub fn session_prompt(session_id: String, text: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: RequestId::Number(SESSION_PROMPT_ID),
            method: METHOD_SESSION_PROMPT,
            params: SessionPromptParams {
                session_id,
                prompt: vec![PromptSegment::text(text)],
            },
        }
    }
}

/// Reply to an inbound `session/request_permission`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolPermissionResponse {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Echo of the permission request's id.
    pub id: RequestId,
    /// The decision.
    pub result: ToolPermissionResult,
}

/// Result body of a [`ToolPermissionResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolPermissionResult {
    /// Selected outcome.
    pub outcome: ToolPermissionOutcome,
}

/// The chosen permission option.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPermissionOutcome {
    /// Always `"selected"`.
    pub outcome: &'static str,
    /// Id of the chosen [`PermissionOption`].
    pub option_id: String,
}

impl ToolPermissionResponse {
    /// Select `option_id` for the request identified by `id`.
    #[must_use]
    pub fn selected(id: RequestId, option_id: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: ToolPermissionResult {
                outcome: ToolPermissionOutcome {
                    outcome: "selected",
                    option_id: option_id.into(),
                },
            },
        }
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────
//
// Agents send `null` for empty maps and lists as often as they omit the key,
// so every non-`Option` field accepts both.

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Inbound `session/update` notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdateRequest {
    /// Protocol version tag as sent by the agent.
    #[serde(default, deserialize_with = "null_as_default")]
    pub jsonrpc: String,
    /// Always `session/update` once routed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    /// Notification body.
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: SessionUpdateParams,
}

/// Parameters of a `session/update` notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateParams {
    /// Session the update belongs to.
    #[serde(default, deserialize_with = "null_as_default")]
    pub session_id: String,
    /// The update itself.
    #[serde(default, deserialize_with = "null_as_default")]
    pub update: SessionUpdate,
}

/// The update object, tagged by `sessionUpdate`
/// (`agent_message_chunk`, `user_message`, `plan`, `tool_call`, …).
///
/// Fields specific to a tag are kept in `extra`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    /// Update tag.
    #[serde(default, rename = "sessionUpdate", deserialize_with = "null_as_default")]
    pub kind: String,
    /// Content of message chunks and tool calls; shape depends on `kind`.
    #[serde(default)]
    pub content: Option<Value>,
    /// Slash commands, for `available_commands_update`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub available_commands: Vec<Command>,
    /// Every other field of the update.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionUpdate {
    /// Text of a single content block (`{"type":"text","text":…}`), if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref()?.get("text")?.as_str()
    }
}

/// A slash command advertised by the agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Command {
    /// Command name without the leading slash.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Human-readable summary.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Input hint, if the command takes arguments.
    #[serde(default)]
    pub input: Option<Value>,
}

/// Inbound `session/request_permission` request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRequestPermissionRequest {
    /// Protocol version tag as sent by the agent.
    #[serde(default, deserialize_with = "null_as_default")]
    pub jsonrpc: String,
    /// Id to echo in the decision.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: RequestId,
    /// Always `session/request_permission` once routed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub method: String,
    /// Request body.
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: SessionRequestPermissionParams,
}

/// Parameters of a `session/request_permission` request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestPermissionParams {
    /// Session the request belongs to.
    #[serde(default, deserialize_with = "null_as_default")]
    pub session_id: String,
    /// Tool call awaiting a decision.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_call: ToolCall,
    /// Options in the order the agent offered them.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<PermissionOption>,
}

/// The tool call awaiting permission.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Agent-assigned tool call id.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_call_id: String,
    /// Short description, when the agent provides one.
    #[serde(default)]
    pub title: Option<String>,
    /// Arguments the tool would run with.
    #[serde(default, deserialize_with = "null_as_default")]
    pub raw_input: Map<String, Value>,
}

/// A named permission option.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Id sent back in the decision.
    #[serde(default, deserialize_with = "null_as_default")]
    pub option_id: String,
    /// Label shown to the operator.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// `allow_once`, `allow_always`, `reject_once`, …
    #[serde(default, deserialize_with = "null_as_default")]
    pub kind: String,
}

/// A correlated response to the last prompt (no `method`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    /// Id of the answered request, if echoed.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Success body.
    #[serde(default)]
    pub result: Option<ResponseResult>,
    /// Failure body.
    #[serde(default)]
    pub error: Option<ResponseError>,
}

/// Successful prompt result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseResult {
    /// Why the agent ended its turn (`end_turn`, `cancelled`, …).
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseError {
    /// JSON-RPC error code.
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: i64,
    /// Error description.
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}
