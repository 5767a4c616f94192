//! The session-scoped MCP context server.
//!
//! One [`McpSession`] per transport session exposes the shared context to
//! a single agent: channel, inbox, resources, team documents, and (when
//! enabled) proposals. The session id embeds the agent identity as
//! `<agent>-<random8>` so it can be recovered from the id alone.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use aw_context::{
    AppendOptions, ContextProvider, CreateProposal, ReadFilter, ResourceType,
};
use aw_domain::error::{Error, Result};

use super::protocol::{
    tool_result, JsonRpcRequest, JsonRpcResponse, McpToolDef, INVALID_PARAMS,
    METHOD_NOT_FOUND, PROTOCOL_VERSION,
};

/// Called with each agent name that should be woken after a channel write.
pub type MentionCallback = Arc<dyn Fn(&str) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mint a session id carrying the agent identity.
pub fn new_session_id(agent: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{agent}-{}", &hex[..8])
}

/// Recover the agent identity from a session id.
pub fn agent_from_session_id(session_id: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(.+)-[0-9a-f]{8}$").unwrap());
    re.captures(session_id).map(|c| c[1].to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpSession {
    pub session_id: String,
    pub agent: String,
    pub context: Arc<ContextProvider>,
    /// Workflow agents ∪ {caller, "user"}.
    pub valid_agents: Vec<String>,
    /// Proposal tools are registered only when a manager is supplied.
    pub with_proposals: bool,
    pub on_mention: MentionCallback,
}

impl McpSession {
    /// Handle one JSON-RPC message. Notifications produce no response.
    pub fn handle(&self, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        if req.is_notification() {
            // notifications/initialized and friends: accepted, no reply.
            return None;
        }
        let id = req.id.clone().unwrap_or(Value::Null);

        let response = match req.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::success(
                id,
                serde_json::json!({ "tools": self.tool_defs() }),
            ),
            "tools/call" => {
                let params = req.params.clone().unwrap_or(Value::Null);
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let args = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                match self.call_tool(&name, &args) {
                    Ok(text) => JsonRpcResponse::success(id, tool_result(text, false)),
                    Err(Error::NotFound(msg)) if msg.starts_with("tool ") => {
                        JsonRpcResponse::failure(id, INVALID_PARAMS, msg)
                    }
                    // Tool-level failures surface as isError results, not
                    // protocol errors — the agent sees them and continues.
                    Err(e) => JsonRpcResponse::success(id, tool_result(e.to_string(), true)),
                }
            }
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("method '{other}' not supported"),
            ),
        };
        Some(response)
    }

    pub fn initialize_result(&self) -> Value {
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "agent-worker",
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    // ── Tool surface ───────────────────────────────────────────────

    fn tool_defs(&self) -> Vec<McpToolDef> {
        let obj = |props: Value, required: &[&str]| {
            serde_json::json!({ "type": "object", "properties": props, "required": required })
        };

        let mut defs = vec![
            McpToolDef {
                name: "channel_send",
                description: "Post a message to the shared channel. Use @name to mention and wake teammates; set `to` for a private message.",
                input_schema: obj(
                    serde_json::json!({
                        "message": { "type": "string" },
                        "to": { "type": "string" },
                    }),
                    &["message"],
                ),
            },
            McpToolDef {
                name: "channel_read",
                description: "Read recent channel messages visible to you.",
                input_schema: obj(
                    serde_json::json!({
                        "since": { "type": "integer" },
                        "limit": { "type": "integer" },
                    }),
                    &[],
                ),
            },
            McpToolDef {
                name: "resource_create",
                description: "Store a shared resource and get back a reference id.",
                input_schema: obj(
                    serde_json::json!({
                        "content": { "type": "string" },
                        "type": { "type": "string", "enum": ["markdown", "json", "text", "diff"] },
                    }),
                    &["content"],
                ),
            },
            McpToolDef {
                name: "resource_read",
                description: "Read a shared resource by id.",
                input_schema: obj(serde_json::json!({ "id": { "type": "string" } }), &["id"]),
            },
            McpToolDef {
                name: "my_inbox",
                description: "List unread messages addressed to you.",
                input_schema: obj(serde_json::json!({}), &[]),
            },
            McpToolDef {
                name: "my_inbox_ack",
                description: "Acknowledge inbox messages up to and including an id.",
                input_schema: obj(serde_json::json!({ "until": { "type": "integer" } }), &["until"]),
            },
            McpToolDef {
                name: "team_members",
                description: "List the agents sharing this context.",
                input_schema: obj(serde_json::json!({}), &[]),
            },
            McpToolDef {
                name: "team_doc_read",
                description: "Read a team document (default team.md).",
                input_schema: obj(serde_json::json!({ "file": { "type": "string" } }), &[]),
            },
            McpToolDef {
                name: "team_doc_write",
                description: "Overwrite a team document.",
                input_schema: obj(
                    serde_json::json!({
                        "content": { "type": "string" },
                        "file": { "type": "string" },
                    }),
                    &["content"],
                ),
            },
            McpToolDef {
                name: "team_doc_append",
                description: "Append to a team document.",
                input_schema: obj(
                    serde_json::json!({
                        "content": { "type": "string" },
                        "file": { "type": "string" },
                    }),
                    &["content"],
                ),
            },
            McpToolDef {
                name: "team_doc_list",
                description: "List team documents.",
                input_schema: obj(serde_json::json!({}), &[]),
            },
            McpToolDef {
                name: "team_doc_create",
                description: "Create a new team document; fails if it exists.",
                input_schema: obj(
                    serde_json::json!({
                        "file": { "type": "string" },
                        "content": { "type": "string" },
                    }),
                    &["file", "content"],
                ),
            },
        ];

        if self.with_proposals {
            defs.extend([
                McpToolDef {
                    name: "team_proposal_create",
                    description: "Open a proposal for the team to vote on.",
                    input_schema: obj(
                        serde_json::json!({
                            "type": { "type": "string", "enum": ["election", "decision", "approval", "assignment"] },
                            "title": { "type": "string" },
                            "description": { "type": "string" },
                            "options": { "type": "array", "items": { "type": "object" } },
                            "resolution": { "type": "object" },
                            "binding": { "type": "boolean" },
                            "expires_in_ms": { "type": "integer" },
                        }),
                        &["type", "title"],
                    ),
                },
                McpToolDef {
                    name: "team_vote",
                    description: "Cast (or change) your vote on a proposal.",
                    input_schema: obj(
                        serde_json::json!({
                            "id": { "type": "string" },
                            "choice": { "type": "string" },
                            "reason": { "type": "string" },
                        }),
                        &["id", "choice"],
                    ),
                },
                McpToolDef {
                    name: "team_proposal_status",
                    description: "Show one proposal by id, or all proposals.",
                    input_schema: obj(serde_json::json!({ "id": { "type": "string" } }), &[]),
                },
                McpToolDef {
                    name: "team_proposal_cancel",
                    description: "Cancel a proposal you created.",
                    input_schema: obj(serde_json::json!({ "id": { "type": "string" } }), &["id"]),
                },
            ]);
        }

        defs
    }

    fn call_tool(&self, name: &str, args: &Value) -> Result<String> {
        match name {
            "channel_send" => self.channel_send(args),
            "channel_read" => self.channel_read(args),
            "resource_create" => self.resource_create(args),
            "resource_read" => {
                let id = require_str(args, "id")?;
                let resource = self.context.read_resource(id)?;
                Ok(serde_json::to_string(&resource)?)
            }
            "my_inbox" => {
                let inbox = self.context.inbox(&self.agent)?;
                Ok(serde_json::to_string(&inbox)?)
            }
            "my_inbox_ack" => {
                let until = args["until"]
                    .as_u64()
                    .ok_or_else(|| Error::Other("'until' must be an integer".into()))?;
                let cursor = self.context.ack_inbox(&self.agent, until)?;
                Ok(serde_json::json!({ "acked_until": cursor }).to_string())
            }
            "team_members" => {
                let members: Vec<Value> = self
                    .valid_agents
                    .iter()
                    .map(|member| {
                        serde_json::json!({ "name": member, "self": *member == self.agent })
                    })
                    .collect();
                Ok(serde_json::to_string(&members)?)
            }
            "team_doc_read" => self.context.read_document(args["file"].as_str()),
            "team_doc_write" => {
                let content = require_str(args, "content")?;
                self.context.write_document(content, args["file"].as_str())?;
                Ok(format!("wrote {} bytes", content.len()))
            }
            "team_doc_append" => {
                let content = require_str(args, "content")?;
                self.context.append_document(content, args["file"].as_str())?;
                Ok(format!("appended {} bytes", content.len()))
            }
            "team_doc_list" => Ok(serde_json::to_string(&self.context.list_documents()?)?),
            "team_doc_create" => {
                let file = require_str(args, "file")?;
                let content = require_str(args, "content")?;
                self.context.create_document(file, content)?;
                Ok(format!("created {file}"))
            }
            "team_proposal_create" if self.with_proposals => {
                let params: CreateProposal = serde_json::from_value(args.clone())
                    .map_err(|e| Error::Other(format!("invalid proposal: {e}")))?;
                let proposal = self.context.proposals().create(&self.agent, params)?;
                Ok(serde_json::to_string(&proposal)?)
            }
            "team_vote" if self.with_proposals => {
                let id = require_str(args, "id")?;
                let choice = require_str(args, "choice")?;
                let reason = args["reason"].as_str().map(String::from);
                let proposal = self
                    .context
                    .proposals()
                    .vote(id, &self.agent, choice, reason)?;
                Ok(serde_json::to_string(&proposal)?)
            }
            "team_proposal_status" if self.with_proposals => match args["id"].as_str() {
                Some(id) => Ok(serde_json::to_string(&self.context.proposals().get(id)?)?),
                None => Ok(serde_json::to_string(&self.context.proposals().list())?),
            },
            "team_proposal_cancel" if self.with_proposals => {
                let id = require_str(args, "id")?;
                let proposal = self.context.proposals().cancel(id, &self.agent)?;
                Ok(serde_json::to_string(&proposal)?)
            }
            other => Err(Error::NotFound(format!("tool '{other}' not found"))),
        }
    }

    fn channel_send(&self, args: &Value) -> Result<String> {
        let message = require_str(args, "message")?;
        let to = args["to"].as_str().map(String::from);

        if let Some(recipient) = &to {
            if !self.valid_agents.iter().any(|a| a == recipient) {
                return Err(Error::NotFound(format!(
                    "unknown recipient '{recipient}'"
                )));
            }
        }

        let entry = self.context.append_channel(
            &self.agent,
            message,
            AppendOptions { to: to.clone(), ..Default::default() },
        )?;

        // Wake every addressed agent: explicit recipient plus mentions.
        let mut wake: Vec<&String> = entry.mentions.iter().collect();
        if let Some(recipient) = &to {
            wake.push(recipient);
        }
        for target in wake {
            if *target != self.agent && self.valid_agents.contains(target) {
                (self.on_mention)(target);
            }
        }

        Ok(serde_json::json!({ "id": entry.id }).to_string())
    }

    fn channel_read(&self, args: &Value) -> Result<String> {
        let filter = ReadFilter {
            since: args["since"].as_u64(),
            limit: args["limit"].as_u64().map(|n| n as usize),
            agent: Some(self.agent.clone()),
        };
        let entries = self.context.read_channel(&filter)?;
        Ok(serde_json::to_string(&entries)?)
    }

    fn resource_create(&self, args: &Value) -> Result<String> {
        let content = require_str(args, "content")?;
        let resource_type = match args["type"].as_str() {
            Some("markdown") => ResourceType::Markdown,
            Some("json") => ResourceType::Json,
            Some("diff") => ResourceType::Diff,
            _ => ResourceType::Text,
        };
        let handle = self
            .context
            .create_resource(content, &self.agent, resource_type)?;
        Ok(serde_json::to_string(&handle)?)
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| Error::Other(format!("'{key}' is required")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn make_session(agent: &str) -> (TempDir, McpSession, Arc<Mutex<Vec<String>>>) {
        let dir = TempDir::new().unwrap();
        let context = Arc::new(ContextProvider::open(dir.path()).unwrap());
        let woken = Arc::new(Mutex::new(Vec::new()));
        let woken_cb = woken.clone();
        let session = McpSession {
            session_id: new_session_id(agent),
            agent: agent.into(),
            context,
            valid_agents: vec!["alice".into(), "bob".into(), "user".into()],
            with_proposals: true,
            on_mention: Arc::new(move |name| woken_cb.lock().push(name.to_string())),
        };
        (dir, session, woken)
    }

    fn call(session: &McpSession, name: &str, args: Value) -> Value {
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(serde_json::json!(1)),
            method: "tools/call".into(),
            params: Some(serde_json::json!({ "name": name, "arguments": args })),
        };
        let resp = session.handle(&req).unwrap();
        assert!(resp.error.is_none(), "unexpected protocol error: {:?}", resp.error);
        resp.result.unwrap()
    }

    fn call_text(session: &McpSession, name: &str, args: Value) -> String {
        let result = call(session, name, args);
        assert_eq!(result["isError"], false, "tool error: {result}");
        result["content"][0]["text"].as_str().unwrap().to_string()
    }

    #[test]
    fn session_id_roundtrips_agent_identity() {
        let id = new_session_id("alice");
        assert_eq!(agent_from_session_id(&id).as_deref(), Some("alice"));
        // Hyphenated agent names survive: the last segment is the nonce.
        let id = new_session_id("data-analyst");
        assert_eq!(agent_from_session_id(&id).as_deref(), Some("data-analyst"));
        assert!(agent_from_session_id("no-nonce-here").is_none());
    }

    #[test]
    fn initialize_reports_protocol_and_tools() {
        let (_dir, session, _) = make_session("alice");
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(serde_json::json!(0)),
            method: "initialize".into(),
            params: None,
        };
        let resp = session.handle(&req).unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn notifications_get_no_response() {
        let (_dir, session, _) = make_session("alice");
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: None,
            method: "notifications/initialized".into(),
            params: None,
        };
        assert!(session.handle(&req).is_none());
    }

    #[test]
    fn tools_list_names_are_exact() {
        let (_dir, session, _) = make_session("alice");
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(serde_json::json!(1)),
            method: "tools/list".into(),
            params: None,
        };
        let resp = session.handle(&req).unwrap();
        let tools = resp.result.unwrap();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        for expected in [
            "channel_send",
            "channel_read",
            "resource_create",
            "resource_read",
            "my_inbox",
            "my_inbox_ack",
            "team_members",
            "team_doc_read",
            "team_doc_write",
            "team_doc_append",
            "team_doc_list",
            "team_doc_create",
            "team_proposal_create",
            "team_vote",
            "team_proposal_status",
            "team_proposal_cancel",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[test]
    fn proposal_tools_absent_without_manager() {
        let (_dir, mut session, _) = make_session("alice");
        session.with_proposals = false;
        let names: Vec<&'static str> = session.tool_defs().iter().map(|d| d.name).collect();
        assert!(!names.contains(&"team_vote"));
        assert!(names.contains(&"channel_send"));
    }

    #[test]
    fn channel_send_wakes_mentions_and_recipient() {
        let (_dir, session, woken) = make_session("alice");
        call_text(
            &session,
            "channel_send",
            serde_json::json!({ "message": "hey @bob, take a look", "to": "bob" }),
        );
        let woken = woken.lock().clone();
        // bob appears for the mention and the DM; self never gets woken.
        assert!(woken.iter().all(|w| w == "bob"));
        assert!(!woken.is_empty());
    }

    #[test]
    fn channel_send_rejects_unknown_recipient() {
        let (_dir, session, _) = make_session("alice");
        let result = call(
            &session,
            "channel_send",
            serde_json::json!({ "message": "hi", "to": "stranger" }),
        );
        assert_eq!(result["isError"], true);
    }

    #[test]
    fn inbox_flow_over_mcp() {
        let (_dir, alice, _) = make_session("alice");
        call_text(
            &alice,
            "channel_send",
            serde_json::json!({ "message": "ping", "to": "bob" }),
        );

        // bob shares alice's context.
        let (_bob_dir, mut bob, _) = make_session("bob");
        bob.context = alice.context.clone();

        let inbox: Vec<Value> =
            serde_json::from_str(&call_text(&bob, "my_inbox", serde_json::json!({}))).unwrap();
        assert_eq!(inbox.len(), 1);
        let id = inbox[0]["id"].as_u64().unwrap();

        call_text(&bob, "my_inbox_ack", serde_json::json!({ "until": id }));
        let inbox: Vec<Value> =
            serde_json::from_str(&call_text(&bob, "my_inbox", serde_json::json!({}))).unwrap();
        assert!(inbox.is_empty());
    }

    #[test]
    fn resource_roundtrip_over_mcp() {
        let (_dir, session, _) = make_session("alice");
        let created: Value = serde_json::from_str(&call_text(
            &session,
            "resource_create",
            serde_json::json!({ "content": "# notes", "type": "markdown" }),
        ))
        .unwrap();
        let id = created["id"].as_str().unwrap();

        let fetched: Value = serde_json::from_str(&call_text(
            &session,
            "resource_read",
            serde_json::json!({ "id": id }),
        ))
        .unwrap();
        assert_eq!(fetched["content"], "# notes");
    }

    #[test]
    fn team_members_flags_caller() {
        let (_dir, session, _) = make_session("alice");
        let members: Vec<Value> =
            serde_json::from_str(&call_text(&session, "team_members", serde_json::json!({})))
                .unwrap();
        let alice = members.iter().find(|m| m["name"] == "alice").unwrap();
        let bob = members.iter().find(|m| m["name"] == "bob").unwrap();
        assert_eq!(alice["self"], true);
        assert_eq!(bob["self"], false);
    }

    #[test]
    fn proposal_flow_over_mcp() {
        let (_dir, session, _) = make_session("alice");
        let proposal: Value = serde_json::from_str(&call_text(
            &session,
            "team_proposal_create",
            serde_json::json!({ "type": "approval", "title": "ship v2" }),
        ))
        .unwrap();
        let id = proposal["id"].as_str().unwrap();

        let voted: Value = serde_json::from_str(&call_text(
            &session,
            "team_vote",
            serde_json::json!({ "id": id, "choice": "approve" }),
        ))
        .unwrap();
        assert_eq!(voted["status"], "resolved");
        assert_eq!(voted["result"]["winner"], "approve");
    }

    #[test]
    fn unknown_tool_is_a_protocol_error() {
        let (_dir, session, _) = make_session("alice");
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(serde_json::json!(1)),
            method: "tools/call".into(),
            params: Some(serde_json::json!({ "name": "bogus", "arguments": {} })),
        };
        let resp = session.handle(&req).unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn unknown_method_is_method_not_found() {
        let (_dir, session, _) = make_session("alice");
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(serde_json::json!(1)),
            method: "resources/list".into(),
            params: None,
        };
        let resp = session.handle(&req).unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }
}
