//! MCP server exposing read access to the knowledge base over stdio.
//!
//! The server owns a local [`Session`] opened for one user at start-up. Tool
//! failures carrying a knowledge-base error code are reported as invalid
//! parameters with the [`ErrorBody`] as data; storage failures are internal
//! errors.

mod types;

use std::sync::{Arc, Mutex};

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;

use crate::db::Database;
use crate::engine::Session;
use crate::error::{ErrorBody, KbError};
use crate::models::*;

#[derive(Clone)]
pub struct McpServer {
    session: Arc<Mutex<Session>>,
    tool_router: ToolRouter<Self>,
}

fn to_mcp(err: KbError) -> McpError {
    match err.code() {
        Some(_) => {
            let body: ErrorBody = err.to_body();
            let data = serde_json::to_value(&body).ok();
            McpError::invalid_params(body.message, data)
        }
        None => {
            tracing::error!("Internal error: {:#}", err);
            McpError::internal_error(err.to_body().message, None)
        }
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

impl McpServer {
    /// Open a session on `db` for `user`.
    pub fn new(db: Database, user: &str) -> Result<Self, KbError> {
        let mut session = Session::new(db)?;
        session.open(SessionOpenInput {
            user: user.to_string(),
            session_id: None,
        })?;
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tool_router: Self::tool_router(),
        })
    }

    fn with_session<T>(
        &self,
        op: impl FnOnce(&mut Session) -> Result<T, KbError>,
    ) -> Result<T, McpError> {
        let mut session = self.session.lock().expect("session lock poisoned");
        op(&mut session).map_err(to_mcp)
    }

    // ============================================================
    // Tool logic, callable directly from tests
    // ============================================================

    pub fn handle_resolve(&self, req: ResolveRequest) -> Result<Resolved, McpError> {
        let kind = match req.kind.as_deref() {
            None | Some("both") => KindFilter::Both,
            Some("concept") => KindFilter::Concept,
            Some("instance") => KindFilter::Instance,
            Some(other) => {
                return Err(McpError::invalid_params(
                    format!("Invalid kind '{other}'. Must be: concept, instance, or both"),
                    None,
                ))
            }
        };
        self.with_session(|s| s.resolve(&req.identity, req.base.as_deref(), kind))
    }

    pub fn handle_get_entry(&self, req: GetEntryRequest) -> Result<Entry, McpError> {
        self.with_session(|s| s.get(&req.identity))
    }

    pub fn handle_find_instances(&self, req: FindInstancesRequest) -> Result<FindOutput, McpError> {
        let query: Query = serde_json::from_value(req.query)
            .map_err(|e| McpError::invalid_params(format!("Invalid query: {e}"), None))?;
        self.with_session(|s| {
            s.find(FindInput {
                query,
                pid_only: req.pid_only,
                only_these: req.only_these,
            })
        })
    }

    pub fn handle_kb_status(&self) -> Result<KbStatus, McpError> {
        self.with_session(|s| s.status())
    }

    pub fn handle_context_status(&self, req: ContextStatusRequest) -> Result<ContextStatus, McpError> {
        self.with_session(|s| s.context_status(req.prefix.as_deref()))
    }

    pub fn handle_enter_context(&self, req: EnterContextRequest) -> Result<ContextStatus, McpError> {
        let mode = AccessMode::from_str(&req.mode).ok_or_else(|| {
            McpError::invalid_params(
                format!("Invalid mode '{}'. Must be: read or write", req.mode),
                None,
            )
        })?;
        self.with_session(|s| {
            s.enter(&req.prefix, mode)?;
            s.context_status(None)
        })
    }
}

#[tool_router]
impl McpServer {
    #[tool(
        description = "Resolve an identifier to its canonical PID. Bare names are searched in the base context (default: current context) and then breadth-first along search paths. Returns {pid, kind}."
    )]
    async fn resolve(&self, params: Parameters<ResolveRequest>) -> Result<CallToolResult, McpError> {
        json_result(&self.handle_resolve(params.0)?)
    }

    #[tool(
        description = "Fetch a concept or instance by identifier. Concepts include their merged required/recommended/optional properties; instances include their class and extras."
    )]
    async fn get_entry(&self, params: Parameters<GetEntryRequest>) -> Result<CallToolResult, McpError> {
        json_result(&self.handle_get_entry(params.0)?)
    }

    #[tool(
        description = "List instances matching a query tree. Use 'isa' to include instances of sub-concepts, 'isa_exactly' for one concept only, and 'equals' to compare pid, name, prefix, state or any extra attribute."
    )]
    async fn find_instances(
        &self,
        params: Parameters<FindInstancesRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.handle_find_instances(params.0)?)
    }

    #[tool(
        description = "Show the session: user, site, current context and every available context prefix."
    )]
    async fn kb_status(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.handle_kb_status()?)
    }

    #[tool(
        description = "Describe a context: title, owner, search path, state, mode, and the concepts and instances it defines."
    )]
    async fn context_status(
        &self,
        params: Parameters<ContextStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.handle_context_status(params.0)?)
    }

    #[tool(
        description = "Make a context current so bare names resolve from it. Frozen contexts can only be entered for reading. Returns the new current context's status."
    )]
    async fn enter_context(
        &self,
        params: Parameters<EnterContextRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.handle_enter_context(params.0)?)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "contextkb".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"contextkb is a knowledge base of concepts (types with inherited properties) and instances, organised in contexts.

IDENTIFIERS:
- 'Sensor': bare name, searched in the current context and then along its search path
- 'lab:Sensor': only inside context 'lab'
- 'lab:3:Sensor': the object with marker 3 in 'lab'
- 'local:lab:3:Sensor': a full PID

WORKFLOW:
1. Call kb_status to see the available contexts
2. Call enter_context (mode 'read') to pick the context names are resolved from
3. Use resolve, get_entry and find_instances to explore"#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(db: Database, user: &str) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(db, user)?;
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
