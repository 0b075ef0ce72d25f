//! Request types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResolveRequest {
    #[schemars(
        description = "Identifier to resolve: a bare name, 'context:name', 'context:marker:name' or a full 'site:context:marker:name' PID"
    )]
    pub identity: String,
    #[schemars(
        description = "Context prefix to start bare-name resolution from. Defaults to the current context"
    )]
    pub base: Option<String>,
    #[schemars(description = "Which kinds to accept: 'concept', 'instance' or 'both' (default)")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEntryRequest {
    #[schemars(description = "Identifier of a concept or instance, in any accepted form")]
    pub identity: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindInstancesRequest {
    #[schemars(
        description = "Query tree, e.g. {\"and\": [{\"isa\": \"Sensor\"}, {\"equals\": {\"field\": \"unit\", \"value\": \"celsius\"}}]}. Operators: and, isa, isa_exactly, equals"
    )]
    pub query: serde_json::Value,
    #[schemars(description = "Return only PIDs instead of full instances")]
    #[serde(default)]
    pub pid_only: bool,
    #[schemars(description = "Keep only these fields of each instance, e.g. [\"pid\", \"name\"]")]
    pub only_these: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextStatusRequest {
    #[schemars(description = "Context prefix to describe. Defaults to the current context")]
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EnterContextRequest {
    #[schemars(description = "Prefix of the context to enter")]
    pub prefix: String,
    #[schemars(description = "Access mode: 'read' (or 'R') or 'write' (or 'W')")]
    pub mode: String,
}
