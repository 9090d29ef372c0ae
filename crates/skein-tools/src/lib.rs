use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use skein_protocol::{SkeinError, ToolDescriptor};
use tracing::{debug, instrument, warn};

mod handoff;

pub use handoff::{HANDOFF_AGENT_ARG, HANDOFF_TOOL_NAME, HandoffTarget, HandoffTool};

/// A tool executed in-process.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn call(&self, arguments: Value) -> Result<Value>;
}

/// A remote server exposing a set of tools (e.g. an MCP endpoint).
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn server_name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}

type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// Adapts an async closure into a [`Tool`].
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    pub fn new<F, Fut>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: Arc<ToolHandler> =
            Arc::new(move |arguments| -> BoxFuture<'static, Result<Value>> {
                Box::pin(handler(arguments))
            });
        Self {
            descriptor,
            handler,
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }
}

#[derive(Clone)]
struct RemoteRoute {
    server: Arc<dyn ToolServer>,
    descriptor: ToolDescriptor,
}

/// Registry of invocable tools.
///
/// Local tools are listed first in registration order, followed by remote
/// tools in server order. A local tool shadows a remote tool of the same name.
#[derive(Default)]
pub struct ToolPool {
    local: IndexMap<String, Arc<dyn Tool>>,
    servers: Vec<Arc<dyn ToolServer>>,
    remote: RwLock<IndexMap<String, RemoteRoute>>,
}

impl ToolPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn with_server(mut self, server: Arc<dyn ToolServer>) -> Self {
        self.servers.push(server);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        if self.local.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "replaced previously registered tool");
        }
    }

    /// Move `tool` to the front of the listing.
    pub fn register_first(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        self.local.shift_insert(0, name, tool);
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.servers.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.remote.read().contains_key(name)
    }

    /// Re-list every remote server and rebuild the routing table.
    #[instrument(skip(self), fields(servers = self.servers.len()))]
    pub async fn refresh_tool_list(&self) -> Result<usize> {
        let mut routes = IndexMap::new();
        for server in &self.servers {
            let tools = server
                .list_tools()
                .await
                .with_context(|| format!("failed listing tools of {}", server.server_name()))?;
            for descriptor in tools {
                if self.local.contains_key(&descriptor.name) {
                    warn!(
                        tool = %descriptor.name,
                        server = server.server_name(),
                        "remote tool shadowed by local tool"
                    );
                    continue;
                }
                routes.insert(
                    descriptor.name.clone(),
                    RemoteRoute {
                        server: server.clone(),
                        descriptor,
                    },
                );
            }
        }
        let count = routes.len();
        *self.remote.write() = routes;
        debug!(remote_tools = count, "tool list refreshed");
        Ok(count)
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> =
            self.local.values().map(|tool| tool.descriptor()).collect();
        tools.extend(
            self.remote
                .read()
                .values()
                .map(|route| route.descriptor.clone()),
        );
        tools
    }

    #[instrument(skip(self, arguments), fields(tool = %name))]
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if let Some(tool) = self.local.get(name).cloned() {
            debug!("executing local tool");
            return tool.call(arguments).await;
        }

        let route = self.remote.read().get(name).cloned();
        match route {
            Some(route) => {
                debug!(server = route.server.server_name(), "executing remote tool");
                route.server.call_tool(name, arguments).await
            }
            None => Err(SkeinError::ToolNotFound(name.to_owned()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_protocol::tool::empty_object_schema;

    fn echo_tool(name: &str) -> FnTool {
        FnTool::new(
            ToolDescriptor::new(name, "echo arguments", empty_object_schema()),
            |arguments| async move { Ok(arguments) },
        )
    }

    struct WeatherServer;

    #[async_trait]
    impl ToolServer for WeatherServer {
        fn server_name(&self) -> &str {
            "weather"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(vec![
                ToolDescriptor::new("forecast", "weather forecast", empty_object_schema()),
                ToolDescriptor::new("echo", "shadowed", empty_object_schema()),
            ])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
            Ok(json!({"tool": name, "city": arguments["city"], "sky": "clear"}))
        }
    }

    #[tokio::test]
    async fn executes_local_tool() -> Result<()> {
        let pool = ToolPool::new().with_tool(echo_tool("echo"));
        let response = pool.execute_tool("echo", json!({"x": 1})).await?;
        assert_eq!(response, json!({"x": 1}));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_not_found() -> Result<()> {
        let pool = ToolPool::new().with_tool(echo_tool("echo"));
        let error = pool
            .execute_tool("missing", json!({}))
            .await
            .expect_err("unknown tool should fail");
        assert!(matches!(
            error.downcast_ref::<SkeinError>(),
            Some(SkeinError::ToolNotFound(name)) if name == "missing"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn remote_tools_route_after_refresh() -> Result<()> {
        let pool = ToolPool::new()
            .with_tool(echo_tool("echo"))
            .with_server(Arc::new(WeatherServer));

        assert!(!pool.contains("forecast"));
        let count = pool.refresh_tool_list().await?;
        assert_eq!(count, 1);

        let names: Vec<String> = pool.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "forecast"]);

        let response = pool.execute_tool("forecast", json!({"city": "Oslo"})).await?;
        assert_eq!(response["sky"], "clear");
        assert_eq!(response["city"], "Oslo");

        let shadowed = pool.execute_tool("echo", json!({"local": true})).await?;
        assert_eq!(shadowed, json!({"local": true}));
        Ok(())
    }

    #[test]
    fn register_first_moves_tool_to_front() {
        let mut pool = ToolPool::new().with_tool(echo_tool("a"));
        pool.register_first(Arc::new(echo_tool("b")));
        let names: Vec<String> = pool.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
