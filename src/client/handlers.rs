use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::types::{FunctionCall, FunctionResponse};

pub trait ToolHandler: Send + Sync + 'static {
    fn call(
        &self,
        args: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send + 'static>>;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
{
    fn call(
        &self,
        args: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send + 'static>> {
        Box::pin(self(args))
    }
}

/// Function-call handlers keyed by tool name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs the handler for `call`. Failures and unknown tools are reported
    /// back to the model as an `error` object instead of aborting the session.
    pub async fn dispatch(&self, call: FunctionCall) -> FunctionResponse {
        let FunctionCall { name, args, id } = call;
        let Some(handler) = self.handlers.get(&name).cloned() else {
            warn!("No handler registered for tool: {}", name);
            return FunctionResponse {
                name,
                id,
                response: json!({"error": "Function not implemented by client."}),
            };
        };

        info!(tool = %name, "Running tool call");
        let response = match handler.call(args).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                json!({"error": e})
            }
        };
        FunctionResponse { name, id, response }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> FunctionCall {
        FunctionCall {
            name: name.into(),
            args: Some(args),
            id: Some("call-1".into()),
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_handler() {
        let mut registry = ToolRegistry::default();
        registry.insert(
            "echo",
            Arc::new(|args: Option<serde_json::Value>| async move {
                Ok::<_, String>(args.unwrap_or_default())
            }),
        );

        let response = registry.dispatch(call("echo", json!({"x": 1}))).await;
        assert_eq!(response.name, "echo");
        assert_eq!(response.id.as_deref(), Some("call-1"));
        assert_eq!(response.response, json!({"x": 1}));
    }

    #[tokio::test]
    async fn dispatch_reports_handler_errors() {
        let mut registry = ToolRegistry::default();
        registry.insert(
            "broken",
            Arc::new(|_args: Option<serde_json::Value>| async move {
                Err::<serde_json::Value, _>("backend down".to_string())
            }),
        );

        let response = registry.dispatch(call("broken", json!({}))).await;
        assert_eq!(response.response, json!({"error": "backend down"}));
    }

    #[tokio::test]
    async fn dispatch_answers_unknown_tools() {
        let registry = ToolRegistry::default();
        let response = registry.dispatch(call("missing", json!({}))).await;
        assert_eq!(response.name, "missing");
        assert_eq!(
            response.response,
            json!({"error": "Function not implemented by client."})
        );
    }
}
