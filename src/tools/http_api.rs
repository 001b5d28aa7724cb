use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};

use super::{
    optional_str, required_str, ParameterKind, Tool, ToolCategory, ToolDefinition, ToolError,
    ToolParameter,
};

const DEFAULT_MAX_RESPONSE_BYTES: usize = 1_000_000;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Bounded HTTP client tool: restricted method set, response-size cap, one
/// retry with backoff on transport errors and 5xx.
pub struct HttpApiTool {
    client: Client,
    max_response_bytes: usize,
}

impl Default for HttpApiTool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESPONSE_BYTES)
    }
}

impl HttpApiTool {
    pub fn new(max_response_bytes: usize) -> Self {
        Self {
            client: Client::new(),
            max_response_bytes,
        }
    }

    fn parse_method(raw: &str) -> Result<Method, ToolError> {
        match raw.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            other => Err(ToolError::Validation(format!(
                "Method {other} is not allowed"
            ))),
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        headers: Option<&Map<String, Value>>,
        body: Option<&str>,
    ) -> Result<reqwest::Response, ToolError> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(headers) = headers {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        request
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl Tool for HttpApiTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "api_call",
            "Call an external HTTP API with a bounded method set and response size cap",
            ToolCategory::Network,
        )
        .with_parameters([
            ToolParameter::new("url", ParameterKind::String).description("Request URL"),
            ToolParameter::new("method", ParameterKind::String)
                .description("HTTP method")
                .one_of([json!("GET"), json!("POST"), json!("PUT"), json!("DELETE")])
                .default_value(json!("GET")),
            ToolParameter::new("headers", ParameterKind::Object)
                .description("Request headers")
                .optional(),
            ToolParameter::new("body", ParameterKind::String)
                .description("Request body")
                .optional(),
        ])
        .with_returns(json!({
            "status": "Response status code",
            "body": "Response body (truncated to the size cap)",
        }))
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let url = required_str(args, "url")?;
        let method = Self::parse_method(optional_str(args, "method").unwrap_or("GET"))?;
        let headers = args.get("headers").and_then(Value::as_object);
        let body = optional_str(args, "body");

        let mut response = self.send_once(&method, url, headers, body).await;
        let needs_retry = match &response {
            Ok(r) => r.status().is_server_error(),
            Err(_) => true,
        };
        if needs_retry {
            tokio::time::sleep(RETRY_BACKOFF).await;
            response = self.send_once(&method, url, headers, body).await;
        }
        let response = response?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(ToolError::execution)?;
        let truncated = bytes.len() > self.max_response_bytes;
        let slice = &bytes[..bytes.len().min(self.max_response_bytes)];

        Ok(json!({
            "status": status,
            "body": String::from_utf8_lossy(slice),
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(url: &str, method: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("url".into(), json!(url));
        map.insert("method".into(), json!(method));
        map
    }

    #[test]
    fn only_bounded_methods_allowed() {
        assert!(HttpApiTool::parse_method("get").is_ok());
        assert!(HttpApiTool::parse_method("PATCH").is_err());
        assert!(HttpApiTool::parse_method("TRACE").is_err());
    }

    #[tokio::test]
    async fn get_returns_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("pong")
            .create_async()
            .await;

        let tool = HttpApiTool::default();
        let output = tool
            .run(&args(&format!("{}/ping", server.url()), "GET"))
            .await
            .unwrap();
        assert_eq!(output["status"], 200);
        assert_eq!(output["body"], "pong");
        assert_eq!(output["truncated"], false);
    }

    #[tokio::test]
    async fn server_error_is_retried_once() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/flaky")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let tool = HttpApiTool::default();
        let output = tool
            .run(&args(&format!("{}/flaky", server.url()), "GET"))
            .await
            .unwrap();
        assert_eq!(output["status"], 500);
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn oversized_body_is_truncated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/big")
            .with_status(200)
            .with_body("x".repeat(64))
            .create_async()
            .await;

        let tool = HttpApiTool::new(16);
        let output = tool
            .run(&args(&format!("{}/big", server.url()), "GET"))
            .await
            .unwrap();
        assert_eq!(output["body"].as_str().unwrap().len(), 16);
        assert_eq!(output["truncated"], true);
    }
}
