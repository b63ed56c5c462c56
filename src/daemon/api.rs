//! REST API Handler for the Brocker daemon
//!
//! Maps control requests onto orchestrator operations.

use crate::error::{BrockerError, Result};
use crate::orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tracing::debug;

/// API route prefix
pub const API_PREFIX: &str = "/api/v1";

/// API request/response structures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceAddRequest {
    pub name: String,
    pub bridge_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerRunRequest {
    pub service_name: String,
    pub command: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRunResponse {
    pub name: String,
}

/// Status code and body of an API reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ApiResponse {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    fn text(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body,
        }
    }

    fn empty(status: u16) -> Self {
        Self::text(status, String::new())
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "message": message }).to_string())
    }
}

impl From<BrockerError> for ApiResponse {
    fn from(err: BrockerError) -> Self {
        let status = match &err {
            BrockerError::Validation(_) | BrockerError::Json(_) => 400,
            BrockerError::ServiceNotFound(_) | BrockerError::ContainerNotFound(_) => 404,
            BrockerError::ServiceExists(_) => 409,
            _ => 500,
        };
        Self::error(status, &err.to_string())
    }
}

/// Reason phrase for the status codes the API emits
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        _ => "Internal Server Error",
    }
}

/// API Handler for processing requests
#[derive(Clone)]
pub struct ApiHandler {
    orchestrator: Orchestrator,
}

impl ApiHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Handle an incoming API request
    ///
    /// Add and run schedule lifecycles on the tokio blocking pool, so this
    /// must be called from within a runtime.
    pub fn handle_request(&self, method: &str, path: &str, body: &str) -> ApiResponse {
        debug!("API request: {} {} body={}", method, path, body.len());

        let path = path.split('?').next().unwrap_or(path);
        let Some(route) = path.strip_prefix(API_PREFIX) else {
            return ApiResponse::error(404, "Not Found");
        };
        let expected = match route {
            "/service/add" | "/service/stop" | "/container/run" | "/container/exec"
            | "/container/stop" => "POST",
            "/container/list" => "GET",
            _ => return ApiResponse::error(404, "Not Found"),
        };
        if method != expected {
            return ApiResponse::error(405, "Invalid Request!");
        }

        let result = match route {
            "/service/add" => self.add_service(body),
            "/service/stop" => self.stop_service(body),
            "/container/run" => self.run_container(body),
            "/container/list" => self.list_containers(),
            "/container/exec" => self.exec_container(body),
            _ => self.stop_container(body),
        };

        result.unwrap_or_else(|e| {
            debug!("API request {} {} failed: {}", method, path, e);
            ApiResponse::from(e)
        })
    }

    fn add_service(&self, body: &str) -> Result<ApiResponse> {
        let request: ServiceAddRequest = serde_json::from_str(body)?;
        let proxy = self.orchestrator.add_service(&request.name, &request.bridge_ip)?;
        tracing::info!("Service {} added, proxy {}", request.name, proxy.name);
        Ok(ApiResponse::empty(201))
    }

    fn stop_service(&self, body: &str) -> Result<ApiResponse> {
        let request: NameRequest = serde_json::from_str(body)?;
        self.orchestrator.stop_service(&request.name)?;
        Ok(ApiResponse::empty(202))
    }

    fn run_container(&self, body: &str) -> Result<ApiResponse> {
        let request: ContainerRunRequest = serde_json::from_str(body)?;
        let task = self
            .orchestrator
            .run_container(&request.service_name, &request.command, request.file)?;
        let response = ContainerRunResponse { name: task.name };
        Ok(ApiResponse::json(201, serde_json::to_string(&response)?))
    }

    fn list_containers(&self) -> Result<ApiResponse> {
        let containers = self.orchestrator.list_containers()?;
        Ok(ApiResponse::json(200, serde_json::to_string(&containers)?))
    }

    fn exec_container(&self, body: &str) -> Result<ApiResponse> {
        let request: NameRequest = serde_json::from_str(body)?;
        let pid = self.orchestrator.resolve(&request.name)?;
        Ok(ApiResponse::text(200, pid.to_string()))
    }

    fn stop_container(&self, body: &str) -> Result<ApiResponse> {
        let request: NameRequest = serde_json::from_str(body)?;
        self.orchestrator.stop_container(&request.name)?;
        Ok(ApiResponse::empty(202))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrockerConfig;
    use crate::container::ContainerSummary;
    use crate::runtime::testing::FakeHost;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_handler() -> (TempDir, FakeHost, ApiHandler) {
        let temp_dir = TempDir::new().unwrap();
        let config = BrockerConfig {
            container_root: temp_dir.path().join("containers"),
            app_mount: temp_dir.path().join("app"),
            ..BrockerConfig::default()
        };
        let host = FakeHost::new();
        let orchestrator = Orchestrator::new(config, host.platform()).unwrap();
        (temp_dir, host, ApiHandler::new(orchestrator))
    }

    fn list(handler: &ApiHandler) -> Vec<ContainerSummary> {
        let response = handler.handle_request("GET", "/api/v1/container/list", "");
        assert_eq!(response.status, 200);
        serde_json::from_str(&response.body).unwrap()
    }

    #[tokio::test]
    async fn test_add_service_and_run() {
        let (_dir, _host, handler) = create_test_handler();

        let response = handler.handle_request(
            "POST",
            "/api/v1/service/add",
            r#"{"name":"web","bridge-ip":"10.0.0.1/24"}"#,
        );
        assert_eq!(response.status, 201);

        let response = handler.handle_request(
            "POST",
            "/api/v1/container/run",
            r#"{"service-name":"web","command":"/bin/sleep 100"}"#,
        );
        assert_eq!(response.status, 201);
        let created: ContainerRunResponse = serde_json::from_str(&response.body).unwrap();
        assert_eq!(created.name.len(), 8);

        for _ in 0..200 {
            if list(&handler).iter().any(|c| c.name == created.name && c.active) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = handler.handle_request(
            "POST",
            "/api/v1/container/exec",
            &format!(r#"{{"name":"{}"}}"#, created.name),
        );
        assert_eq!(response.status, 200);
        assert!(response.body.parse::<u32>().is_ok());

        let response = handler.handle_request(
            "POST",
            "/api/v1/container/stop",
            &format!(r#"{{"name":"{}"}}"#, created.name),
        );
        assert_eq!(response.status, 202);
    }

    #[tokio::test]
    async fn test_duplicate_service_conflicts() {
        let (_dir, _host, handler) = create_test_handler();
        let body = r#"{"name":"web","bridge-ip":"10.0.0.1/24"}"#;
        assert_eq!(handler.handle_request("POST", "/api/v1/service/add", body).status, 201);
        assert_eq!(handler.handle_request("POST", "/api/v1/service/add", body).status, 409);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (_dir, host, handler) = create_test_handler();

        let response = handler.handle_request("POST", "/api/v1/service/add", "{not json");
        assert_eq!(response.status, 400);

        let response = handler.handle_request(
            "POST",
            "/api/v1/service/add",
            r#"{"name":"web","bridge-ip":"10.0.0.1"}"#,
        );
        assert_eq!(response.status, 400);

        let response = handler.handle_request(
            "POST",
            "/api/v1/container/run",
            r#"{"service-name":"ghost","command":"/bin/true"}"#,
        );
        assert_eq!(response.status, 404);
        assert!(host.network.calls().is_empty());
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let (_dir, _host, handler) = create_test_handler();

        assert_eq!(handler.handle_request("GET", "/api/v1/service/add", "").status, 405);
        assert_eq!(handler.handle_request("POST", "/api/v1/container/list", "").status, 405);
        assert_eq!(handler.handle_request("GET", "/api/v1/nope", "").status, 404);
        assert_eq!(handler.handle_request("GET", "/", "").status, 404);
        assert_eq!(
            handler
                .handle_request("POST", "/api/v1/container/stop", r#"{"name":"deadbeef"}"#)
                .status,
            404
        );
        assert_eq!(
            handler
                .handle_request("POST", "/api/v1/service/stop", r#"{"name":"web"}"#)
                .status,
            404
        );
    }

    #[test]
    fn test_list_starts_empty() {
        let (_dir, _host, handler) = create_test_handler();
        assert!(list(&handler).is_empty());
    }
}
