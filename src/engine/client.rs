/// Engine control-plane client
///
/// [`EngineClient`] is the seam the orchestrator depends on; [`HttpEngineClient`]
/// speaks the engine's REST API. `create` is not idempotent, `delete` is (404 counts
/// as success).

use crate::compiler::{CompiledEngineGraph, EngineNode, EngineSettings, NodeConnections};
use crate::config::EngineConfig;
use crate::engine::TransportError;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-N8N-API-KEY";

/// Handle returned by `create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineWorkflowRef {
    pub id: String,
}

/// Read-back of a remote workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineWorkflow {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub nodes: Vec<EngineWorkflowNode>,
    #[serde(default, alias = "webhookUrl", skip_serializing_if = "Option::is_none")]
    pub trigger_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineWorkflowNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Always allocates a new remote workflow
    async fn create(
        &self,
        name: &str,
        graph: &CompiledEngineGraph,
    ) -> Result<EngineWorkflowRef, TransportError>;

    async fn activate(&self, id: &str) -> Result<(), TransportError>;

    async fn deactivate(&self, id: &str) -> Result<(), TransportError>;

    async fn get(&self, id: &str) -> Result<EngineWorkflow, TransportError>;

    /// Idempotent; a missing workflow is not an error
    async fn delete(&self, id: &str) -> Result<(), TransportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkflowRequest<'a> {
    name: &'a str,
    nodes: &'a [EngineNode],
    connections: &'a BTreeMap<String, NodeConnections>,
    settings: &'a EngineSettings,
    static_data: &'a Option<Value>,
}

/// REST client for the engine's public API
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpEngineClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                operation: "client setup".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, TransportError> {
        Self::new(
            &config.api_url,
            &config.api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, TransportError> {
        tracing::debug!("🌐 Engine {}", operation);
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        ensure_success(operation, response).await
    }

    async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T, TransportError> {
        response.json::<T>().await.map_err(|e| TransportError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

/// Turn a non-2xx response into a `Status` error carrying the body
async fn ensure_success(operation: &str, response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn create(
        &self,
        name: &str,
        graph: &CompiledEngineGraph,
    ) -> Result<EngineWorkflowRef, TransportError> {
        let body = CreateWorkflowRequest {
            name,
            nodes: &graph.nodes,
            connections: &graph.connections,
            settings: &graph.settings,
            static_data: &graph.static_data,
        };
        let response = self
            .send("create", self.http.post(self.url("/workflows")).json(&body))
            .await?;
        Self::decode("create", response).await
    }

    async fn activate(&self, id: &str) -> Result<(), TransportError> {
        let path = format!("/workflows/{}/activate", id);
        self.send("activate", self.http.post(self.url(&path))).await?;
        Ok(())
    }

    async fn deactivate(&self, id: &str) -> Result<(), TransportError> {
        let path = format!("/workflows/{}/deactivate", id);
        self.send("deactivate", self.http.post(self.url(&path))).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<EngineWorkflow, TransportError> {
        let path = format!("/workflows/{}", id);
        let response = self.send("get", self.http.get(self.url(&path))).await?;
        Self::decode("get", response).await
    }

    async fn delete(&self, id: &str) -> Result<(), TransportError> {
        let path = format!("/workflows/{}", id);
        match self.send("delete", self.http.delete(self.url(&path))).await {
            Ok(_) => Ok(()),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND.as_u16()) => {
                tracing::debug!("Engine workflow {} already gone", id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Posts manual test events to a deployed trigger URL
#[derive(Debug, Clone)]
pub struct TriggerClient {
    http: reqwest::Client,
}

impl TriggerClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                operation: "client setup".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }

    /// One POST; any non-2xx is a `Status` error
    pub async fn post(&self, url: &str, payload: &Value) -> Result<u16, TransportError> {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                operation: "test trigger".to_string(),
                message: e.to_string(),
            })?;
        let response = ensure_success("test trigger", response).await?;
        Ok(response.status().as_u16())
    }
}
