//! HTTP client for the berth API

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Error body returned by the API
#[derive(Debug, Deserialize)]
struct ApiError {
    kind: String,
    message: String,
}

/// Output of an exec call
#[derive(Debug, Deserialize)]
pub struct ExecOutput {
    /// Concatenated output of the pods that succeeded
    pub output: String,
    /// Per-pod outcomes
    #[serde(default)]
    pub targets: Vec<Value>,
}

/// Authenticated client for one API endpoint
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl ApiClient {
    /// Client for the configured endpoint
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.token))
            .timeout(REQUEST_TIMEOUT)
    }

    /// `GET api/services`
    pub async fn list_services(&self) -> Result<Value> {
        let request = self.http.get(self.url("api/services"));
        json_body(self.send(request).await?).await
    }

    /// `GET api/templates`
    pub async fn list_templates(&self) -> Result<Value> {
        let request = self.http.get(self.url("api/templates"));
        json_body(self.send(request).await?).await
    }

    /// `POST api/services`
    pub async fn create_service(
        &self,
        template: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<Value> {
        let request = self
            .http
            .post(self.url("api/services"))
            .json(&json!({ "template": template, "values": values }));
        json_body(self.send(request).await?).await
    }

    /// `DELETE api/services/{name}`
    pub async fn delete_service(&self, name: &str) -> Result<()> {
        let request = self.http.delete(self.url(&format!("api/services/{name}")));
        self.send(request).await?;
        Ok(())
    }

    /// `POST api/services/{name}/exec`
    pub async fn exec_service(
        &self,
        name: &str,
        command: &[String],
        all: bool,
    ) -> Result<ExecOutput> {
        let request = self
            .http
            .post(self.url(&format!("api/services/{name}/exec")))
            .json(&json!({ "command": command, "all": all }));
        Ok(self.send(request).await?.json().await?)
    }

    /// `POST api/utils/inject`
    pub async fn inject(&self, manifest: String, datasets: bool) -> Result<String> {
        let request = self
            .http
            .post(self.url("api/utils/inject"))
            .query(&[("datasets", datasets)])
            .header("Content-Type", "application/yaml")
            .body(manifest);
        Ok(self.send(request).await?.text().await?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }
}

async fn json_body(response: Response) -> Result<Value> {
    Ok(response.json().await?)
}

/// Map a failed response to an error, falling back to the raw body
fn api_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ApiError>(body) {
        Ok(e) => Error::Api {
            status,
            kind: e.kind,
            message: e.message,
        },
        Err(_) => Error::Api {
            status,
            kind: "Http".to_string(),
            message: body.trim().to_string(),
        },
    }
}
