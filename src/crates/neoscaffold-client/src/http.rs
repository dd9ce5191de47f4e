//! HTTP transport to the execution backend
//!
//! Every request is JSON and, when a session is available, carries
//! `Authorization: Bearer <token>` and `Authenticator: <name>` headers.
//! Non-success statuses are surfaced as errors. A failure that looks like a
//! rejected session invalidates it and asks the host to route to sign-in
//! before the error is returned.
//!
//! # Example
//!
//! ```rust,ignore
//! use neoscaffold_client::{ApiClient, ClientSettings, MemoryStore, StoredSession};
//! use std::sync::Arc;
//!
//! let settings = ClientSettings::new("http://localhost:6166");
//! let session = Arc::new(StoredSession::new(Arc::new(MemoryStore::new()), None));
//! let api = ApiClient::new(&settings, session)?;
//! let extensions = api.get_extensions().await?;
//! ```

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use neoscaffold_core::InterventionKind;

use crate::config::ClientSettings;
use crate::error::{ClientError, Result};
use crate::session::SessionHost;

/// Header naming the identity provider that issued the token.
pub const AUTHENTICATOR_HEADER: &str = "authenticator";

/// Path of the plan submission endpoint.
pub const PROMPT_PATH: &str = "/prompt";

/// Path of the extension listing endpoint.
pub const EXTENSIONS_PATH: &str = "/extensions";

/// Path of the breakpoint step-through endpoint.
pub const STEP_THROUGH_PATH: &str = "/interventions/breakpoints/step-through";

/// Client for the backend's HTTP API.
pub struct ApiClient {
    base_url: String,
    client: Client,
    session: Arc<dyn SessionHost>,
}

impl ApiClient {
    pub fn new(settings: &ClientSettings, session: Arc<dyn SessionHost>) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<dyn SessionHost> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Headers attached to every request.
    pub async fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let Some(session) = self.session.current().await else {
            return headers;
        };
        let Some((token, authenticator)) = session.credentials() else {
            return headers;
        };
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
                headers.insert(
                    HeaderName::from_static(AUTHENTICATOR_HEADER),
                    HeaderValue::from_static(authenticator),
                );
            }
            Err(e) => warn!("Session token is not a valid header value: {}", e),
        }
        headers
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let result = self.execute(request).await;
        if let Err(e) = &result {
            error!("Request failed: {}", e);
            if e.is_authorization_failure() {
                self.session.invalidate().await;
                self.session.redirect_to_sign_in();
            }
        }
        result
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value> {
        let response = request
            .headers(self.request_headers().await)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Submit a serialized execution plan.
    ///
    /// Bodies that are not valid JSON are rejected without a request.
    pub async fn queue_prompt(&self, body: &str) -> Result<Value> {
        if let Err(e) = serde_json::from_str::<Value>(body) {
            error!("Refusing to send malformed plan: {}", e);
            return Err(ClientError::InvalidPlan(e.to_string()));
        }
        debug!(bytes = body.len(), "posting plan");
        self.send(self.client.post(self.url(PROMPT_PATH)).body(body.to_string()))
            .await
    }

    /// Fetch the extension descriptors.
    pub async fn get_extensions(&self) -> Result<Value> {
        self.send(self.client.get(self.url(EXTENSIONS_PATH))).await
    }

    /// Replace the backend's set of interventions of one kind for a workflow.
    pub async fn toggle_interventions(
        &self,
        kind: InterventionKind,
        workflow_id: &str,
        node_ids: &[String],
        all: bool,
    ) -> Result<Value> {
        let mut body = json!({
            "workflow_id": workflow_id,
            "node_ids": node_ids,
        });
        body[kind.all_flag()] = Value::Bool(all);
        debug!(%kind, workflow_id, nodes = node_ids.len(), all, "posting interventions");
        self.send(self.client.post(self.url(kind.endpoint())).json(&body))
            .await
    }

    /// Release paused nodes for one step.
    pub async fn step_through(&self, workflow_id: &str, node_ids: &[String]) -> Result<Value> {
        let body = json!({
            "workflow_id": workflow_id,
            "node_ids": node_ids,
        });
        self.send(self.client.post(self.url(STEP_THROUGH_PATH)).json(&body))
            .await
    }
}
