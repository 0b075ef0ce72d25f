//! HTTP client for a remote knowledge-base server.
//!
//! Configuration comes from [`Config`](crate::config::Config): the server URL
//! (`CONTEXTKB_URL` or the site table) and an optional bearer key
//! (`CONTEXTKB_API_KEY`). Failed requests carrying an error body are turned
//! back into the [`KbError`] the server raised.

use reqwest::{Client, IntoUrl, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::SESSION_HEADER;
use crate::config::Config;
use crate::error::{ErrorBody, KbError};
use crate::models::{
    AccessMode, ConceptView, Context, ContextStatus, CreateConceptInput, CreateContextInput,
    CreateInstanceInput, Created, EnterContextInput, Entry, FindInput, FindOutput, Instance,
    KbStatus, KindFilter, Pid, Resolved, SearchPath, SessionOpenInput, SessionOpened,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Kb(#[from] KbError),

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// The knowledge-base error, if the server sent one.
    pub fn kb(&self) -> Option<&KbError> {
        match self {
            Self::Kb(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KbClient {
    base_url: String,
    api_key: Option<String>,
    session_id: Option<String>,
    client: Client,
}

impl KbClient {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.url.clone(), config.api_key.clone())
    }

    /// `base_url` is the server root, e.g. `http://localhost:5050`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: format!("{}/api/v1", base_url.trim_end_matches('/')),
            api_key,
            session_id: None,
            client: Client::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.request_to(method, format!("{}{}", self.base_url, path))
    }

    fn request_to(&self, method: Method, url: impl IntoUrl) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(ref id) = self.session_id {
            req = req.header(SESSION_HEADER, id);
        }
        req
    }

    /// URL of `/<collection>/<identity>` with the identity encoded as one
    /// path segment.
    fn entry_url(&self, collection: &str, identity: &str) -> Result<Url, ClientError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .push(collection)
            .push(identity);
        Ok(url)
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), ClientError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if let Ok(error) = serde_json::from_str::<ErrorBody>(&body) {
            return ClientError::Kb(KbError::from_wire(error));
        }
        match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            _ => ClientError::Server(format!("{}: {}", status, body)),
        }
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        let response = self.request(Method::GET, "/health").send().await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Session Operations
    // ============================================================

    /// Log in and remember the session id for later requests.
    pub async fn login(&mut self, user: &str) -> Result<SessionOpened, ClientError> {
        let input = SessionOpenInput {
            user: user.to_string(),
            session_id: self.session_id.clone(),
        };
        let response = self
            .request(Method::POST, "/sessions")
            .json(&input)
            .send()
            .await?;
        let opened: SessionOpened = self.handle_response(response).await?;
        self.session_id = Some(opened.session_id.clone());
        Ok(opened)
    }

    pub async fn logout(&mut self) -> Result<(), ClientError> {
        let response = self.request(Method::DELETE, "/sessions").send().await?;
        self.handle_empty_response(response).await?;
        self.session_id = None;
        Ok(())
    }

    pub async fn status(&self) -> Result<KbStatus, ClientError> {
        let response = self.request(Method::GET, "/status").send().await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Context Operations
    // ============================================================

    pub async fn enter(&self, prefix: &str, mode: AccessMode) -> Result<(), ClientError> {
        let input = EnterContextInput {
            prefix: prefix.to_string(),
            mode,
        };
        let response = self
            .request(Method::PUT, "/current-context")
            .json(&input)
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    pub async fn leave(&self) -> Result<(), ClientError> {
        let response = self
            .request(Method::DELETE, "/current-context")
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    pub async fn get_search_path(&self) -> Result<Vec<String>, ClientError> {
        let response = self.request(Method::GET, "/search-path").send().await?;
        let path: SearchPath = self.handle_response(response).await?;
        Ok(path.search_path)
    }

    pub async fn set_search_path(&self, search_path: Vec<String>) -> Result<(), ClientError> {
        let response = self
            .request(Method::PUT, "/search-path")
            .json(&SearchPath { search_path })
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    pub async fn new_context(&self, input: &CreateContextInput) -> Result<Context, ClientError> {
        let response = self
            .request(Method::POST, "/contexts")
            .json(input)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Describe `prefix`, or the current context.
    pub async fn context_status(&self, prefix: Option<&str>) -> Result<ContextStatus, ClientError> {
        let mut req = self.request(Method::GET, "/contexts/status");
        if let Some(prefix) = prefix {
            req = req.query(&[("prefix", prefix)]);
        }
        let response = req.send().await?;
        self.handle_response(response).await
    }

    pub async fn freeze_context(&self) -> Result<(), ClientError> {
        let response = self
            .request(Method::POST, "/contexts/current/freeze")
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    pub async fn reset_context(&self) -> Result<(), ClientError> {
        let response = self
            .request(Method::DELETE, "/contexts/current")
            .send()
            .await?;
        self.handle_empty_response(response).await
    }

    // ============================================================
    // Resolution and Entries
    // ============================================================

    pub async fn resolve(
        &self,
        identity: &str,
        base: Option<&str>,
        kind: KindFilter,
    ) -> Result<Resolved, ClientError> {
        let kind = match kind {
            KindFilter::Concept => "concept",
            KindFilter::Instance => "instance",
            KindFilter::Both => "both",
        };
        let mut req = self
            .request_to(Method::GET, self.entry_url("resolve", identity)?)
            .query(&[("kind", kind)]);
        if let Some(base) = base {
            req = req.query(&[("base", base)]);
        }
        let response = req.send().await?;
        self.handle_response(response).await
    }

    pub async fn new_concept(&self, input: &CreateConceptInput) -> Result<Pid, ClientError> {
        let response = self
            .request(Method::POST, "/concepts")
            .json(input)
            .send()
            .await?;
        let created: Created = self.handle_response(response).await?;
        Ok(created.pid)
    }

    pub async fn get_concept(
        &self,
        identity: &str,
        base: Option<&str>,
    ) -> Result<ConceptView, ClientError> {
        let mut req = self.request_to(Method::GET, self.entry_url("concepts", identity)?);
        if let Some(base) = base {
            req = req.query(&[("base", base)]);
        }
        let response = req.send().await?;
        self.handle_response(response).await
    }

    pub async fn new_instance(&self, input: &CreateInstanceInput) -> Result<Pid, ClientError> {
        let response = self
            .request(Method::POST, "/instances")
            .json(input)
            .send()
            .await?;
        let created: Created = self.handle_response(response).await?;
        Ok(created.pid)
    }

    pub async fn get_instance(&self, identity: &str) -> Result<Instance, ClientError> {
        let response = self
            .request_to(Method::GET, self.entry_url("instances", identity)?)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get(&self, identity: &str) -> Result<Entry, ClientError> {
        let response = self
            .request_to(Method::GET, self.entry_url("entries", identity)?)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn find(&self, input: &FindInput) -> Result<FindOutput, ClientError> {
        let response = self
            .request(Method::POST, "/entries/find")
            .json(input)
            .send()
            .await?;
        self.handle_response(response).await
    }
}
