use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://app.larder.recipes/api/v1/sync/";

#[derive(Debug, Error)]
pub enum LarderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments")]
    BaseUrl,
    #[error("username must not be blank")]
    BlankUsername,
    #[error("password must not be blank")]
    BlankPassword,
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("failed to decode api response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Every API response wraps its payload in `{"result": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Clone)]
pub struct LarderClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl LarderClient {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, LarderError> {
        Self::with_base_url(DEFAULT_BASE_URL, username, password)
    }

    pub fn with_base_url(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, LarderError> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() {
            return Err(LarderError::BlankUsername);
        }
        if password.trim().is_empty() {
            return Err(LarderError::BlankPassword);
        }
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            username,
            password,
        })
    }

    /// Lists the remote recipe index: one `{uid, hash}` reference per record.
    pub async fn recipes(&self) -> Result<Vec<RecipeRef>, LarderError> {
        let url = self.endpoint(&["recipes"])?;
        self.get(url).await
    }

    /// Fetches the full record for one recipe.
    pub async fn recipe(&self, uid: &str) -> Result<Recipe, LarderError> {
        let url = self.endpoint(&["recipe", uid])?;
        self.get(url).await
    }

    pub async fn categories(&self) -> Result<Vec<Category>, LarderError> {
        let url = self.endpoint(&["categories"])?;
        self.get(url).await
    }

    pub async fn bookmarks(&self) -> Result<Vec<Bookmark>, LarderError> {
        let url = self.endpoint(&["bookmarks"])?;
        self.get(url).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, LarderError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, LarderError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| LarderError::BaseUrl)?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LarderError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LarderError::Api { status, body });
        }
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        Ok(envelope.result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecipeRef {
    pub uid: String,
    pub hash: String,
}

/// Full recipe record. Fields beyond the identity pair are kept verbatim in
/// `extra` so persisted files round-trip everything the service returns.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Recipe {
    pub uid: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Category {
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uid: Option<String>,
    #[serde(default)]
    pub order_flag: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bookmark {
    pub uid: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub order_flag: i64,
}
