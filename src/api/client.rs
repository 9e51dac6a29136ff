use crate::api::error::ApiError;
use crate::api::resources::{EntityApi, Resource};
use crate::api::types::Id;
use crate::cache::Filters;
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
  #[serde(default = "default_success")]
  success: bool,
  data: Option<T>,
  message: Option<String>,
  error: Option<String>,
}

fn default_success() -> bool {
  true
}

impl<T> ApiEnvelope<T> {
  fn failure_message(&self) -> Option<String> {
    self.message.clone().or_else(|| self.error.clone())
  }
}

/// Management API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  /// Bounds reads only; a timed-out write may still have been applied
  read_timeout: Duration,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token();

    // Url::join drops the last path segment unless it ends with '/'
    let mut base = config.api.url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;

    let read_timeout = Duration::from_secs(config.cache.fetch_timeout_secs);
    let http = reqwest::Client::builder()
      .connect_timeout(read_timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
      read_timeout,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
    let url = self.endpoint(path)?;
    debug!(%method, %url, "api request");
    let builder = self.http.request(method, url);
    Ok(match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  fn read_request(&self, path: &str, query: &Filters) -> Result<RequestBuilder> {
    Ok(
      self
        .request(Method::GET, path)?
        .query(query)
        .timeout(self.read_timeout),
    )
  }

  /// Send a request and unwrap the response envelope.
  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
    let response = request.send().await.map_err(ApiError::network)?;
    let status = response.status();
    let body = response.bytes().await.map_err(ApiError::network)?;

    if !status.is_success() {
      let message = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(&body)
        .ok()
        .and_then(|envelope| envelope.failure_message());
      return Err(ApiError::from_status(status, message).into());
    }

    if body.is_empty() {
      return Ok(None);
    }

    let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)
      .map_err(|e| eyre!("Failed to parse response: {}", e))?;
    if !envelope.success {
      return Err(ApiError::from_status(reqwest::StatusCode::BAD_REQUEST, envelope.failure_message()).into());
    }
    Ok(envelope.data)
  }

  async fn send_data<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
    self
      .send(request)
      .await?
      .ok_or_else(|| eyre!("Response contained no data"))
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &Filters) -> Result<T> {
    let request = self.read_request(path, query)?;
    self.send_data(request).await
  }

  pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
    let request = self.request(Method::POST, path)?.json(body);
    self.send_data(request).await
  }

  pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
    let request = self.request(Method::PUT, path)?.json(body);
    self.send_data(request).await
  }

  pub async fn delete(&self, path: &str) -> Result<()> {
    let request = self.request(Method::DELETE, path)?;
    self.send::<serde_json::Value>(request).await?;
    Ok(())
  }
}

impl<R: Resource> EntityApi<R> for ApiClient {
  async fn get_all(&self, filters: &Filters) -> Result<Vec<R>> {
    self.get(R::collection(), filters).await
  }

  async fn get_by_id(&self, id: Id) -> Result<R> {
    self
      .get(&format!("{}/{}", R::collection(), id), &Filters::new())
      .await
  }

  async fn create(&self, input: &R::Create) -> Result<R> {
    self.post(R::collection(), input).await
  }

  async fn update(&self, id: Id, patch: &R::Update) -> Result<R> {
    self
      .put(&format!("{}/{}", R::collection(), id), patch)
      .await
  }

  async fn delete(&self, id: Id) -> Result<()> {
    ApiClient::delete(self, &format!("{}/{}", R::collection(), id)).await
  }

  async fn stats(&self) -> Result<R::Stats> {
    self
      .get(&format!("{}/stats", R::collection()), &Filters::new())
      .await
  }
}
