//! REST client for the telehealth backend.
//!
//! Every request carries `Authorization: Bearer <token>` while a session
//! exists. The session manager sets and clears the bearer; views only read.

mod endpoints;

use std::sync::Arc;

use reqwest::multipart::Form;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::ApiError;

pub use endpoints::{AuthResponse, Credentials, Registration};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    bearer: Arc<watch::Sender<Option<String>>>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ApiError::from_reqwest)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer: Arc::new(watch::Sender::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the bearer sent with every subsequent request.
    pub fn set_bearer(&self, token: Option<String>) {
        self.bearer.send_replace(token);
    }

    pub fn bearer(&self) -> Option<String> {
        self.bearer.borrow().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match token.map(str::to_owned).or_else(|| self.bearer()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GET with an explicit bearer, bypassing the session's. Used while a
    /// candidate token is being verified and no session exists yet.
    pub async fn get_with_bearer<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T, ApiError> {
        send_json(self.request(Method::GET, path, Some(token))).await
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        send_json(self.request(Method::GET, path, None)).await
    }

    pub(crate) async fn get_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        send_json(self.request(Method::GET, path, None).query(query)).await
    }

    pub(crate) async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        send_json(self.request(Method::POST, path, None).json(body)).await
    }

    pub(crate) async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        send_json(self.request(Method::PUT, path, None).json(body)).await
    }

    /// Send a multipart form. Upload routes may answer 2xx with an `error`
    /// body; that is surfaced as a `Status` error too.
    pub(crate) async fn send_form<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        form: Form,
    ) -> Result<T, ApiError> {
        let resp = self
            .request(method, path, None)
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        let resp = check_status(resp).await?;
        let status = resp.status().as_u16();
        let body: serde_json::Value = resp.json().await.map_err(ApiError::from_reqwest)?;
        if let Some(message) = body.get("error").and_then(|e| e.as_str()) {
            return Err(ApiError::Status {
                status,
                message: message.to_string(),
            });
        }
        serde_json::from_value(body).map_err(|e| ApiError::Other(e.into()))
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let resp = self
            .request(Method::DELETE, path, None)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        check_status(resp).await.map(|_| ())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "Request failed");
    Err(ApiError::from_status(status, &body))
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ApiError> {
    let resp = builder.send().await.map_err(ApiError::from_reqwest)?;
    let resp = check_status(resp).await?;
    resp.json().await.map_err(ApiError::from_reqwest)
}
