//! HTTP client for the service's REST API.
//!
//! Authentication follows the development-mode setup the test image uses:
//!
//! * Requests outside `/a/` carry an `X-User` header naming the account,
//!   which the service trusts and logs in as.
//! * The service sets an `XSRF_TOKEN` cookie; it is echoed back in the
//!   `X-Gerrit-Auth` header.
//! * Once a password is known, requests use basic auth.
//!
//! JSON responses start with `)]}'` on its own line, which is stripped.

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::HttpError;
use crate::orchestrator::Endpoint;
use crate::setup::{AccountApi, HttpConnector};

/// Prefix the service puts in front of every JSON response
pub const MAGIC_PREFIX: &str = ")]}'";

/// Header naming the account on unauthenticated paths
pub const USER_HEADER: &str = "X-User";

/// Header carrying the XSRF token
pub const AUTH_HEADER: &str = "X-Gerrit-Auth";

/// Cookie the service stores the XSRF token in
pub const XSRF_COOKIE: &str = "XSRF_TOKEN";

#[derive(Serialize)]
struct PasswordInput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    http_password: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    generate: bool,
}

/// Client for one account on one service instance
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    prefix: String,
    username: String,
    password: Option<String>,
}

impl HttpClient {
    /// Client talking to `endpoint` as `username`
    pub fn new(endpoint: &Endpoint, username: &str) -> Result<Self, HttpError> {
        if username.is_empty() {
            return Err(HttpError::MissingUsername);
        }

        let prefix = endpoint.http_url();
        let base =
            Url::parse(&prefix).map_err(|e| HttpError::InvalidUrl(format!("{prefix}: {e}")))?;
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        Ok(Self {
            client,
            jar,
            base,
            prefix,
            username: username.to_string(),
            password: None,
        })
    }

    /// Authenticate with a known password from now on
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// `http://host:port` every request path is appended to
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The account this client acts as
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The HTTP password, once known
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Current value of the XSRF cookie, if the service has set one
    pub fn xsrf_token(&self) -> Option<String> {
        let cookies = self.jar.cookies(&self.base)?;
        cookie_value(cookies.to_str().ok()?, XSRF_COOKIE)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<(&'static str, String)>,
        expected: StatusCode,
    ) -> Result<String, HttpError> {
        let url = format!("{}{}", self.prefix, path);
        let mut request = self.client.request(method.clone(), &url);

        if !is_authenticated_path(path) {
            request = request.header(USER_HEADER, &self.username);
        }
        if let Some(token) = self.xsrf_token() {
            if let Ok(value) = HeaderValue::from_str(&token) {
                request = request.header(AUTH_HEADER, value);
            }
        }
        if let Some(password) = &self.password {
            request = request.basic_auth(&self.username, Some(password));
        }
        if let Some((content_type, body)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = strip_magic_prefix(&text).to_string();
        debug!(%method, %url, status = status.as_u16(), "request");

        if status != expected {
            return Err(HttpError::UnexpectedStatus {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                expected: expected.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(body)
    }

    /// Log in, creating the account on first use
    pub async fn login(&self) -> Result<(), HttpError> {
        self.send(Method::GET, "/login/", None, StatusCode::OK)
            .await
            .map(drop)
    }

    /// Add an SSH public key to the account
    pub async fn insert_public_key(&self, public_key: &str) -> Result<(), HttpError> {
        self.send(
            Method::POST,
            "/a/accounts/self/sshkeys",
            Some(("text/plain", public_key.trim().to_string())),
            StatusCode::CREATED,
        )
        .await
        .map(drop)
    }

    /// Set the account's HTTP password and use it from now on
    pub async fn set_password(&mut self, password: &str) -> Result<(), HttpError> {
        let input = PasswordInput {
            http_password: Some(password),
            generate: false,
        };
        self.put_password(&input).await?;
        self.password = Some(password.to_string());
        Ok(())
    }

    /// Have the service generate an HTTP password and use it from now on
    pub async fn generate_password(&mut self) -> Result<String, HttpError> {
        let input = PasswordInput {
            http_password: None,
            generate: true,
        };
        let body = self.put_password(&input).await?;
        let password: String = serde_json::from_str(body.trim())?;
        self.password = Some(password.clone());
        Ok(password)
    }

    async fn put_password(&self, input: &PasswordInput<'_>) -> Result<String, HttpError> {
        let json = serde_json::to_string(input)?;
        self.send(
            Method::PUT,
            "/a/accounts/self/password.http",
            Some(("application/json", json)),
            StatusCode::OK,
        )
        .await
    }
}

#[async_trait]
impl AccountApi for HttpClient {
    async fn create_account(&mut self) -> Result<String, HttpError> {
        self.login().await?;
        Ok(self.username.clone())
    }

    async fn login(&mut self) -> Result<(), HttpError> {
        HttpClient::login(self).await
    }

    async fn insert_public_key(&mut self, public_key: &str) -> Result<(), HttpError> {
        HttpClient::insert_public_key(self, public_key).await
    }

    async fn set_password(&mut self, password: &str) -> Result<(), HttpError> {
        HttpClient::set_password(self, password).await
    }

    async fn generate_password(&mut self) -> Result<String, HttpError> {
        HttpClient::generate_password(self).await
    }
}

/// Builds [`HttpClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientConnector;

impl HttpConnector for HttpClientConnector {
    type Api = HttpClient;

    fn connect(&self, endpoint: &Endpoint, username: &str) -> Result<HttpClient, HttpError> {
        HttpClient::new(endpoint, username)
    }
}

/// Paths under `/a/` require real authentication and ignore `X-User`
fn is_authenticated_path(path: &str) -> bool {
    path.starts_with("/a/")
}

fn strip_magic_prefix(body: &str) -> &str {
    match body.strip_prefix(MAGIC_PREFIX) {
        Some(rest) => rest.strip_prefix('\n').unwrap_or(rest),
        None => body,
    }
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
