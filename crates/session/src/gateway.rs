// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Auth backend gateway: login, second-factor completion, token refresh,
//! logout, current-user lookup.
//!
//! The wire contract is the single canonical one: JSON bodies, bearer auth
//! on authenticated endpoints, and `access_token` as the token field name.
//! A 401 from `refresh` or `current_user` means the session is no longer
//! valid, never a transient error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::SessionError;

/// Login input, including the optional second-factor code.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub two_factor_code: Option<String>,
    pub remember_me: bool,
}

/// Authenticated principal as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Tokens issued by a successful login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Outcome of a login call. A second-factor challenge is a successful but
/// incomplete login, not a failure.
#[derive(Debug, Clone)]
pub enum LoginReply {
    Granted { grant: TokenGrant, user: User },
    TwoFactorRequired,
}

/// Network operations against the auth backend.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginReply, SessionError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError>;
    async fn logout(&self, access_token: &str) -> Result<(), SessionError>;
    async fn current_user(&self, access_token: &str) -> Result<User, SessionError>;
}

// -- HTTP implementation ------------------------------------------------------

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    two_factor_code: Option<&'a str>,
    remember_me: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    two_factor_required: bool,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Gateway over HTTP, in front of the dashboard's auth endpoints.
pub struct HttpAuthGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.auth_url, config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Map a non-success status to the error taxonomy, capturing the body text.
async fn status_error(resp: reqwest::Response) -> SessionError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    if status == 401 {
        SessionError::Unauthorized(if text.is_empty() { "unauthorized".to_owned() } else { text })
    } else {
        SessionError::Backend { status, message: text }
    }
}

fn net_err(e: reqwest::Error) -> SessionError {
    SessionError::Network(e.to_string())
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn login(&self, credentials: &Credentials) -> Result<LoginReply, SessionError> {
        let body = LoginRequest {
            username: &credentials.username,
            password: &credentials.password,
            two_factor_code: credentials.two_factor_code.as_deref(),
            remember_me: credentials.remember_me,
        };
        let resp = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&body)
            .send()
            .await
            .map_err(net_err)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let status = resp.status().as_u16();
        let reply: LoginResponse = resp.json().await.map_err(net_err)?;
        if reply.two_factor_required {
            return Ok(LoginReply::TwoFactorRequired);
        }
        match (reply.access_token, reply.user) {
            (Some(access_token), Some(user)) => Ok(LoginReply::Granted {
                grant: TokenGrant { access_token, refresh_token: reply.refresh_token },
                user,
            }),
            _ => Err(SessionError::Backend {
                status,
                message: "login response missing token or user".to_owned(),
            }),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, SessionError> {
        let resp = self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(net_err)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        resp.json().await.map_err(net_err)
    }

    async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        let resp = self
            .http
            .post(self.url("/api/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(net_err)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<User, SessionError> {
        let resp = self
            .http
            .get(self.url("/api/auth/me"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(net_err)?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        resp.json().await.map_err(net_err)
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
