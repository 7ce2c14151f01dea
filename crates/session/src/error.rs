// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the session subsystem.
//!
//! A 401-equivalent from refresh or current-user means the session is no
//! longer valid — callers must not treat it as transient. Second-factor
//! challenges are a login *outcome*, not an error (see `LoginOutcome`).

use std::fmt;

use crate::claims::DecodeError;

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Transport failure reaching the auth backend. Retry-eligible.
    Network(String),
    /// Invalid credentials, or a rejected/expired token. Not retried.
    Unauthorized(String),
    /// Backend answered with an unexpected status or body.
    Backend { status: u16, message: String },
    /// A token returned by the backend failed to decode. Fatal to the
    /// attempt that produced it; nothing is committed.
    InvalidToken(DecodeError),
    /// An operation that requires an authenticated session ran without one.
    NotAuthenticated,
}

impl SessionError {
    /// HTTP-status-like code for this error kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Network(_) => 503,
            Self::Unauthorized(_) => 401,
            Self::Backend { status, .. } => *status,
            Self::InvalidToken(_) => 502,
            Self::NotAuthenticated => 401,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Backend { .. } => "BACKEND",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
        }
    }

    /// True when the backend has rejected the session itself (as opposed
    /// to a transient transport problem).
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotAuthenticated)
    }

    /// Human-readable detail for UI display.
    pub fn message(&self) -> String {
        match self {
            Self::Network(m) | Self::Unauthorized(m) => m.clone(),
            Self::Backend { status, message } => format!("backend error ({status}): {message}"),
            Self::InvalidToken(e) => format!("received an undecodable token: {e}"),
            Self::NotAuthenticated => "not authenticated".to_owned(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

impl std::error::Error for SessionError {}

impl From<DecodeError> for SessionError {
    fn from(e: DecodeError) -> Self {
        Self::InvalidToken(e)
    }
}
