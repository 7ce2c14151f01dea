// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token claim decoding (no signature verification).
//!
//! The backend signs and verifies tokens; this side only needs the expiry
//! and subject claims to drive refresh scheduling. Any malformed token is
//! treated as already expired rather than surfaced as a crash.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::fmt;

/// Claims read from a bearer token's payload segment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Expiry as epoch seconds. Required — decoding fails closed without it.
    pub exp: u64,
    /// Subject (user identifier), if present.
    #[serde(default)]
    pub sub: Option<String>,
    /// Issued-at as epoch seconds, if present.
    #[serde(default)]
    pub iat: Option<u64>,
}

/// Why a token failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not three dot-separated segments, or the payload is not base64url.
    Malformed,
    /// Payload decoded but is not a JSON claims object.
    BadPayload,
    /// Claims parsed but the required `exp` claim is absent.
    MissingExpiry,
}

impl DecodeError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "MALFORMED_TOKEN",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::MissingExpiry => "MISSING_EXPIRY",
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DecodeError {}

/// Raw payload shape — `exp` optional here so its absence maps to
/// [`DecodeError::MissingExpiry`] instead of a generic parse error.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iat: Option<u64>,
}

/// Decode the payload segment of a bearer token.
pub fn decode(token: &str) -> Result<Claims, DecodeError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(DecodeError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| DecodeError::Malformed)?;
    let raw: RawClaims = serde_json::from_slice(&bytes).map_err(|_| DecodeError::BadPayload)?;
    let exp = raw.exp.ok_or(DecodeError::MissingExpiry)?;

    Ok(Claims { exp, sub: raw.sub, iat: raw.iat })
}

/// Expiry of a token as epoch seconds; `None` if the token does not decode.
pub fn expiry_of(token: &str) -> Option<u64> {
    decode(token).ok().map(|c| c.exp)
}

/// True when `expiry` is within `window_secs` of `now` (or already past).
pub fn is_within_window(expiry: u64, window_secs: u64, now: u64) -> bool {
    expiry.saturating_sub(now) <= window_secs
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
