// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side session lifecycle for the berth dashboard: token claim
//! decoding, durable remember-me storage, an auth backend gateway, a
//! proactive refresh timer, and the session state store that ties them
//! together.

pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod persist;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::SessionError;
pub use gateway::{AuthGateway, Credentials, HttpAuthGateway, LoginReply, TokenGrant, User};
pub use persist::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use scheduler::RefreshScheduler;
pub use store::{LoginOptions, LoginOutcome, SessionMessage, SessionState, SessionStore};
