// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session lifecycle scenarios against a scripted gateway.

use std::sync::Arc;
use std::time::Duration;

use berth_session::{
    Clock, FileTokenStore, LoginOptions, LoginOutcome, SessionError, SessionMessage,
    SessionStore, TokenGrant, TokenStore,
};

use berth_specs::{grant_reply, mint_token, rig, settle, test_user, T0};

#[tokio::test(start_paused = true)]
async fn proactive_refresh_fires_at_the_safety_margin() -> anyhow::Result<()> {
    let r = rig();
    // Token lives 900s; with a 300s margin the timer must fire at +600.
    r.gateway.push_login(Ok(grant_reply(T0 + 900, "rt-1")));
    r.store.login("amy", "hunter2", LoginOptions::default()).await?;

    r.gateway.push_refresh(Ok(TokenGrant {
        access_token: mint_token(T0 + 1_800),
        refresh_token: Some("rt-2".to_owned()),
    }));

    tokio::time::advance(Duration::from_secs(599)).await;
    settle().await;
    assert_eq!(r.gateway.refresh_calls(), 0, "must not fire early");

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(r.gateway.refresh_calls(), 1);

    let st = r.store.snapshot();
    assert!(st.is_authenticated());
    assert_eq!(st.session_expiry, Some(T0 + 1_800));
    assert_eq!(st.refresh_token.as_deref(), Some("rt-2"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn two_factor_flow_commits_only_on_completion() -> anyhow::Result<()> {
    let r = rig();
    r.gateway.push_login(Ok(berth_session::LoginReply::TwoFactorRequired));

    let opts = LoginOptions { remember_me: true, ..LoginOptions::default() };
    let outcome = r.store.login("amy", "hunter2", opts).await?;
    assert_eq!(outcome, LoginOutcome::TwoFactorRequired);

    // Challenge state: pending flag only, zero committed artifacts.
    let st = r.store.snapshot();
    assert!(st.two_factor_pending);
    assert!(!st.is_authenticated());
    assert_eq!(st.access_token, None);
    assert_eq!(st.refresh_token, None);
    assert_eq!(r.tokens.load()?, None);
    assert!(!r.store.is_refresh_scheduled());

    r.gateway.push_login(Ok(grant_reply(T0 + 900, "rt-1")));
    let opts = LoginOptions { two_factor_code: Some("123456".to_owned()), remember_me: true };
    assert_eq!(r.store.login("amy", "hunter2", opts).await?, LoginOutcome::LoggedIn);

    let st = r.store.snapshot();
    assert!(!st.two_factor_pending);
    assert!(st.is_authenticated());
    assert_eq!(r.tokens.load()?, Some("rt-1".to_owned()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_refresh_tears_the_session_down() -> anyhow::Result<()> {
    let r = rig();
    r.gateway.push_login(Ok(grant_reply(T0 + 900, "rt-1")));
    let opts = LoginOptions { remember_me: true, ..LoginOptions::default() };
    r.store.login("amy", "hunter2", opts).await?;
    assert_eq!(r.tokens.load()?, Some("rt-1".to_owned()));

    r.gateway.push_refresh(Err(SessionError::Unauthorized("token revoked".to_owned())));
    tokio::time::advance(Duration::from_secs(600)).await;
    settle().await;

    let st = r.store.snapshot();
    assert!(!st.is_authenticated());
    assert_eq!(st.access_token, None);
    assert_eq!(st.refresh_token, None);
    assert!(matches!(st.error, Some(SessionMessage::SessionExpired { .. })));
    assert_eq!(r.tokens.load()?, None, "durable token cleared in the same teardown");
    assert!(!r.store.is_refresh_scheduled());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn logout_leaves_no_timer_behind() -> anyhow::Result<()> {
    let r = rig();
    r.gateway.push_login(Ok(grant_reply(T0 + 900, "rt-1")));
    let opts = LoginOptions { remember_me: true, ..LoginOptions::default() };
    r.store.login("amy", "hunter2", opts).await?;
    assert!(r.store.is_refresh_scheduled());

    r.store.logout().await;
    assert_eq!(r.gateway.logout_calls(), 1);
    assert_eq!(r.tokens.load()?, None);

    // Well past the old fire instant: the cancelled timer stays silent.
    tokio::time::advance(Duration::from_secs(7_200)).await;
    settle().await;
    assert_eq!(r.gateway.refresh_calls(), 0);
    assert!(!r.store.snapshot().is_authenticated());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_is_single_flight() -> anyhow::Result<()> {
    let r = rig();
    r.gateway.push_login(Ok(grant_reply(T0 + 900, "rt-1")));
    r.store.login("amy", "hunter2", LoginOptions::default()).await?;

    r.gateway.set_refresh_delay(Duration::from_secs(1));
    r.gateway.push_refresh(Ok(TokenGrant {
        access_token: mint_token(T0 + 1_800),
        refresh_token: Some("rt-2".to_owned()),
    }));

    let a = r.store.clone();
    let b = r.store.clone();
    let c = r.store.clone();
    tokio::join!(a.refresh(), b.refresh(), c.refresh());

    assert_eq!(r.gateway.refresh_calls(), 1, "concurrent callers must coalesce");
    assert!(!r.store.snapshot().is_refreshing);
    assert_eq!(r.store.snapshot().refresh_token.as_deref(), Some("rt-2"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remembered_session_survives_a_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("refresh_token.json");

    // First run: remember-me login persists the refresh token to disk.
    {
        let gateway = Arc::new(berth_specs::ScriptedGateway::default());
        gateway.push_login(Ok(grant_reply(T0 + 900, "rt-disk")));
        let store = SessionStore::new(
            gateway.clone(),
            Arc::new(berth_session::ManualClock::at(T0)),
            Arc::new(FileTokenStore::new(&path)),
            Duration::from_secs(300),
        );
        let opts = LoginOptions { remember_me: true, ..LoginOptions::default() };
        store.login("amy", "hunter2", opts).await?;
    }
    assert!(path.exists());

    // Second run: a fresh store rehydrates from the same file.
    let gateway = Arc::new(berth_specs::ScriptedGateway::default());
    gateway.push_refresh(Ok(TokenGrant {
        access_token: mint_token(T0 + 900),
        refresh_token: Some("rt-disk-2".to_owned()),
    }));
    gateway.push_user(Ok(test_user()));
    let store = SessionStore::new(
        gateway.clone(),
        Arc::new(berth_session::ManualClock::at(T0)),
        Arc::new(FileTokenStore::new(&path)),
        Duration::from_secs(300),
    );
    store.init().await;

    let st = store.snapshot();
    assert!(st.is_authenticated());
    assert_eq!(st.user, Some(test_user()));
    assert_eq!(st.refresh_token.as_deref(), Some("rt-disk-2"));
    assert!(store.is_refresh_scheduled());

    // The rotated token is what landed on disk.
    let file_store = FileTokenStore::new(&path);
    assert_eq!(file_store.load()?, Some("rt-disk-2".to_owned()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expiry_is_derived_from_the_token_not_the_server_clock() -> anyhow::Result<()> {
    let r = rig();
    r.gateway.push_login(Ok(grant_reply(T0 + 450, "rt-1")));
    r.store.login("amy", "hunter2", LoginOptions::default()).await?;

    let st = r.store.snapshot();
    assert_eq!(st.session_expiry, Some(T0 + 450));
    assert_eq!(st.expires_in_secs(r.clock.now()), Some(450));

    r.clock.advance(450);
    assert!(r.store.is_session_expired().await);
    Ok(())
}
