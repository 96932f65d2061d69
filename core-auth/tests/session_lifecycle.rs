//! Login, restore, keep-alive and logout against the fake API.

mod common;

use bridge_traits::HttpRequest;
use common::*;
use core_auth::{AuthContext, AuthError, LoginOutcome, SessionKeepAlive, TickOutcome, TokenPair};
use core_runtime::events::{CoreEvent, SessionEvent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn login_then_authenticated_requests_then_logout() {
    let api = FakeApi::new(jwt(NOW + 3600, "login"));
    let config = config_builder(api.clone(), clock()).build().unwrap();
    let context = AuthContext::initialize(config).await.unwrap();
    let session = context.session();
    let mut events = session.event_bus().subscribe();

    assert!(!session.is_authenticated());

    let outcome = session.login("counsel@firm.test", "pw").await.unwrap();
    let LoginOutcome::Authenticated(user) = outcome else {
        panic!("expected direct sign-in");
    };
    assert_eq!(user.id, "42");
    assert_eq!(user.organization_id.as_deref(), Some("org-7"));
    assert!(session.is_authenticated());
    assert_eq!(session.current_user(), Some(user));

    let body: serde_json::Value = context.client().get_json("/cases").await.unwrap();
    assert_eq!(body["path"], "/cases");
    assert_eq!(
        bearer_of(&api.requests_to("/cases")[0]),
        Some(api.accepted_token())
    );

    session.logout().await.unwrap();
    assert!(!session.is_authenticated());
    assert!(session.current_user().is_none());

    let err = context.client().get_json::<serde_json::Value>("/cases").await;
    assert!(err.is_err(), "cached response must not outlive the session");

    let mut seen = Vec::new();
    while let Ok(CoreEvent::Session(event)) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen.first(),
        Some(&SessionEvent::LoggedIn {
            user_id: "42".into(),
            email: "counsel@firm.test".into()
        })
    );
    assert!(seen.contains(&SessionEvent::LoggedOut {
        redirect_to: "/login".into()
    }));
}

#[tokio::test]
async fn mfa_login_completes_with_code() {
    let api = FakeApi::new(jwt(NOW + 3600, "mfa"));
    let context = AuthContext::new(config_builder(api.clone(), clock()).build().unwrap());
    let session = context.session();

    let outcome = session.login("counsel@firm.test", "mfa").await.unwrap();
    assert_eq!(
        outcome,
        LoginOutcome::MfaRequired {
            email: "counsel@firm.test".into()
        }
    );
    assert!(!session.is_authenticated());

    let err = session.verify_mfa_code("counsel@firm.test", "000000").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials("Invalid verification code".into()));

    let user = session.verify_mfa_code("counsel@firm.test", "123456").await.unwrap();
    assert_eq!(user.display_name(), "Ada Lovelace");
    assert!(session.is_authenticated());
    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test]
async fn is_authenticated_is_local_and_checks_expiry() {
    let api = FakeApi::new("unused");
    let clock = clock();
    let context = AuthContext::new(config_builder(api.clone(), clock.clone()).build().unwrap());
    let session = context.session();
    let store = session.token_store();

    assert!(!session.is_authenticated());

    for malformed in ["opaque-token", "a.b", "a..c", "x.bm90LWpzb24.z"] {
        store
            .set_tokens(&TokenPair::new(malformed, "refresh-1"))
            .await
            .unwrap();
        assert!(!session.is_authenticated(), "{} must not authenticate", malformed);
    }

    store
        .set_tokens(&TokenPair::new(jwt(NOW - 1, "old"), "refresh-1"))
        .await
        .unwrap();
    assert!(!session.is_authenticated());

    store
        .set_tokens(&TokenPair::new(jwt(NOW + 30, "live"), "refresh-1"))
        .await
        .unwrap();
    assert!(session.is_authenticated());

    clock.advance(chrono::Duration::seconds(30));
    assert!(!session.is_authenticated());

    assert_eq!(api.total_requests(), 0);
}

#[tokio::test]
async fn restore_picks_up_a_persisted_session() {
    let api = FakeApi::new(jwt(NOW + 3600, "persisted"));
    let store = Arc::new(bridge_desktop::MemorySecureStore::new());

    let first = AuthContext::new(
        config_builder(api.clone(), clock())
            .secure_store(store.clone())
            .build()
            .unwrap(),
    );
    first.session().login("counsel@firm.test", "pw").await.unwrap();

    let second = AuthContext::initialize(
        config_builder(api.clone(), clock())
            .secure_store(store)
            .build()
            .unwrap(),
    )
    .await
    .unwrap();

    assert!(second.session().is_authenticated());
    assert_eq!(
        second.session().current_user().map(|u| u.email),
        Some("counsel@firm.test".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn keepalive_refreshes_ahead_of_expiry() {
    let expiring = jwt(NOW + 200, "expiring");
    let api = FakeApi::new(expiring.clone());
    let context = signed_in(api.clone(), expiring).await;
    let new_token = api.next_access_token();

    let keepalive = context.start_keepalive();
    assert!(keepalive.is_running());

    tokio::time::sleep(Duration::from_secs(119)).await;
    assert_eq!(api.refresh_calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_until(|| context.session().access_token() == Some(new_token.clone())).await;

    assert_eq!(api.refresh_calls(), 1);
    assert!(context.session().is_authenticated());

    context
        .client()
        .execute(HttpRequest::get(url("/cases")))
        .await
        .unwrap();
    assert_eq!(bearer_of(&api.requests_to("/cases")[0]), Some(new_token));
    assert_eq!(api.refresh_calls(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.refresh_calls(), 1, "fresh token needs no further refresh");

    keepalive.stop();
    assert!(!keepalive.is_running());
}

#[tokio::test]
async fn context_without_restore_reads_stored_session_on_first_use() {
    let api = FakeApi::new(jwt(NOW + 3600, "persisted"));
    let store = Arc::new(bridge_desktop::MemorySecureStore::new());

    let first = AuthContext::new(
        config_builder(api.clone(), clock())
            .secure_store(store.clone())
            .build()
            .unwrap(),
    );
    first.session().login("counsel@firm.test", "pw").await.unwrap();

    let second = AuthContext::new(
        config_builder(api.clone(), clock())
            .secure_store(store)
            .build()
            .unwrap(),
    );
    let response = second
        .client()
        .execute(HttpRequest::get(url("/cases")))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        bearer_of(&api.requests_to("/cases")[0]),
        Some(jwt(NOW + 3600, "persisted"))
    );
    assert!(second.session().is_authenticated());
    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test]
async fn keepalive_recovers_a_session_whose_access_token_lapsed() {
    let api = FakeApi::new("never-matches");
    let context = signed_in(api.clone(), jwt(NOW - 8 * 3600, "overnight")).await;
    let new_token = api.next_access_token();
    let mut events = context.session().event_bus().subscribe();

    let keepalive = SessionKeepAlive::new(context.session().clone(), context.coordinator().clone());
    assert_eq!(keepalive.tick().await, TickOutcome::Refreshed);

    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(context.session().access_token(), Some(new_token));
    assert!(context.session().is_authenticated());
    while let Ok(event) = events.try_recv() {
        assert!(!event.requires_logout(), "unexpected {:?}", event);
    }
}
