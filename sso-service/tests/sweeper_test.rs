//! Expiration sweeping and session timeout.

mod common;

use chrono::{Duration, Utc};
use common::{cas, with_attributes, TestSso, APP};
use sso_service::services::TicketError;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn sweep_removes_expired_service_tickets() {
    let t = TestSso::new();
    let (_, tgt) = t.login().await;
    let st = t.service_ticket(&tgt, APP).await;

    let later = Utc::now() + Duration::seconds(t.config.tickets.st_ttl_seconds);
    let report = t.sso.sweeper().sweep_once(later).await;

    assert_eq!(report.removed_tickets, 1);
    assert_eq!(report.sessions_logged_out, 0);
    assert!(t.sso.registry().get(&st).is_none());
    assert!(t.sso.registry().get(&tgt).is_some());
}

#[tokio::test]
async fn expired_ticket_granting_ticket_logs_session_out() {
    let t = TestSso::new();
    let (session_id, tgt) = t.login().await;
    let st = t.service_ticket(&tgt, APP).await;
    t.sso.validate(&cas(APP, &st), &with_attributes()).await.unwrap();

    let hard_limit = t.config.tickets.tgt_hard_limit_seconds.unwrap();
    let later = Utc::now() + Duration::seconds(hard_limit);
    let report = t.sso.sweeper().sweep_once(later).await;

    assert_eq!(report.sessions_logged_out, 1);
    assert_eq!(report.sessions_purged, 1);
    assert_eq!(t.notifier.calls_for(APP), 1);
    assert!(t.sso.registry().is_empty());

    // Purged from memory and from the store.
    assert!(t.sso.sessions().get(&session_id).await.is_none());
    assert_eq!(t.store.session_count(), 0);
}

#[tokio::test]
async fn timed_out_sessions_leave_the_store() {
    let t = TestSso::new();
    for _ in 0..5 {
        t.login().await;
    }
    assert_eq!(t.store.session_count(), 5);

    let hard_limit = t.config.tickets.tgt_hard_limit_seconds.unwrap();
    let later = Utc::now() + Duration::seconds(hard_limit);
    let report = t.sso.sweeper().sweep_once(later).await;

    assert_eq!(report.removed_tickets, 5);
    assert_eq!(report.sessions_logged_out, 5);
    assert_eq!(report.sessions_purged, 5);
    assert!(t.sso.sessions().is_empty());
    assert_eq!(t.store.session_count(), 0);
}

#[tokio::test]
async fn background_sweeper_times_sessions_out() {
    let mut config = common::test_config();
    config.registry.sweep_interval_seconds = 1;
    config.tickets.tgt_ttl_seconds = 1;
    config.tickets.tgt_hard_limit_seconds = Some(1);
    let t = TestSso::with_config(config);
    let (session_id, tgt) = t.login().await;
    let st = t.service_ticket(&tgt, APP).await;
    t.sso.validate(&cas(APP, &st), &with_attributes()).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = t.sso.spawn_sweeper(shutdown.clone());

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

    assert!(t.sso.registry().get(&tgt).is_none());
    assert_eq!(t.notifier.calls_for(APP), 1);
    assert!(t.sso.sessions().get(&session_id).await.is_none());
    assert_eq!(t.store.session_count(), 0);

    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}

#[tokio::test]
async fn sweep_after_explicit_logout_is_quiet() {
    let t = TestSso::new();
    let (session_id, _) = t.login().await;
    t.sso.logout(&session_id).await.unwrap();

    let report = t.sso.sweeper().sweep_once(Utc::now()).await;
    assert_eq!(report.removed_tickets, 0);
    assert_eq!(report.sessions_logged_out, 0);
    assert_eq!(report.sessions_purged, 1);
}

#[tokio::test]
async fn background_sweeper_stops_on_cancel() {
    let mut config = common::test_config();
    config.registry.sweep_interval_seconds = 1;
    config.tickets.st_ttl_seconds = 1;
    let t = TestSso::with_config(config);
    let (_, tgt) = t.login().await;
    let st = t.service_ticket(&tgt, APP).await;

    let shutdown = CancellationToken::new();
    let handle = t.sso.spawn_sweeper(shutdown.clone());

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert!(t.sso.registry().get(&st).is_none());

    let result = t.sso.validate(&cas(APP, &st), &with_attributes()).await.unwrap();
    assert_eq!(result.ticket_error(), Some(TicketError::NotFound));

    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}
