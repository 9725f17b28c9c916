//! Hosting governed by a hosting platform

use crate::stepper::ServerStepper;
use beacon::hosting::test_utils::{InitializeOutcome, MockHostingAdapter};
use beacon::prelude::*;
use core::time::Duration;
use test_log::test;

fn allocation(map_name: &str, max_players: i32) -> AllocationData {
    AllocationData {
        game_session_id: "session-1".to_string(),
        map_name: map_name.to_string(),
        max_players,
        ..Default::default()
    }
}

async fn dedicated(adapter: MockHostingAdapter) -> ServerStepper {
    let mut stepper = ServerStepper::with_adapter(adapter);
    stepper.start().await.unwrap();
    assert_eq!(stepper.machine.current_state(), StateKind::DedicatedHosting);
    stepper.drain_notifications();
    stepper
}

#[test(tokio::test(start_paused = true))]
async fn test_health_checks_run_while_dedicated() {
    let adapter = MockHostingAdapter::default().with_health_check_interval(Duration::from_secs(1));
    let mut stepper = dedicated(adapter).await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(stepper.adapter().health_checks(), 3);
}

// readiness is best effort: health checks start anyway
#[test(tokio::test(start_paused = true))]
async fn test_failed_readiness_still_runs_health_checks() {
    let adapter = MockHostingAdapter::default()
        .with_health_check_interval(Duration::from_secs(1))
        .failing_ready();
    let mut stepper = dedicated(adapter).await;
    assert_eq!(stepper.adapter().ready_calls(), 1);
    assert_eq!(stepper.machine.dedicated_phase(), Some(DedicatedPhase::AwaitingReady));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(stepper.adapter().health_checks(), 2);
    assert_eq!(stepper.machine.current_state(), StateKind::DedicatedHosting);
}

#[test(tokio::test(start_paused = true))]
async fn test_failed_health_checks_do_not_change_state() {
    let adapter = MockHostingAdapter::default().with_health_check_interval(Duration::from_secs(1));
    let mut stepper = dedicated(adapter).await;
    stepper.adapter().set_fail_health_check(true);

    tokio::time::sleep(Duration::from_millis(10500)).await;
    stepper.settle().await;
    assert_eq!(stepper.adapter().health_checks(), 10);
    assert_eq!(stepper.machine.current_state(), StateKind::DedicatedHosting);
    assert_eq!(stepper.adapter().shutdown_calls(), 0);
}

#[test(tokio::test(start_paused = true))]
async fn test_no_health_check_after_exit() {
    let adapter = MockHostingAdapter::default().with_health_check_interval(Duration::from_secs(1));
    let mut stepper = dedicated(adapter).await;
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(stepper.adapter().health_checks(), 2);

    stepper.machine.on_server_stopped().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(stepper.adapter().health_checks(), 2);
}

#[test(tokio::test)]
async fn test_allocation_without_metadata_uses_defaults() {
    let adapter = MockHostingAdapter::default().with_allocation(allocation("", 0));
    let mut stepper = dedicated(adapter).await;

    stepper.adapter().emit(HostingEvent::Allocated {
        game_session_id: "session-1".to_string(),
    });
    stepper.settle().await;

    assert_eq!(stepper.adapter().fetch_calls(), 1);
    assert_eq!(stepper.machine.config().max_connected_players, 8);
    assert_eq!(stepper.scenes.loaded(), vec!["CharSelect".to_string()]);
    assert_eq!(stepper.machine.dedicated_phase(), Some(DedicatedPhase::Allocated));
}

#[test(tokio::test)]
async fn test_negative_allocated_capacity_keeps_the_current_one() {
    let adapter = MockHostingAdapter::default().with_allocation(allocation("Arena", -1));
    let mut stepper = dedicated(adapter).await;

    stepper.adapter().emit(HostingEvent::Allocated {
        game_session_id: "session-1".to_string(),
    });
    stepper.settle().await;

    assert_eq!(stepper.machine.config().max_connected_players, 8);
    assert_eq!(stepper.scenes.loaded(), vec!["Arena".to_string()]);
}

#[test(tokio::test)]
async fn test_allocation_applies_capacity_and_map() {
    let adapter = MockHostingAdapter::default().with_allocation(allocation("Arena", 2));
    let mut stepper = dedicated(adapter).await;

    stepper.adapter().emit(HostingEvent::Allocated {
        game_session_id: "session-1".to_string(),
    });
    stepper.settle().await;

    assert_eq!(stepper.machine.config().max_connected_players, 2);
    assert_eq!(stepper.scenes.loaded(), vec!["Arena".to_string()]);
    assert_eq!(stepper.scenes.last_networked(), Some(true));

    // the allocated capacity is enforced
    assert!(stepper.connect(1, "p1").await.approved);
    assert!(stepper.connect(2, "p2").await.approved);
    assert_eq!(
        stepper.connect(3, "p3").await.status(),
        Some(ConnectStatus::ServerFull)
    );
}

// a failed metadata fetch must not block the server from loading a level
#[test(tokio::test)]
async fn test_failed_allocation_fetch_loads_default_scene() {
    let adapter = MockHostingAdapter::default().failing_allocation();
    let mut stepper = dedicated(adapter).await;

    stepper.adapter().emit(HostingEvent::Allocated {
        game_session_id: "session-1".to_string(),
    });
    stepper.settle().await;

    assert_eq!(stepper.machine.config().max_connected_players, 8);
    assert_eq!(stepper.scenes.loaded(), vec!["CharSelect".to_string()]);
    assert_eq!(stepper.machine.current_state(), StateKind::DedicatedHosting);
}

#[test(tokio::test)]
async fn test_platform_shutdown_drains_clients() {
    let mut stepper = dedicated(MockHostingAdapter::default()).await;
    assert!(stepper.connect(1, "p1").await.approved);
    assert!(stepper.connect(2, "p2").await.approved);

    stepper.adapter().emit(HostingEvent::ShutdownRequested);
    stepper.settle().await;

    // last connected first
    assert_eq!(
        stepper.transport.disconnects(),
        vec![
            (2, "HostEndedSession".to_string()),
            (1, "HostEndedSession".to_string())
        ]
    );
    assert_eq!(stepper.adapter().shutdown_calls(), 1);
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(stepper.machine.is_terminated());
    assert_eq!(stepper.adapter().listener_count(), 0);
    // the hosted session is over
    assert_eq!(stepper.sessions.player_data_by_id("p1"), None);
}

#[test(tokio::test)]
async fn test_operator_shutdown_without_clients() {
    let mut stepper = dedicated(MockHostingAdapter::default()).await;

    stepper.machine.request_shutdown().await;
    assert!(stepper.transport.disconnects().is_empty());
    assert_eq!(stepper.adapter().shutdown_calls(), 1);
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(stepper.machine.is_terminated());

    // shutdown is irrevocable and only happens once
    stepper.machine.request_shutdown().await;
    stepper.adapter().emit(HostingEvent::ShutdownRequested);
    stepper.settle().await;
    assert_eq!(stepper.adapter().shutdown_calls(), 1);
    assert_eq!(stepper.transport.shutdown_calls(), 1);
}

#[test(tokio::test)]
async fn test_failed_shutdown_signal_still_goes_offline() {
    let mut stepper = dedicated(MockHostingAdapter::default().failing_shutdown()).await;
    stepper.machine.request_shutdown().await;

    assert_eq!(stepper.adapter().shutdown_calls(), 1);
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(stepper.machine.is_terminated());
}

#[test(tokio::test)]
async fn test_transport_stopped_goes_offline_without_terminating() {
    let mut stepper = dedicated(MockHostingAdapter::default()).await;
    stepper.machine.on_server_stopped().await;

    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::GenericDisconnect]);
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(!stepper.machine.is_terminated());
    assert_eq!(stepper.adapter().shutdown_calls(), 0);

    // platform events raised after the exit reach nobody
    assert_eq!(stepper.adapter().listener_count(), 0);
    stepper.adapter().emit(HostingEvent::Allocated {
        game_session_id: "late".to_string(),
    });
    stepper.settle().await;
    assert_eq!(stepper.adapter().fetch_calls(), 0);
    assert!(stepper.scenes.loaded().is_empty());
}

#[test(tokio::test)]
async fn test_client_without_session_is_disconnected() {
    let mut stepper = dedicated(MockHostingAdapter::default()).await;

    // connected at the transport level without going through approval
    stepper.transport.connect_client(9);
    stepper.machine.on_client_connected(9).await;

    assert_eq!(
        stepper.transport.disconnects(),
        vec![(9, "GenericDisconnect".to_string())]
    );
    assert!(stepper.drain_notifications().is_empty());
}

#[test(tokio::test)]
async fn test_client_connect_and_disconnect_events() {
    let mut stepper = dedicated(MockHostingAdapter::default()).await;
    assert!(stepper.connect(1, "alice").await.approved);
    stepper.disconnect(1).await;

    assert_eq!(
        stepper.drain_notifications(),
        vec![
            ConnectionNotification::Event(ConnectionEvent {
                status: ConnectStatus::Success,
                player_name: "alice".to_string(),
            }),
            ConnectionNotification::Event(ConnectionEvent {
                status: ConnectStatus::GenericDisconnect,
                player_name: "alice".to_string(),
            }),
        ]
    );
    assert!(!stepper.sessions.is_duplicate_connection("alice"));

    // unknown clients are ignored
    stepper.disconnect(42).await;
    assert!(stepper.drain_notifications().is_empty());
}

#[test(tokio::test)]
async fn test_initialize_unavailable_never_subscribes() {
    let mut stepper = ServerStepper::with_adapter(MockHostingAdapter::new(InitializeOutcome::Unavailable));
    stepper.start().await.unwrap();
    assert_eq!(stepper.adapter().emit(HostingEvent::ShutdownRequested), 0);
    stepper.settle().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
}
