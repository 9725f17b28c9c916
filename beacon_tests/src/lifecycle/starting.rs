//! Starting the transport and choosing between local and dedicated hosting

use crate::stepper::{SERVER_ADDR, ServerStepper};
use beacon::hosting::test_utils::{InitializeOutcome, MockHostingAdapter};
use beacon::prelude::*;
use beacon::server::test_utils::StartBehavior;
use test_log::test;

#[test(tokio::test)]
async fn test_connected_adapter_enters_dedicated_hosting() {
    let mut stepper = ServerStepper::dedicated();
    stepper.start().await.unwrap();

    assert_eq!(stepper.machine.current_state(), StateKind::DedicatedHosting);
    assert_eq!(stepper.transport.listen_address(), Some(SERVER_ADDR));
    assert!(stepper.transport.is_listening());
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::Success]);
    assert_eq!(stepper.adapter().initialize_calls(), 1);
    assert_eq!(stepper.adapter().ready_calls(), 1);
    assert_eq!(stepper.machine.dedicated_phase(), Some(DedicatedPhase::Ready));
}

// an unavailable hosting platform is not an error: the server hosts on its own
#[test(tokio::test)]
async fn test_unavailable_adapter_falls_back_to_hosting() {
    let mut stepper = ServerStepper::with_adapter(MockHostingAdapter::new(InitializeOutcome::Unavailable));
    stepper.start().await.unwrap();

    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    assert_eq!(stepper.machine.dedicated_phase(), None);
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::Success]);
    assert_eq!(stepper.adapter().ready_calls(), 0);
    assert_eq!(stepper.scenes.loaded(), vec!["CharSelect".to_string()]);
}

#[test(tokio::test)]
async fn test_failing_adapter_falls_back_to_hosting() {
    let mut stepper = ServerStepper::with_adapter(MockHostingAdapter::new(InitializeOutcome::Error));
    stepper.start().await.unwrap();

    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::Success]);
    assert_eq!(stepper.adapter().initialize_calls(), 1);
    assert_eq!(stepper.adapter().listener_count(), 0);
}

#[test(tokio::test)]
async fn test_no_adapter_hosts_locally() {
    let mut stepper = ServerStepper::local();
    stepper.start().await.unwrap();

    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::Success]);
    assert_eq!(stepper.scenes.loaded(), vec!["CharSelect".to_string()]);
    assert_eq!(stepper.scenes.last_networked(), Some(true));
}

#[test(tokio::test)]
async fn test_refused_start_is_fatal() {
    let mut stepper = ServerStepper::new(ServerConfig::default(), None, StartBehavior::Refused);

    let err = stepper.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::StartFailed));
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::StartHostFailed]);
    assert_eq!(stepper.transport.shutdown_calls(), 1);
}

#[test(tokio::test)]
async fn test_transport_error_is_fatal() {
    let mut stepper = ServerStepper::new(
        ServerConfig::default(),
        Some(MockHostingAdapter::default()),
        StartBehavior::Error,
    );

    let err = stepper.start().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Transport(_)));
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::StartHostFailed]);
    // the hosting platform is never contacted
    assert_eq!(stepper.adapter().initialize_calls(), 0);
}

#[test(tokio::test)]
async fn test_transport_stopped_while_starting() {
    let mut stepper = ServerStepper::dedicated();
    stepper.machine.start_server(None).await.unwrap();
    assert_eq!(stepper.machine.current_state(), StateKind::StartingServer);

    stepper.machine.on_server_stopped().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::StartHostFailed]);
}

// the hosting adapter finishes initializing after the server already left StartingServer
#[test(tokio::test)]
async fn test_late_initialize_result_is_ignored() {
    let mut stepper = ServerStepper::dedicated();
    stepper.machine.start_server(None).await.unwrap();
    stepper.machine.on_server_started().await;
    stepper.machine.request_shutdown().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);

    stepper.settle().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert_eq!(stepper.adapter().ready_calls(), 0);
    assert!(!stepper.transport.is_listening());
}

#[test(tokio::test)]
async fn test_operator_shutdown_while_offline_is_ignored() {
    let mut stepper = ServerStepper::local();
    stepper.machine.request_shutdown().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(!stepper.machine.is_terminated());
    assert_eq!(stepper.transport.shutdown_calls(), 0);
}

// clients approved during the startup window keep their session in the hosting state
#[test(tokio::test)]
async fn test_approval_while_starting_registers_the_session() {
    let mut stepper = ServerStepper::new(
        ServerConfig::default().with_max_connected_players(0),
        None,
        StartBehavior::Started,
    );
    stepper.machine.start_server(None).await.unwrap();

    // capacity and build type are not checked yet
    let response = stepper
        .machine
        .approval_check(&ServerStepper::request(1, "p1", false));
    assert!(response.approved);
    assert!(response.create_player_object);

    stepper.machine.on_server_started().await;
    stepper.settle().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    stepper.drain_notifications();

    stepper.transport.connect_client(1);
    stepper.machine.on_client_connected(1).await;
    assert_eq!(
        stepper.drain_notifications(),
        vec![ConnectionNotification::Event(ConnectionEvent {
            status: ConnectStatus::Success,
            player_name: "p1".to_string(),
        })]
    );
}

// a start that never reaches a hosting state must not leave approved players behind
#[test(tokio::test)]
async fn test_failed_start_clears_sessions_approved_while_starting() {
    let mut stepper = ServerStepper::local();
    stepper.machine.start_server(None).await.unwrap();
    assert!(
        stepper
            .machine
            .approval_check(&ServerStepper::request(1, "p1", true))
            .approved
    );
    assert!(stepper.sessions.is_duplicate_connection("p1"));

    stepper.machine.on_server_stopped().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(!stepper.sessions.is_duplicate_connection("p1"));
    assert_eq!(stepper.sessions.player_id(1), None);

    stepper.start().await.unwrap();
    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    assert!(stepper.connect(2, "p1").await.approved);
}

#[test(tokio::test)]
async fn test_operator_cancel_while_starting_clears_sessions() {
    let mut stepper = ServerStepper::local();
    stepper.machine.start_server(None).await.unwrap();
    assert!(
        stepper
            .machine
            .approval_check(&ServerStepper::request(1, "p1", true))
            .approved
    );

    stepper.machine.request_shutdown().await;
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert_eq!(stepper.sessions.player_data_by_id("p1"), None);
}
