//! Hosting without a hosting platform

use crate::stepper::ServerStepper;
use beacon::prelude::*;
use test_log::test;

async fn hosting() -> ServerStepper {
    let mut stepper = ServerStepper::local();
    stepper.start().await.unwrap();
    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    stepper.drain_notifications();
    stepper
}

#[test(tokio::test)]
async fn test_operator_shutdown_ends_the_session() {
    let mut stepper = hosting().await;
    assert!(stepper.connect(1, "p1").await.approved);
    assert!(stepper.connect(2, "p2").await.approved);
    assert!(stepper.connect(3, "p3").await.approved);

    stepper.machine.request_shutdown().await;
    assert_eq!(
        stepper.transport.disconnects(),
        vec![
            (3, "HostEndedSession".to_string()),
            (2, "HostEndedSession".to_string()),
            (1, "HostEndedSession".to_string()),
        ]
    );
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    // only a dedicated server stops the process
    assert!(!stepper.machine.is_terminated());
    assert_eq!(stepper.sessions.connected_players(), 0);

    // and the server can be started again
    stepper.start().await.unwrap();
    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
    assert_eq!(stepper.transport.start_calls(), 2);
}

#[test(tokio::test)]
async fn test_transport_stopped() {
    let mut stepper = hosting().await;
    stepper.machine.on_server_stopped().await;

    assert_eq!(stepper.drain_statuses(), vec![ConnectStatus::GenericDisconnect]);
    assert_eq!(stepper.machine.current_state(), StateKind::Offline);
    assert!(!stepper.transport.is_listening());
}

#[test(tokio::test)]
async fn test_start_is_refused_while_hosting() {
    let mut stepper = hosting().await;
    let err = stepper.machine.start_server(None).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidState(StateKind::Hosting)));
    assert_eq!(stepper.machine.current_state(), StateKind::Hosting);
}

// a player whose client dropped during a game session recovers its data when it reconnects
#[test(tokio::test)]
async fn test_reconnection_during_game_session() {
    let mut stepper = hosting().await;
    assert!(stepper.connect(1, "p1").await.approved);
    stepper.sessions.on_session_started();

    stepper.disconnect(1).await;
    stepper.transport.connect_client(5);
    let response = stepper
        .machine
        .approval_check(&ApprovalRequest::new(5, ServerStepper::payload("p1", "renamed", true)));
    assert!(response.approved);
    stepper.machine.on_client_connected(5).await;

    let notifications = stepper.drain_notifications();
    assert_eq!(
        notifications.last(),
        Some(&ConnectionNotification::Event(ConnectionEvent {
            status: ConnectStatus::Success,
            player_name: "p1".to_string(),
        }))
    );
}
