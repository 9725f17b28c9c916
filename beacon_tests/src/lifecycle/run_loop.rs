//! Driving the server from a stream of events

use crate::stepper::ServerStepper;
use beacon::hosting::test_utils::MockHostingAdapter;
use beacon::prelude::*;
use tokio::sync::{mpsc, oneshot};
use test_log::test;

#[test(tokio::test)]
async fn test_run_until_platform_shutdown() {
    let ServerStepper {
        mut machine,
        transport,
        mut notifications,
        adapter,
        ..
    } = ServerStepper::with_adapter(MockHostingAdapter::default());
    let adapter = adapter.unwrap();
    machine.start_server(None).await.unwrap();

    let (events, receiver) = mpsc::channel(8);
    let server = tokio::spawn(machine.run(receiver));

    events.send(ServerEvent::ServerStarted).await.unwrap();
    assert_eq!(
        notifications.recv().await.unwrap(),
        ConnectionNotification::Status(ConnectStatus::Success)
    );

    let (respond, response) = oneshot::channel();
    events
        .send(ServerEvent::ApprovalRequested {
            request: ServerStepper::request(1, "p1", true),
            respond,
        })
        .await
        .unwrap();
    assert!(response.await.unwrap().approved);
    transport.connect_client(1);
    events.send(ServerEvent::ClientConnected(1)).await.unwrap();
    assert_eq!(
        notifications.recv().await.unwrap(),
        ConnectionNotification::Event(ConnectionEvent {
            status: ConnectStatus::Success,
            player_name: "p1".to_string(),
        })
    );

    adapter.emit(HostingEvent::ShutdownRequested);
    assert_eq!(server.await.unwrap(), Termination::Shutdown);
    assert_eq!(adapter.shutdown_calls(), 1);
    assert_eq!(
        transport.disconnects(),
        vec![(1, "HostEndedSession".to_string())]
    );
}

#[test(tokio::test)]
async fn test_operator_shutdown_of_local_server_stops_the_loop() {
    let ServerStepper {
        mut machine,
        transport,
        mut notifications,
        ..
    } = ServerStepper::local();
    machine.start_server(None).await.unwrap();

    let (events, receiver) = mpsc::channel(8);
    let server = tokio::spawn(machine.run(receiver));
    events.send(ServerEvent::ServerStarted).await.unwrap();
    assert_eq!(
        notifications.recv().await.unwrap(),
        ConnectionNotification::Status(ConnectStatus::Success)
    );

    // the sender stays alive, like the one held by a transport
    events.send(ServerEvent::ShutdownRequested).await.unwrap();
    assert_eq!(server.await.unwrap(), Termination::Stopped);
    assert!(!transport.is_listening());
    drop(events);
}
