//! Integration tests for the command relay.

use std::fs;
use std::time::{Duration, Instant};

use serial_test::serial;
use server_warden::orchestrator::relay::{self, RelayExit};
use server_warden::orchestrator::{supervise, Completion, Supervisor};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{exists, Fixture, ARCH, ECHO_SERVER, SLOW_SERVER};

#[tokio::test]
#[serial]
async fn control_word_ends_relay_after_forwarding() {
    let fixture = Fixture::with_server(ECHO_SERVER);
    let mut supervisor =
        Supervisor::new(&fixture.config, fixture.layout(), CancellationToken::new());
    supervisor.start().await.expect("server starts");

    let (tx, rx) = mpsc::channel(8);
    tx.send(b"  say hello ".to_vec()).await.unwrap();
    tx.send(b"QUIT".to_vec()).await.unwrap();
    tx.send(b"quit".to_vec()).await.unwrap();
    tx.send(b"never forwarded".to_vec()).await.unwrap();

    let exit = relay::run(&mut supervisor, rx).await;
    assert_eq!(exit, RelayExit::ControlWord("quit".into()));

    let status = supervisor.wait_child().await.expect("server exits");
    assert!(status.success());
    assert_eq!(fixture.received(), vec!["  say hello ", "QUIT", "quit"]);
}

#[tokio::test]
#[serial]
async fn relay_ends_when_server_exits() {
    let fixture = Fixture::with_server("#!/bin/sh\nsleep 0.3\nexit 0\n");
    let mut supervisor =
        Supervisor::new(&fixture.config, fixture.layout(), CancellationToken::new());
    supervisor.start().await.expect("server starts");

    // Input stays open; only the server exit ends the loop.
    let (_tx, rx) = mpsc::channel(8);
    let exit = relay::run(&mut supervisor, rx).await;

    assert_eq!(exit, RelayExit::ChildExited);
    assert!(supervisor.input_active());
}

#[tokio::test]
#[serial]
async fn input_eof_keeps_supervisor_running_until_server_exits() {
    let fixture = Fixture::with_server("#!/bin/sh\nsleep 0.5\nexit 3\n");
    let (tx, rx) = mpsc::channel(1);
    drop(tx);

    let started = Instant::now();
    let completion = supervise(&fixture.config, ARCH, rx, CancellationToken::new())
        .await
        .expect("supervision completes");

    assert!(started.elapsed() >= Duration::from_millis(400));
    match completion {
        Completion::Exited(status) => assert_eq!(status.code(), Some(3)),
        other => panic!("expected server exit, got {other:?}"),
    }
    assert_eq!(completion.exit_code(), 3);
}

#[tokio::test]
#[serial]
async fn cancellation_preempts_idle_relay() {
    let fixture = Fixture::with_server(ECHO_SERVER);
    let cancel = CancellationToken::new();
    let mut supervisor = Supervisor::new(&fixture.config, fixture.layout(), cancel.clone());
    supervisor.start().await.expect("server starts");

    let (_tx, rx) = mpsc::channel(8);
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let exit = relay::run(&mut supervisor, rx).await;

    assert_eq!(exit, RelayExit::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(supervisor.is_child_alive(), "relay never stops the server itself");
}

#[tokio::test]
#[serial]
async fn invalid_utf8_line_does_not_stop_forwarding() {
    let fixture = Fixture::with_server(ECHO_SERVER);
    let (tx, rx) = mpsc::channel(8);
    tx.send(b"say caf\xe9".to_vec()).await.unwrap();
    tx.send(b"say hello".to_vec()).await.unwrap();
    tx.send(b"shutdown".to_vec()).await.unwrap();

    let completion = supervise(&fixture.config, ARCH, rx, CancellationToken::new())
        .await
        .expect("supervision completes");
    drop(tx);

    assert!(matches!(completion, Completion::Exited(status) if status.success()));
    assert_eq!(
        fixture.received_bytes(),
        vec![b"say caf\xe9".to_vec(), b"say hello".to_vec(), b"shutdown".to_vec()]
    );
}

#[tokio::test]
#[serial]
async fn relayed_shutdown_exits_zero_and_persists() {
    let fixture = Fixture::with_server(SLOW_SERVER);
    fixture.seed_state();
    let (tx, rx) = mpsc::channel(8);
    tx.send(b"shutdown".to_vec()).await.unwrap();

    let completion = supervise(&fixture.config, ARCH, rx, CancellationToken::new())
        .await
        .expect("supervision completes");
    drop(tx);

    assert!(matches!(completion, Completion::Exited(status) if status.success()));
    assert_eq!(completion.exit_code(), 0);

    let dest = fixture.destination();
    assert_eq!(fs::read(dest.join("state.db")).unwrap(), b"state-v1");
    assert_eq!(fs::read(dest.join("accounts.db")).unwrap(), b"accounts-v1");
    assert_eq!(
        fs::read(dest.join("db").join("CURRENT")).unwrap(),
        b"MANIFEST-000001"
    );
    assert_eq!(
        fs::read(dest.join("db").join("regions").join("r.0.0")).unwrap(),
        b"region"
    );
    assert!(!exists(&fixture.layout().channel_path));
}
