//! End-to-end scenarios from SPEC_FULL.md's testable-properties section,
//! run against a loopback `TcpListener` standing in for the TLS server
//! (§10.4): `secure=false` skips the TLS handshake so these tests validate
//! the line-framing and command-correlation contract without certificates.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use tmi_rs::{ClientConfig, ClientHandle};

async fn loopback_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept_and_handshake(listener: TcpListener) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Drain CAP REQ, an optional PASS, then NICK before sending the welcome.
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        if line.starts_with("NICK") {
            break;
        }
    }

    write_half
        .write_all(b":tmi.twitch.tv 001 bot :Welcome, GLHF!\r\n")
        .await
        .unwrap();

    (reader, write_half)
}

fn anonymous_config(port: u16) -> ClientConfig {
    ClientConfig::new()
        .with_channels(["#room"])
        .with_connection(|c| {
            c.server = "127.0.0.1".to_string();
            c.port = port;
            c.secure = false;
            c.reconnect = false;
        })
}

#[tokio::test]
async fn chat_dispatch_scenario() {
    let (listener, port) = loopback_server().await;
    let server = tokio::spawn(async move {
        let (_reader, mut writer) = accept_and_handshake(listener).await;
        writer.write_all(b"@badges=broadcaster/1;color=#FF0000;display-name=Alice;user-id=42 :alice!alice@alice.tmi.twitch.tv PRIVMSG #room :hi\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = ClientHandle::connect(anonymous_config(port)).await.unwrap();
    let payload = client
        .wait_for("chat", Duration::from_secs(2))
        .await
        .expect("chat event");
    assert!(!payload.is_self);
    let msg = payload.message.unwrap();
    assert_eq!(msg.channel(), Some("#room"));
    assert_eq!(msg.trailing(), Some("hi"));
    let badges = msg.tag("badges").unwrap().as_badges().unwrap();
    assert_eq!(badges, &[("broadcaster".to_string(), "1".to_string())]);

    server.await.unwrap();
}

#[tokio::test]
async fn action_scenario_strips_ctcp_wrapper() {
    let (listener, port) = loopback_server().await;
    let server = tokio::spawn(async move {
        let (_reader, mut writer) = accept_and_handshake(listener).await;
        writer
            .write_all(b":b!b@b PRIVMSG #room :\x01ACTION waves\x01\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let client = ClientHandle::connect(anonymous_config(port)).await.unwrap();
    let payload = client
        .wait_for("action", Duration::from_secs(2))
        .await
        .expect("action event");
    let msg = payload.message.unwrap();
    assert_eq!(msg.trailing(), Some("waves"));

    server.await.unwrap();
}

#[tokio::test]
async fn ban_success_resolves_command() {
    let (listener, port) = loopback_server().await;
    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept_and_handshake(listener).await;
        let mut line = String::new();
        // wait for the /ban PRIVMSG
        loop {
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            if line.contains("/ban") {
                break;
            }
        }
        writer
            .write_all(b"@msg-id=ban_success :tmi.twitch.tv NOTICE #room :victim is banned.\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let mut config = anonymous_config(port);
    config.identity.username = Some("bot".to_string());
    config.identity.password = Some("oauth:abc123".to_string());
    let client = ClientHandle::connect(config).await.unwrap();
    client.wait_for("connected", Duration::from_secs(2)).await;

    let result = client.commands().ban("#room", "victim", Some("rude")).await;
    assert!(result.is_ok(), "expected ban to succeed, got {result:?}");

    server.await.unwrap();
}

#[tokio::test]
async fn ban_failure_surfaces_msg_id() {
    let (listener, port) = loopback_server().await;
    let server = tokio::spawn(async move {
        let (mut reader, mut writer) = accept_and_handshake(listener).await;
        let mut line = String::new();
        loop {
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            if line.contains("/ban") {
                break;
            }
        }
        writer
            .write_all(b"@msg-id=bad_ban_self :tmi.twitch.tv NOTICE #room :You cannot ban yourself.\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let mut config = anonymous_config(port);
    config.identity.username = Some("bot".to_string());
    config.identity.password = Some("oauth:abc123".to_string());
    let client = ClientHandle::connect(config).await.unwrap();
    client.wait_for("connected", Duration::from_secs(2)).await;

    let err = client
        .commands()
        .ban("#room", "victim", None)
        .await
        .expect_err("expected failure");
    match err {
        tmi_rs::Error::CommandFailed { msg_id, .. } => assert_eq!(msg_id, "bad_ban_self"),
        other => panic!("unexpected error: {other}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn command_times_out_without_a_reply() {
    let (listener, port) = loopback_server().await;
    let server = tokio::spawn(async move {
        let (_reader, _writer) = accept_and_handshake(listener).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut config = anonymous_config(port);
    config.identity.username = Some("bot".to_string());
    config.identity.password = Some("oauth:abc123".to_string());
    config.command_timeout_ms = 100;
    let client = ClientHandle::connect(config).await.unwrap();
    client.wait_for("connected", Duration::from_secs(2)).await;

    let err = client
        .commands()
        .ban("#room", "victim", None)
        .await
        .expect_err("expected timeout");
    assert!(matches!(err, tmi_rs::Error::CommandTimeout));

    server.await.unwrap();
}

