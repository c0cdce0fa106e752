//! Integration tests for the WebSocket bridge provider.
//!
//! Each test runs a throwaway bridge on a loopback port and scripts the frames it sends.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tiktok_live::{
    BridgeConfig, ControlEvent, LiveError, LiveItem, LiveProvider, WebSocketBridgeProvider,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Start a bridge that accepts one connection and sends `frames` in order.
async fn scripted_bridge(frames: Vec<&'static str>, close: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        for frame in frames {
            ws.send(Message::text(frame)).await.expect("send frame");
        }
        if close {
            let _ = ws.close(None).await;
        }
        // Drain until the client goes away.
        while let Some(Ok(_)) = ws.next().await {}
    });

    format!("ws://{addr}/live/{{username}}")
}

fn provider(url: String) -> WebSocketBridgeProvider {
    let mut config = BridgeConfig::with_url(url);
    config.handshake_timeout = Duration::from_secs(5);
    WebSocketBridgeProvider::new(config)
}

#[tokio::test]
async fn test_receives_comments_until_stream_end() {
    let url = scripted_bridge(
        vec![
            r#"{"type":"connected","room_id":"1"}"#,
            r#"{"type":"comment","user":"bob","comment":"hi"}"#,
            "garbage",
            r#"{"type":"gift","gift_id":5}"#,
            r#"{"type":"comment","user":"carol","comment":"bye"}"#,
            r#"{"type":"stream_end","reason":"host left"}"#,
        ],
        false,
    )
    .await;
    let provider = provider(url);

    let mut conn = provider.connect("alice").await.expect("connect");
    assert!(conn.is_connected);
    assert_eq!(conn.username, "alice");
    assert_eq!(provider.active_connections().await, 1);

    let first = provider.receive(&conn).await.expect("receive");
    match first {
        Some(LiveItem::Comment(c)) => {
            assert_eq!(c.streamer, "alice");
            assert_eq!(c.author, "bob");
            assert_eq!(c.text, "hi");
        }
        other => panic!("expected comment, got {other:?}"),
    }

    assert!(matches!(
        provider.receive(&conn).await.expect("receive"),
        Some(LiveItem::Invalid { .. })
    ));

    match provider.receive(&conn).await.expect("receive") {
        Some(LiveItem::Comment(c)) => assert_eq!(c.text, "bye"),
        other => panic!("expected comment, got {other:?}"),
    }

    assert_eq!(
        provider.receive(&conn).await.expect("receive"),
        Some(LiveItem::Control(ControlEvent::StreamEnded {
            reason: Some("host left".into())
        }))
    );
    assert_eq!(provider.receive(&conn).await.expect("receive"), None);

    provider.disconnect(&mut conn).await.expect("disconnect");
    assert!(!conn.is_connected);
    assert_eq!(provider.active_connections().await, 0);
}

#[tokio::test]
async fn test_close_frame_ends_session() {
    let url = scripted_bridge(
        vec![
            r#"{"type":"connected"}"#,
            r#"{"type":"comment","user":"bob","comment":"hi"}"#,
        ],
        true,
    )
    .await;
    let provider = provider(url);

    let mut conn = provider.connect("alice").await.expect("connect");
    assert!(matches!(
        provider.receive(&conn).await.expect("receive"),
        Some(LiveItem::Comment(_))
    ));
    assert_eq!(provider.receive(&conn).await.expect("receive"), None);
    provider.disconnect(&mut conn).await.expect("disconnect");
}

#[tokio::test]
async fn test_handshake_error_frame_is_reported() {
    let url = scripted_bridge(
        vec![r#"{"type":"error","message":"alice is not live"}"#],
        false,
    )
    .await;
    let provider = provider(url);

    let err = provider.connect("alice").await.expect_err("should fail");
    assert!(matches!(err, LiveError::Connection(_)));
    assert!(err.to_string().contains("not live"));
    assert_eq!(provider.active_connections().await, 0);
}

#[tokio::test]
async fn test_rate_limited_handshake() {
    let url = scripted_bridge(
        vec![r#"{"type":"error","message":"quota exceeded","rate_limited":true}"#],
        false,
    )
    .await;
    let provider = provider(url);

    let err = provider.connect("alice").await.expect_err("should fail");
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn test_http_429_is_rate_limited() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 1024];
        let _ = tokio::io::AsyncReadExt::read(&mut tcp, &mut buf).await;
        let _ = tcp
            .write_all(b"HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;
        let _ = tcp.shutdown().await;
    });

    let provider = provider(format!("ws://{addr}/live/{{username}}"));
    let err = provider.connect("alice").await.expect_err("should fail");
    assert!(err.is_rate_limited(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unreachable_bridge() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        listener.local_addr().expect("local addr")
    };

    let provider = provider(format!("ws://{addr}/live/{{username}}"));
    let err = provider.connect("alice").await.expect_err("should fail");
    assert!(!err.is_rate_limited());
}

/// Start a bridge that accepts any number of connections, confirms each room and
/// then sends `comments` comment frames.
async fn flooding_bridge(comments: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(tcp).await else {
                    return;
                };
                if ws.send(Message::text(r#"{"type":"connected"}"#)).await.is_err() {
                    return;
                }
                for i in 0..comments {
                    let frame = format!(r#"{{"type":"comment","user":"fan","comment":"c{i}"}}"#);
                    if ws.send(Message::text(frame)).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    format!("ws://{addr}/live/{{username}}")
}

#[tokio::test]
async fn test_disconnect_does_not_block_other_sessions() {
    let mut config = BridgeConfig::with_url(flooding_bridge(50).await);
    config.channel_capacity = 1;
    let provider = std::sync::Arc::new(WebSocketBridgeProvider::new(config));

    let mut alice = provider.connect("alice").await.expect("connect alice");
    let bob = provider.connect("bob").await.expect("connect bob");
    // Let both readers fill their buffers and block on the next send.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let disconnecting = {
        let provider = provider.clone();
        tokio::spawn(async move {
            provider.disconnect(&mut alice).await.expect("disconnect alice");
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let item = provider.receive(&bob).await.expect("receive bob");
    assert!(matches!(item, Some(LiveItem::Comment(_))));
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "receive waited {:?}",
        started.elapsed()
    );

    disconnecting.await.unwrap();
    assert_eq!(provider.active_connections().await, 1);
}

#[tokio::test]
async fn test_silent_bridge_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        // Never confirm the room.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut config = BridgeConfig::with_url(format!("ws://{addr}/live/{{username}}"));
    config.handshake_timeout = Duration::from_millis(200);
    let provider = WebSocketBridgeProvider::new(config);

    let err = provider.connect("alice").await.expect_err("should time out");
    assert!(matches!(err, LiveError::Timeout(_)));
}
