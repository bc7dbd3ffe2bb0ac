//! tether-transport-websocket: WebSocket transport for tether.
//!
//! Adapts a `tokio-tungstenite` stream to the [`Transport`](tether_core::Transport)
//! contract. Text frames carry the wire messages; binary frames holding valid
//! UTF-8 are accepted too. Ping and pong are handled by tungstenite and never
//! surface.
//!
//! Client side, [`WebSocketTransport::connect`] performs the handshake in the
//! background. Server side, [`WebSocketTransport::from_stream`] wraps an
//! accepted socket and hands back the driver to spawn.

#![forbid(unsafe_code)]

mod handle;

pub use handle::*;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tether_core::{ReadyState, Transport, TransportEvents};
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn raw_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client_stream, server_stream) = tokio::io::duplex(65536);
        tokio::join!(
            async {
                tokio_tungstenite::client_async("ws://localhost/", client_stream)
                    .await
                    .expect("client handshake failed")
                    .0
            },
            async {
                tokio_tungstenite::accept_async(server_stream)
                    .await
                    .expect("server handshake failed")
            }
        )
    }

    fn spawn(ws: WebSocketStream<DuplexStream>) -> WebSocketTransport {
        let parts = WebSocketTransport::from_stream(ws);
        tokio::spawn(parts.driver);
        parts.handle
    }

    enum Seen {
        Message(String),
        Error,
        Close,
    }

    fn observe(transport: &WebSocketTransport) -> mpsc::UnboundedReceiver<Seen> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (on_message, on_error, on_close) = (tx.clone(), tx.clone(), tx);
        transport.attach(TransportEvents {
            on_message: Box::new(move |text| {
                let _ = on_message.send(Seen::Message(text));
            }),
            on_error: Box::new(move |_| {
                let _ = on_error.send(Seen::Error);
            }),
            on_close: Box::new(move || {
                let _ = on_close.send(Seen::Close);
            }),
            ..TransportEvents::noop()
        });
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport events dropped")
    }

    #[tokio::test]
    async fn test_text_round_trip() {
        let (client, server) = raw_pair().await;
        let a = spawn(client);
        let b = spawn(server);
        assert_eq!(a.ready_state(), ReadyState::Open);

        let mut seen = observe(&b);
        a.send(r#"{"a":["hello"]}"#).unwrap();
        a.send(r#"{"a":["again"]}"#).unwrap();

        match next(&mut seen).await {
            Seen::Message(text) => assert_eq!(text, r#"{"a":["hello"]}"#),
            _ => panic!("expected a message"),
        }
        match next(&mut seen).await {
            Seen::Message(text) => assert_eq!(text, r#"{"a":["again"]}"#),
            _ => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn test_binary_utf8_accepted_and_control_frames_skipped() {
        let (mut client, server) = raw_pair().await;
        let b = spawn(server);
        let mut seen = observe(&b);

        client.send(WsMessage::Ping(vec![1, 2].into())).await.unwrap();
        client
            .send(WsMessage::Binary(vec![0xff, 0xfe].into()))
            .await
            .unwrap();
        client
            .send(WsMessage::Binary(br#"{"a":["bin"]}"#.to_vec().into()))
            .await
            .unwrap();

        match next(&mut seen).await {
            Seen::Message(text) => assert_eq!(text, r#"{"a":["bin"]}"#),
            _ => panic!("expected a message"),
        }

        // Keep reading so tungstenite can flush the pong.
        tokio::spawn(async move { while client.next().await.is_some() {} });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_text_before_attach_is_replayed_in_order() {
        let (mut client, server) = raw_pair().await;
        let b = spawn(server);

        for i in 0..3 {
            client.send(WsMessage::text(format!("early-{i}"))).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut seen = observe(&b);
        client.send(WsMessage::text("late")).await.unwrap();

        for expected in ["early-0", "early-1", "early-2", "late"] {
            match next(&mut seen).await {
                Seen::Message(text) => assert_eq!(text, expected),
                _ => panic!("expected a message"),
            }
        }
    }

    #[tokio::test]
    async fn test_close_reaches_peer() {
        let (client, server) = raw_pair().await;
        let a = spawn(client);
        let b = spawn(server);
        let mut seen_a = observe(&a);
        let mut seen_b = observe(&b);

        a.close();
        assert_eq!(a.ready_state(), ReadyState::Closing);
        assert!(matches!(next(&mut seen_b).await, Seen::Close));
        assert!(matches!(next(&mut seen_a).await, Seen::Close));
        assert_eq!(a.ready_state(), ReadyState::Closed);
        assert_eq!(b.ready_state(), ReadyState::Closed);
        assert!(a.send("late").is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_and_close() {
        let transport = WebSocketTransport::connect("ws://127.0.0.1:1/");
        let mut seen = observe(&transport);
        assert!(matches!(next(&mut seen).await, Seen::Error));
        assert!(matches!(next(&mut seen).await, Seen::Close));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }
}
