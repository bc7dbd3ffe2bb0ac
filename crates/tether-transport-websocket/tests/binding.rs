//! ConnectionBinding end to end over a real WebSocket handshake.

use serde_json::{Value, json};
use tether_core::{BindingConfig, ConnectionBinding, RequestError, RpcHandler};
use tether_transport_websocket::WebSocketTransport;
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;

async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
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

fn bind(ws: WebSocketStream<DuplexStream>) -> ConnectionBinding {
    let parts = WebSocketTransport::from_stream(ws);
    tokio::spawn(parts.driver);
    ConnectionBinding::with_config(parts.handle, BindingConfig::default())
}

#[tokio::test]
async fn test_request_over_websocket() {
    let (client, server) = ws_pair().await;
    let client = bind(client);
    let server = bind(server);

    let echo = RpcHandler::new(|args: Vec<Value>| async move { Ok(json!({ "echo": args })) });
    let _ = server.channel().of("svc").on("echo", &echo);

    let reply = client
        .channel()
        .of("svc")
        .request("echo", vec![json!("hi"), json!(2)])
        .await;
    assert_eq!(reply, Ok(json!({ "echo": ["hi", 2] })));
    assert!(client.pending_ids().is_empty());
}

#[tokio::test]
async fn test_unhandled_request_times_out() {
    let (client, server) = ws_pair().await;
    let client = ConnectionBinding::with_config(
        {
            let parts = WebSocketTransport::from_stream(client);
            tokio::spawn(parts.driver);
            parts.handle
        },
        BindingConfig::default().with_request_timeout(std::time::Duration::from_millis(50)),
    );
    let _server = bind(server);

    let reply = client.send_request("nobody/home", vec![]).await;
    assert!(matches!(reply, Err(RequestError::Timeout { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_sent_before_server_binding_exists() {
    let (client, server) = ws_pair().await;
    let client = ConnectionBinding::with_config(
        {
            let parts = WebSocketTransport::from_stream(client);
            tokio::spawn(parts.driver);
            parts.handle
        },
        BindingConfig::default().with_request_timeout(std::time::Duration::from_secs(5)),
    );

    // The server's driver runs before anything is bound to its handle.
    let server_parts = WebSocketTransport::from_stream(server);
    tokio::spawn(server_parts.driver);

    let pending = client.send_request("ping", vec![json!(1)]);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Handlers go in before binding so the replayed request finds them.
    let server = ConnectionBinding::unbound(BindingConfig::default());
    let ping = RpcHandler::new(|_args| async { Ok(json!({ "pong": true })) });
    let _ = server.on("ping", &ping);
    server.rebind(server_parts.handle);

    assert_eq!(pending.await, Ok(json!({ "pong": true })));
}
