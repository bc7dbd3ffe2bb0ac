//! Namespaced echo over WebSocket.
//!
//! ```text
//! namespaced-echo server            # listen on 127.0.0.1:$TETHER_DEMO_PORT (default 4790)
//! namespaced-echo client            # connect, exercise every channel, exit
//! ```
//!
//! The server answers `echo/say`, `math/add` and `math/div`, and pushes a
//! `clock/tick` event to each client once a second.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tether::prelude::*;
use tether::transport::TransportParts;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "namespaced-echo")]
#[command(about = "tether demo: namespaced events and requests over WebSocket")]
struct Args {
    /// Port to listen on or connect to
    #[arg(long, env = "TETHER_DEMO_PORT", default_value_t = 4790)]
    port: u16,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept WebSocket connections and serve the demo channels
    Server,
    /// Connect once and call every demo endpoint
    Client,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    tether::init_tracing();

    let addr = format!("127.0.0.1:{}", args.port);
    match args.mode {
        Mode::Server => serve(&addr).await,
        Mode::Client => client(&addr).await,
    }
}

async fn serve(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    println!("namespaced-echo server ready on ws://{addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                tokio::spawn(async move {
                    match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => {
                            let TransportParts { handle, driver } = WebSocketTransport::from_stream(ws);
                            let binding = ConnectionBinding::unbound(BindingConfig::from_env());
                            install_handlers(&binding);
                            binding.rebind(handle);
                            let ticker = tokio::spawn(tick(binding.channel().of("clock")));
                            info!(%peer_addr, "client connected");

                            if let Err(err) = driver.await {
                                error!(%err, "connection from {} closed with error", peer_addr);
                            }
                            ticker.abort();
                            info!(%peer_addr, "client disconnected");
                        }
                        Err(err) => {
                            error!(?err, "WebSocket handshake failed for {}", peer_addr);
                        }
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                println!("shutting down");
                return Ok(());
            }
        }
    }
}

fn install_handlers(binding: &ConnectionBinding) {
    let root = binding.channel();

    let say = RpcHandler::new(|args: Vec<Value>| async move { Ok(Value::Array(args)) });
    let _ = root.of("echo").on("say", &say);

    let math = root.of("math");
    let add = RpcHandler::new(|args: Vec<Value>| async move {
        let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
        Ok(json!(sum))
    });
    let div = RpcHandler::new(|args: Vec<Value>| async move {
        let a = args.first().and_then(Value::as_f64).unwrap_or(0.0);
        let b = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
        if b == 0.0 {
            return Err(HandlerError::message("division by zero"));
        }
        Ok(json!(a / b))
    });
    let _ = math.on("add", &add);
    let _ = math.on("div", &div);
}

async fn tick(clock: Channel) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut n = 0u64;
    loop {
        interval.tick().await;
        if clock.binding().is_closed() {
            break;
        }
        clock.emit("tick", vec![json!(n)]);
        n += 1;
    }
}

async fn client(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let binding = ConnectionBinding::with_config(
        WebSocketTransport::connect(format!("ws://{addr}/")),
        BindingConfig::from_env(),
    );
    let root = binding.channel();

    let (tick_tx, mut ticks) = tokio::sync::mpsc::unbounded_channel();
    let on_tick = RpcHandler::new(move |args: Vec<Value>| {
        let tick_tx = tick_tx.clone();
        async move {
            let _ = tick_tx.send(args);
            Ok(Value::Null)
        }
    });
    let _ = root.of("clock").on("tick", &on_tick);

    // Queued until the handshake completes.
    let echoed = root.of("echo").request("say", vec![json!("hello"), json!(42)]).await?;
    println!("echo/say -> {echoed}");

    let math = root.of("math");
    let sum = math.request("add", vec![json!(1), json!(2), json!(3.5)]).await?;
    println!("math/add -> {sum}");

    match math.request("div", vec![json!(1), json!(0)]).await {
        Ok(value) => println!("math/div -> {value}"),
        Err(RequestError::Peer(error)) => println!("math/div rejected: {error}"),
        Err(e) => return Err(e.into()),
    }

    if let Some(tick) = ticks.recv().await {
        println!("clock/tick <- {tick:?}");
    }

    binding.close();
    Ok(())
}
