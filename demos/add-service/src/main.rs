use std::time::Duration;

use envoy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Add {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sum(pub i64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub note: String,
}

struct Adder;

impl ServiceShape for Adder {
    fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
        service.rpc::<Add, Sum>().message::<Ping>()
    }
}

type TcpSocket = PipeSocket<envoy::TcpPipe, EnvelopeSerdes<JsonCodec>>;

fn interface() -> Result<InterfaceDef<JsonCodec>, EnvoyError> {
    Ok(InterfaceDef::of::<Adder, NoService>(JsonCodec)?)
}

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// Accepts one connection and serves `Adder` on it.
async fn serve(
    listener: &mut TcpPipeListener,
    iface: &InterfaceDef<JsonCodec>,
) -> Result<Peer<TcpSocket, JsonCodec>, EnvoyError> {
    let pipe = listener.accept().await?;
    info!(peer = %pipe.peer_addr(), "accepted connection");

    let socket = PipeSocket::accepted(
        pipe,
        EnvelopeSerdes::new(JsonCodec),
        SocketConfig::default(),
    );
    let peer = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .on_message(|ping: Ping| info!(note = %ping.note, "ping received"))
        .connect(socket)?;
    Ok(peer)
}

/// Dials `addr` and returns a peer that calls `Adder`.
async fn dial(
    addr: &str,
    iface: &InterfaceDef<JsonCodec>,
) -> Result<Peer<TcpSocket, JsonCodec>, EnvoyError> {
    let socket = PipeSocket::dial(
        TcpDialer::new(addr),
        EnvelopeSerdes::new(JsonCodec),
        SocketConfig::default(),
    )
    .await?;

    let peer = iface
        .client()
        .config(PeerConfig::with_call_timeout(Duration::from_secs(2)))
        .connect(socket)?;
    Ok(peer)
}

#[tokio::main]
async fn main() -> Result<(), EnvoyError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let iface = interface()?;
    let mut listener = TcpPipeListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    info!(%addr, "listening");

    let (server, client) = tokio::try_join!(serve(&mut listener, &iface), dial(&addr, &iface))?;

    let add = client.rpc::<Add, Sum>()?;
    let sum = add.call(Add { x: 2, y: 3 }).await?;
    println!("Add(2, 3) = {}", sum.0);

    client
        .message::<Ping>()?
        .send(Ping {
            note: "hello from the client".into(),
        })
        .await?;

    // A round trip after the ping guarantees the server has handled it.
    add.call(Add { x: 0, y: 0 }).await?;
    println!(
        "server handled {} Add call(s) and {} Ping(s)",
        server.invocations::<Add>(),
        server.invocations::<Ping>()
    );

    client.close().await?;
    server.close().await?;
    Ok(())
}
