//! Tree mesh node binary.
//!
//! Runs one mesh node over TCP. The node accepts links on `--listen` and keeps
//! a station link to every `--connect` peer, redialling with backoff when a
//! link goes away. The mesh engine lives on the main task; socket readers,
//! writers, the acceptor and the dialers run as separate tasks and talk to it
//! over channels.

use clap::Parser;
use mesh_session::{
    connect_tcp, listen_tcp, spawn_tcp_link, Iterations, LinkId, Mesh, TransportEvent,
};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::NodeConfig;
use logging::MeshLogFormatter;

/// Tree mesh node
#[derive(Parser, Debug)]
#[command(name = "treemesh", version, about = "Self-organising tree mesh node over TCP")]
struct Args {
    /// Node id (non-zero); random when neither given here nor in the config
    #[arg(long)]
    node_id: Option<u32>,

    /// Act as the designated root of the mesh
    #[arg(long)]
    root: bool,

    /// Listen address, e.g. 0.0.0.0:5555
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Peer to connect to, e.g. 127.0.0.1:5555 (repeatable)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Scheduler tick, e.g. 10ms
    #[arg(long, default_value = "10ms")]
    tick: humantime::Duration,

    /// Bytes a link may have in flight towards its socket
    #[arg(long, default_value = "16384")]
    send_window: usize,

    /// Broadcast a greeting at this interval, e.g. 5s
    #[arg(long)]
    greet: Option<humantime::Duration>,

    /// Disable mesh id election
    #[arg(long)]
    no_mesh_id: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "mesh.yaml")]
    config: PathBuf,
}

/// A socket ready to become a link
enum Connection {
    /// Accepted on the listener
    Accepted(TcpStream, SocketAddr),
    /// Dialled out; `done` is dropped when the link closes
    Dialled(TcpStream, SocketAddr, oneshot::Sender<()>),
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("treemesh={}", args.log_level).parse()?)
        .add_directive(format!("mesh_session={}", args.log_level).parse()?)
        .add_directive(format!("mesh_routing={}", args.log_level).parse()?)
        .add_directive(format!("mesh_topology={}", args.log_level).parse()?)
        .add_directive(format!("mesh_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(MeshLogFormatter::new("treemesh".to_string()))
        .init();

    info!("Starting tree mesh node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NodeConfig::load_from_file(&args.config)?;
    if args.node_id.is_some() {
        config.node_id = args.node_id;
    }
    if args.root {
        config.root = true;
    }
    if args.listen.is_some() {
        config.listen = args.listen;
    }
    if !args.connect.is_empty() {
        config.connect = args.connect.clone();
    }

    let node_id = match config.node_id {
        Some(0) => anyhow::bail!("Node id 0 is reserved"),
        Some(id) => id,
        None => rand::thread_rng().gen_range(1..=u32::MAX),
    };
    if config.listen.is_none() && config.connect.is_empty() {
        anyhow::bail!("Nothing to do: give --listen and/or --connect");
    }

    let max_connections = config.mesh.max_connections;
    let mut mesh = Mesh::new(node_id, config.mesh.clone());
    mesh.set_root(config.root);
    if !args.no_mesh_id {
        mesh.enable_mesh_id(&mut rand::thread_rng());
    }
    install_listeners(&mut mesh);
    if let Some(every) = args.greet {
        let every = Duration::from(every).as_millis() as u64;
        mesh.add_task(every, Iterations::Forever, move |mesh: &mut Mesh| {
            let msg = format!("Hello from node {}", mesh.node_id());
            mesh.send_broadcast(msg, false);
        });
    }

    info!(
        "Mesh node {} ready (root: {}, listen: {:?}, peers: {:?})",
        node_id, config.root, config.listen, config.connect
    );

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<Connection>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TransportEvent>();

    if let Some(addr) = config.listen {
        let listener = listen_tcp(addr).await?;
        info!("Listening on {}", addr);
        let conn_tx = conn_tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if conn_tx.send(Connection::Accepted(stream, peer)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
    }
    for peer in config.connect.clone() {
        tokio::spawn(run_dialer(peer, conn_tx.clone()));
    }
    drop(conn_tx);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from(args.tick));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut dialled: HashMap<LinkId, oneshot::Sender<()>> = HashMap::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }

            _ = ticker.tick() => {
                mesh.execute(started.elapsed().as_millis() as u64);
                // Dropping the sender tells the dialer its link is gone
                dialled.retain(|link, _| mesh.link(*link).is_some());
            }

            Some(connection) = conn_rx.recv() => {
                let (stream, peer, station, done) = match connection {
                    Connection::Accepted(stream, peer) => (stream, peer, false, None),
                    Connection::Dialled(stream, peer, done) => (stream, peer, true, Some(done)),
                };
                if !station && mesh.link_count() >= max_connections {
                    warn!("Refusing {}: already at {} links", peer, max_connections);
                    continue;
                }
                let window = args.send_window;
                let events = event_tx.clone();
                let link = mesh.add_link_with(station, move |id| {
                    Box::new(spawn_tcp_link(stream, id, window, events))
                });
                let side = if station { "dialled" } else { "accepted" };
                component_info!("tcp", "{} is {} ({})", peer, link, side);
                if let Some(done) = done {
                    dialled.insert(link, done);
                }
            }

            Some(event) = event_rx.recv() => {
                match event {
                    TransportEvent::Data { link, data } => mesh.on_data(link, &data),
                    TransportEvent::Closed { link } => {
                        component_debug!("tcp", "Socket of {} closed", link);
                        mesh.on_disconnect(link);
                    }
                }
            }
        }
    }

    mesh.stop();
    info!("Mesh node {} stopped", node_id);
    Ok(())
}

/// Keep one station link to `peer`, reconnecting with exponential backoff
async fn run_dialer(peer: SocketAddr, conn_tx: mpsc::UnboundedSender<Connection>) {
    let mut backoff = Duration::from_secs(1);

    loop {
        info!("Attempting to connect to {}", peer);

        match connect_tcp(peer).await {
            Ok(stream) => {
                backoff = Duration::from_secs(1);
                let (done_tx, done_rx) = oneshot::channel();
                if conn_tx.send(Connection::Dialled(stream, peer, done_tx)).is_err() {
                    return;
                }
                // Resolves once the mesh drops the link
                let _ = done_rx.await;
                component_warn!("tcp", "Link to {} lost, reconnecting", peer);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}; retrying in {:?}", peer, e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
    }
}

/// Log what the mesh reports
fn install_listeners(mesh: &mut Mesh) {
    mesh.on_new_connection(|_, node_id| {
        component_info!("mesh", "New connection to node {}", node_id);
    });
    mesh.on_dropped_connection(|_, (node_id, station)| {
        let side = if station { "station" } else { "AP" };
        component_info!("mesh", "Dropped {} connection to node {}", side, node_id);
    });
    mesh.on_changed_connections(|mesh, node_id| {
        component_info!(
            "mesh",
            "Topology changed via node {}: {} nodes known",
            node_id,
            mesh.node_list(true).len()
        );
        component_debug!("mesh", "Topology {}", mesh.sub_connection_json(false));
    });
    mesh.on_node_time_adjusted(|mesh, offset| {
        component_debug!("time", "Adjusted by {} ms, node time {}", offset, mesh.node_time());
    });
    mesh.on_node_delay_received(|_, (node_id, delay)| {
        component_info!("time", "Round trip delay to node {}: {} ms", node_id, delay);
    });
    mesh.on_mesh_id_changed(|_, id| {
        component_info!("mesh", "Mesh id is now {}", id);
    });
    mesh.on_receive(|_, (from, msg)| {
        info!("Message from {}: {}", from, msg);
    });
}
