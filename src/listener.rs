//! The server's single rendezvous socket: receives RRQ/WRQ datagrams,
//! validates and opens the requested file, then hands off to a fresh,
//! per-transfer UDP socket bound to an ephemeral port so every subsequent
//! datagram for that transfer is pinned to its own TID, exactly as
//! RFC 1350 requires.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::BufWriter;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::RequestError;
use crate::path;
use crate::protocol::{MAX_PACKET_SIZE, Message};
use crate::session::{self, Direction, SessionConfig, Stream};

/// Run the listener loop until `shutdown` is signalled. Binds the rendezvous
/// socket at `config.bind_addr` and spawns one session task per accepted
/// request; returns once the socket is closed by a shutdown signal.
pub async fn run(config: Arc<ServerConfig>, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let socket = UdpSocket::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, base_dir = %config.base_dir.display(), "listening");

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };
                handle_datagram(&buf[..len], peer, &socket, config.clone(), shutdown.clone()).await;
            }
            _ = shutdown.changed() => {
                info!("listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_datagram(
    datagram: &[u8],
    peer: SocketAddr,
    rendezvous: &UdpSocket,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
) {
    let request = match parse_request(datagram) {
        Ok(r) => r,
        Err(err) => {
            warn!(%peer, %err, "rejecting malformed initial request");
            let (code, message) = err.wire_error();
            let _ = rendezvous.send_to(&Message::error(code, message).encode(), peer).await;
            return;
        }
    };

    let session_socket = match bind_session_socket(peer).await {
        Ok(socket) => socket,
        Err(e) => {
            error!(%peer, error = %e, "failed to bind per-transfer socket");
            let _ = rendezvous
                .send_to(&Message::error(0, "server error").encode(), peer)
                .await;
            return;
        }
    };

    tokio::spawn(async move {
        run_session(request, peer, session_socket, config, shutdown).await;
    });
}

enum Request {
    Read { filename: String },
    Write { filename: String },
}

fn parse_request(datagram: &[u8]) -> Result<Request, RequestError> {
    if datagram.len() < 4 {
        return Err(RequestError::InvalidSize);
    }
    match Message::decode(datagram) {
        Ok(Message::Rrq { filename, .. }) => Ok(Request::Read { filename }),
        Ok(Message::Wrq { filename, .. }) => Ok(Request::Write { filename }),
        Ok(_) => Err(RequestError::UnsupportedOpcode),
        Err(crate::protocol::DecodeError::TruncatedRequest)
        | Err(crate::protocol::DecodeError::NotAscii) => Err(RequestError::MalformedRequest),
        Err(crate::protocol::DecodeError::ModeNotSpecified) => Err(RequestError::ModeNotSpecified),
        Err(crate::protocol::DecodeError::UnknownMode) => Err(RequestError::UnknownMode),
        Err(crate::protocol::DecodeError::TooShort { .. }) => Err(RequestError::InvalidSize),
        Err(crate::protocol::DecodeError::UnknownOpcode { .. }) => Err(RequestError::UnsupportedOpcode),
    }
}

/// Bind a fresh ephemeral-port socket and `connect` it to `peer`, so the
/// kernel discards any datagram not actually from that address:port — TID
/// pinning without this module having to check source addresses itself.
async fn bind_session_socket(peer: SocketAddr) -> std::io::Result<UdpSocket> {
    let bind_addr: SocketAddr = if peer.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(peer).await?;
    Ok(socket)
}

async fn run_session(
    request: Request,
    peer: SocketAddr,
    socket: UdpSocket,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
) {
    let session_config = SessionConfig {
        recv_timeout: config.recv_timeout,
        recv_retries: config.recv_retries,
    };

    let (direction, stream, filename) = match request {
        Request::Read { filename } => {
            let resolved = match path::resolve(&config.base_dir, &filename) {
                Ok(p) => p,
                Err(err) => {
                    reject(&socket, peer, &filename, err).await;
                    return;
                }
            };
            match File::open(&resolved).await {
                Ok(file) => (Direction::Read, Stream::Source(Box::new(file)), filename),
                Err(io_err) => {
                    reject(&socket, peer, &filename, RequestError::OpenFailure(io_err)).await;
                    return;
                }
            }
        }
        Request::Write { filename } => {
            let resolved = match path::resolve(&config.base_dir, &filename) {
                Ok(p) => p,
                Err(err) => {
                    reject(&socket, peer, &filename, err).await;
                    return;
                }
            };
            if let Some(parent) = resolved.parent() {
                if let Err(io_err) = tokio::fs::create_dir_all(parent).await {
                    reject(&socket, peer, &filename, RequestError::OpenFailure(io_err)).await;
                    return;
                }
            }
            match File::create(&resolved).await {
                Ok(file) => (
                    Direction::Write,
                    Stream::Sink(Box::new(BufWriter::new(file))),
                    filename,
                ),
                Err(io_err) => {
                    reject(&socket, peer, &filename, RequestError::OpenFailure(io_err)).await;
                    return;
                }
            }
        }
    };

    let direction_label = match direction {
        Direction::Read => "get",
        Direction::Write => "put",
    };
    info!(%peer, file = %filename, direction = direction_label, "transfer starting");
    let outcome = session::run(direction, peer, stream, socket, &session_config, shutdown).await;
    info!(%peer, file = %filename, event = %outcome.log_event(), "transfer ended");
}

async fn reject(socket: &UdpSocket, peer: SocketAddr, filename: &str, err: RequestError) {
    warn!(%peer, file = %filename, error = %err, "rejecting request");
    let (code, message) = err.wire_error();
    let _ = socket.send(&Message::error(code, message).encode()).await;
}
