//! The per-transfer protocol engine: the lock-step RRQ/WRQ state machines,
//! retransmission, and timeout handling.
//!
//! This module is deliberately ignorant of the filesystem and of how its
//! UDP socket was obtained — the listener hands it an already-bound,
//! already-connected socket and an already-opened stream, and all this
//! module does is drive the protocol to one of the outcomes in [`Outcome`].

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{Outcome, SessionError};
use crate::protocol::{BLOCK_SIZE, MAX_PACKET_SIZE, Message};

/// Which side of the transfer the server plays: `Read` means the client
/// issued an RRQ (the server sends DATA), `Write` means the client issued a
/// WRQ (the server sends ACKs and receives DATA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Per-transfer timeout and retry policy.
/// Production defaults match the original server; tests shrink both fields
/// so the retry/timeout paths run in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub recv_timeout: Duration,
    pub recv_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            recv_timeout: Duration::from_secs(5),
            recv_retries: 5,
        }
    }
}

/// The byte-stream collaborator a session drives: a source to read a file
/// out of for an RRQ, or a sink to write a file into for a WRQ.
pub enum Stream {
    Source(Box<dyn AsyncRead + Unpin + Send>),
    Sink(Box<dyn AsyncWrite + Unpin + Send>),
}

/// Drive one transfer to completion. `socket` must already be connected to
/// `peer` (see [`crate::listener`]), so every `send`/`recv` on it is
/// implicitly scoped to that one TID — datagrams from any other address
/// never reach this function, which gives TID pinning for free.
pub async fn run(
    direction: Direction,
    peer: SocketAddr,
    stream: Stream,
    socket: UdpSocket,
    config: &SessionConfig,
    shutdown: watch::Receiver<bool>,
) -> Outcome {
    match (direction, stream) {
        (Direction::Read, Stream::Source(source)) => {
            run_read(peer, source, socket, config, shutdown).await
        }
        (Direction::Write, Stream::Sink(sink)) => {
            run_write(peer, sink, socket, config, shutdown).await
        }
        _ => unreachable!("listener always pairs Direction::Read with Stream::Source"),
    }
}

/// Outcome of waiting for one datagram, abstracted over the caller's
/// decision about what a "success" datagram looks like.
enum WaitOutcome {
    /// A message was received and fully handled; advance to the next block.
    Advance,
    /// Retry budget exhausted, peer error, or protocol violation: stop here.
    Done(Outcome),
}

/// Outcome of waiting for a DATA datagram during a write.
enum WaitWrite {
    Received(Vec<u8>),
    Done(Outcome),
}

async fn run_read(
    peer: SocketAddr,
    mut source: Box<dyn AsyncRead + Unpin + Send>,
    socket: UdpSocket,
    config: &SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Outcome {
    let mut block: u16 = 0;
    let mut read_buf = vec![0u8; BLOCK_SIZE];
    let mut recv_buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let n = match source.read(&mut read_buf).await {
            Ok(n) => n,
            Err(e) => return Outcome::LocalError(SessionError::Io(e)),
        };
        block = block.wrapping_add(1);
        let terminal = n < BLOCK_SIZE;
        let data = Message::Data {
            block,
            data: read_buf[..n].to_vec(),
        }
        .encode();

        let mut attempts = 0u32;
        let outcome = loop {
            if let Err(e) = socket.send(&data).await {
                break Some(Outcome::LocalError(SessionError::Io(e)));
            }

            tokio::select! {
                result = tokio::time::timeout(config.recv_timeout, socket.recv(&mut recv_buf)) => {
                    match result {
                        Ok(Ok(len)) => {
                            match handle_read_response(&recv_buf[..len], block, &socket).await {
                                WaitOutcome::Advance => break None,
                                WaitOutcome::Done(outcome) => break Some(outcome),
                            }
                        }
                        Ok(Err(io_err)) => break Some(Outcome::LocalError(SessionError::Io(io_err))),
                        Err(_elapsed) => {
                            attempts += 1;
                            if attempts >= config.recv_retries {
                                warn!(%peer, block, "retry budget exhausted");
                                break Some(Outcome::TimedOut);
                            }
                            warn!(%peer, block, attempt = attempts, "ack timed out, retransmitting data");
                            continue;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = socket.send(&Message::error(0, "server shutting down").encode()).await;
                    break Some(Outcome::Aborted);
                }
            }
        };

        if let Some(outcome) = outcome {
            return outcome;
        }
        if terminal {
            info!(%peer, blocks = block, "read transfer completed");
            return Outcome::Completed;
        }
    }
}

async fn handle_read_response(datagram: &[u8], expected_block: u16, socket: &UdpSocket) -> WaitOutcome {
    if datagram.len() < 4 {
        let _ = socket
            .send(&Message::error(0, "invalid request size").encode())
            .await;
        return WaitOutcome::Done(Outcome::LocalError(SessionError::MalformedPeerMessage(
            crate::protocol::DecodeError::TooShort { len: datagram.len() },
        )));
    }

    match Message::decode(datagram) {
        Ok(Message::Error { code, message }) => WaitOutcome::Done(Outcome::PeerError { code, message }),
        Ok(Message::Ack { block }) if block == expected_block => WaitOutcome::Advance,
        Ok(Message::Ack { .. }) => {
            let _ = socket
                .send(&Message::error(0, "invalid ack number").encode())
                .await;
            WaitOutcome::Done(Outcome::LocalError(SessionError::ProtocolViolation(
                "invalid ack number received".to_string(),
            )))
        }
        Ok(_) | Err(_) => {
            let _ = socket
                .send(&Message::error(4, "invalid message during transfer").encode())
                .await;
            WaitOutcome::Done(Outcome::LocalError(SessionError::ProtocolViolation(
                "invalid message during transfer received".to_string(),
            )))
        }
    }
}

async fn run_write(
    peer: SocketAddr,
    mut sink: Box<dyn AsyncWrite + Unpin + Send>,
    socket: UdpSocket,
    config: &SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Outcome {
    let mut recv_buf = vec![0u8; MAX_PACKET_SIZE];
    let mut block: u16 = 0;

    if let Err(e) = socket.send(&Message::Ack { block }.encode()).await {
        return Outcome::LocalError(SessionError::Io(e));
    }

    loop {
        let mut attempts = 0u32;
        let payload = loop {
            tokio::select! {
                result = tokio::time::timeout(config.recv_timeout, socket.recv(&mut recv_buf)) => {
                    match result {
                        Ok(Ok(len)) => {
                            match handle_write_request(&recv_buf[..len], block, &socket).await {
                                Ok(payload) => break WaitWrite::Received(payload),
                                Err(outcome) => break WaitWrite::Done(outcome),
                            }
                        }
                        Ok(Err(io_err)) => break WaitWrite::Done(Outcome::LocalError(SessionError::Io(io_err))),
                        Err(_elapsed) => {
                            attempts += 1;
                            if attempts >= config.recv_retries {
                                warn!(%peer, block, "retry budget exhausted");
                                break WaitWrite::Done(Outcome::TimedOut);
                            }
                            warn!(%peer, block, attempt = attempts, "data timed out, retransmitting ack");
                            if let Err(e) = socket.send(&Message::Ack { block }.encode()).await {
                                break WaitWrite::Done(Outcome::LocalError(SessionError::Io(e)));
                            }
                            continue;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = socket.send(&Message::error(0, "server shutting down").encode()).await;
                    break WaitWrite::Done(Outcome::Aborted);
                }
            }
        };

        let payload = match payload {
            WaitWrite::Received(payload) => payload,
            WaitWrite::Done(outcome) => return outcome,
        };
        let terminal = payload.len() < BLOCK_SIZE;

        if let Err(e) = sink.write_all(&payload).await {
            return Outcome::LocalError(SessionError::Io(e));
        }
        block = block.wrapping_add(1);

        if let Err(e) = socket.send(&Message::Ack { block }.encode()).await {
            return Outcome::LocalError(SessionError::Io(e));
        }

        if terminal {
            if let Err(e) = sink.flush().await {
                return Outcome::LocalError(SessionError::Io(e));
            }
            info!(%peer, blocks = block, "write transfer completed");
            return Outcome::Completed;
        }
    }
}

/// Validate an inbound datagram during a WRQ and, on success, return the
/// DATA payload to append to the sink. `expected_block` is the block number
/// most recently ACKed; the next DATA must carry `expected_block + 1`.
async fn handle_write_request(
    datagram: &[u8],
    expected_block: u16,
    socket: &UdpSocket,
) -> Result<Vec<u8>, Outcome> {
    if datagram.len() < 4 {
        let _ = socket
            .send(&Message::error(0, "invalid request size").encode())
            .await;
        return Err(Outcome::LocalError(SessionError::MalformedPeerMessage(
            crate::protocol::DecodeError::TooShort { len: datagram.len() },
        )));
    }

    match Message::decode(datagram) {
        Ok(Message::Error { code, message }) => Err(Outcome::PeerError { code, message }),
        Ok(Message::Data { block, data }) if block == expected_block.wrapping_add(1) => Ok(data),
        Ok(Message::Data { .. }) => {
            let _ = socket
                .send(&Message::error(0, "invalid block number").encode())
                .await;
            Err(Outcome::LocalError(SessionError::ProtocolViolation(
                "invalid block number received".to_string(),
            )))
        }
        Ok(_) | Err(_) => {
            let _ = socket
                .send(&Message::error(4, "invalid message during transfer").encode())
                .await;
            Err(Outcome::LocalError(SessionError::ProtocolViolation(
                "invalid message during transfer received".to_string(),
            )))
        }
    }
}
