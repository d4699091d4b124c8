//! UDP receive loop and its command handle.
//!
//! One receiver task serves one call. The task owns the socket, the
//! jitter buffer and the pre-buffer ring; nothing else touches them.
//! Consumers drive the receiver through [`RtpReceiverHandle`] commands
//! and observe it through the [`RtpEvent`] channel supplied to
//! [`RtpReceiver::listen`].

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::{Result, RtpError};
use crate::events::RtpEvent;
use crate::jitter::JitterBuffer;
use crate::packet::RtpPacket;
use crate::prebuffer::PreBuffer;
use crate::{FRAME_INTERVAL, MAX_PORT_PROBES};

/// Where reordered frames are routed.
///
/// The receiver starts out discarding frames; a call enables the ring
/// when voice detection is armed and flushes it into live delivery when
/// voice actually starts. There is no transition backwards.
#[derive(Debug)]
enum DeliveryMode {
    /// No consumer yet, reordered frames are dropped
    Idle,
    /// Frames accumulate in the ring, oldest evicted first
    PreBuffer(PreBuffer),
    /// Frames go to the event channel as they are released
    Live,
}

/// Commands accepted by the receiver task.
enum Command {
    StartPreBuffering { capacity_frames: usize },
    StopPreBufferingAndFlush { reply: oneshot::Sender<Vec<u8>> },
    Close,
}

/// Factory for per-call RTP receivers.
pub struct RtpReceiver;

impl RtpReceiver {
    /// Bind a UDP socket and start the receive loop.
    ///
    /// Binding probes upward from `start_port` when a candidate is
    /// already in use, and fails with [`RtpError::BindExhausted`] after
    /// [`MAX_PORT_PROBES`] candidates. The actually bound endpoint is
    /// reported via [`RtpEvent::Listening`] and on the returned handle.
    pub async fn listen(
        ip: IpAddr,
        start_port: u16,
        events: mpsc::Sender<RtpEvent>,
    ) -> Result<RtpReceiverHandle> {
        let mut attempts: u16 = 0;
        let socket = loop {
            if attempts >= MAX_PORT_PROBES {
                return Err(RtpError::BindExhausted { start_port, attempts });
            }
            let port = match start_port.checked_add(attempts) {
                Some(port) => port,
                None => return Err(RtpError::BindExhausted { start_port, attempts }),
            };
            match UdpSocket::bind(SocketAddr::new(ip, port)).await {
                Ok(socket) => break socket,
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    debug!(port, "RTP port in use, probing next");
                    attempts += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let local_addr = socket.local_addr()?;
        debug!(%local_addr, "RTP receiver listening");
        let _ = events.send(RtpEvent::Listening { local_addr }).await;

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        tokio::spawn(run(socket, events, cmd_rx));

        Ok(RtpReceiverHandle { local_addr, cmd_tx })
    }
}

/// Command handle for a running receiver task.
///
/// Dropping the handle closes the receiver.
#[derive(Debug, Clone)]
pub struct RtpReceiverHandle {
    local_addr: SocketAddr,
    cmd_tx: mpsc::Sender<Command>,
}

impl RtpReceiverHandle {
    /// Endpoint the switch should send external media to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enter pre-buffer mode with a ring of `capacity_frames` entries.
    pub async fn start_pre_buffering(&self, capacity_frames: usize) -> Result<()> {
        self.cmd_tx
            .send(Command::StartPreBuffering { capacity_frames })
            .await
            .map_err(|_| RtpError::Closed)
    }

    /// Drain the ring in arrival order and switch to live delivery.
    ///
    /// Frames released after this call are published as
    /// [`RtpEvent::Frame`]; the returned bytes are strictly older than
    /// any of them.
    pub async fn stop_pre_buffering_and_flush(&self) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::StopPreBufferingAndFlush { reply: reply_tx })
            .await
            .map_err(|_| RtpError::Closed)?;
        reply_rx.await.map_err(|_| RtpError::Closed)
    }

    /// Stop the playout tick and close the socket.
    ///
    /// Best-effort; a receiver that already died from a socket error is
    /// not an error to close again.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

async fn run(
    socket: UdpSocket,
    events: mpsc::Sender<RtpEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let mut jitter = JitterBuffer::new();
    let mut mode = DeliveryMode::Idle;
    let mut buf = vec![0u8; 2048];

    // The playout tick only starts once the first packet has arrived.
    let mut tick = tokio::time::interval(FRAME_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticking = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::StartPreBuffering { capacity_frames }) => {
                    debug!(capacity_frames, "entering pre-buffer mode");
                    mode = DeliveryMode::PreBuffer(PreBuffer::new(capacity_frames));
                }
                Some(Command::StopPreBufferingAndFlush { reply }) => {
                    let flushed = match &mut mode {
                        DeliveryMode::PreBuffer(ring) => ring.flush(),
                        _ => Vec::new(),
                    };
                    debug!(bytes = flushed.len(), "pre-buffer flushed, going live");
                    let _ = reply.send(flushed);
                    mode = DeliveryMode::Live;
                }
                Some(Command::Close) | None => break,
            },

            received = socket.recv_from(&mut buf) => match received {
                Ok((len, _peer)) => match RtpPacket::parse(&buf[..len]) {
                    Ok(packet) => {
                        let first = jitter.insert(packet.sequence(), packet.payload().to_vec());
                        if first && !ticking {
                            tick.reset();
                            ticking = true;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed RTP datagram"),
                },
                Err(e) => {
                    warn!(error = %e, "RTP socket failed, closing receiver");
                    let _ = events
                        .send(RtpEvent::SocketError { reason: e.to_string() })
                        .await;
                    break;
                }
            },

            _ = tick.tick(), if ticking => {
                if let Some(payload) = jitter.advance() {
                    match &mut mode {
                        DeliveryMode::Idle => {}
                        DeliveryMode::PreBuffer(ring) => ring.push(payload),
                        DeliveryMode::Live => {
                            if events.send(RtpEvent::Frame { payload }).await.is_err() {
                                // Consumer went away, nothing left to deliver to.
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}
