//! Client network layer
//!
//! Runs on its own thread with a current-thread tokio runtime. It forwards
//! moves produced by the render loop, keeps the session alive with pings
//! and feeds every server message into the shared game state.

use crate::game::SharedState;
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode, Packet, MAX_PACKET_SIZE};
use shared::HEARTBEAT_INTERVAL;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, MissedTickBehavior};

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub struct NetworkClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    shared: Arc<SharedState>,
    outbound: UnboundedReceiver<Packet>,
    last_sent: Option<Instant>,
}

impl NetworkClient {
    pub async fn connect(
        server_addr: &str,
        shared: Arc<SharedState>,
        outbound: UnboundedReceiver<Packet>,
    ) -> ClientResult<Self> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv6() {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        info!(
            "Session {} talking to {} from {}",
            shared.game().session_id(),
            server_addr,
            socket.local_addr()?
        );

        Ok(NetworkClient {
            socket,
            server_addr,
            shared,
            outbound,
            last_sent: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn send_packet(&mut self, packet: &Packet) -> ClientResult<()> {
        let data = encode(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        self.last_sent = Some(Instant::now());
        Ok(())
    }

    fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        if from != self.server_addr {
            debug!("Ignoring {} bytes from unexpected peer {}", bytes.len(), from);
            return;
        }

        match decode(bytes) {
            Ok(packet) => self.shared.game().apply_server_packet(&packet, Instant::now()),
            Err(e) => warn!("Dropping malformed packet from server: {}", e),
        }
    }

    /// Runs until the shared running flag clears, then sends a best-effort leave.
    pub async fn run(&mut self) -> ClientResult<()> {
        let mut buffer = [0u8; MAX_PACKET_SIZE * 2];
        // Ticks well inside the heartbeat period so the running flag is checked often.
        let mut heartbeat = interval(HEARTBEAT_INTERVAL / 4);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first ping creates the session and brings back any stored position.
        let hello = self.shared.game().heartbeat_packet();
        self.send_packet(&hello).await?;

        while self.shared.is_running() {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, from)) => self.handle_datagram(&buffer[..len], from),
                        Err(e) if is_transient(&e) => debug!("Transient receive error: {}", e),
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                Some(packet) = self.outbound.recv() => {
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = heartbeat.tick() => {
                    if heartbeat_due(self.last_sent, Instant::now()) {
                        let ping = self.shared.game().heartbeat_packet();
                        if let Err(e) = self.send_packet(&ping).await {
                            warn!("Error sending heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        let leave = self.shared.game().leave_packet();
        if let Err(e) = self.send_packet(&leave).await {
            debug!("Leave not sent: {}", e);
        }
        info!("Network loop stopped");
        Ok(())
    }
}

/// Starts the network thread. The shared state must already be in its `Arc`.
pub fn spawn(
    server_addr: String,
    shared: Arc<SharedState>,
    outbound: UnboundedReceiver<Packet>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("network".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to start network runtime: {}", e);
                    shared.stop();
                    return;
                }
            };

            let client_shared = Arc::clone(&shared);
            runtime.block_on(async move {
                match NetworkClient::connect(&server_addr, client_shared, outbound).await {
                    Ok(mut client) => {
                        if let Err(e) = client.run().await {
                            error!("Network loop failed: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to connect to {}: {}", server_addr, e),
                }
            });

            shared.stop();
        })
}

/// A ping is due once nothing has been sent for a full heartbeat interval.
fn heartbeat_due(last_sent: Option<Instant>, now: Instant) -> bool {
    match last_sent {
        Some(last) => now.saturating_duration_since(last) >= HEARTBEAT_INTERVAL,
        None => true,
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
