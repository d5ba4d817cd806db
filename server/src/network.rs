//! Server network layer: one UDP receive loop driving the simulation

use crate::game::{Outgoing, Simulation};
use crate::persistence::{PersistenceQueue, PlayerStore};
use crate::session_manager::SessionManager;
use log::{debug, error, info, warn};
use shared::protocol::{encode, MAX_PACKET_SIZE};
use shared::{World, MAX_PLAYERS, SESSION_TIMEOUT};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Tunables for a server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_sessions: usize,
    pub session_timeout: Duration,
    /// Upper bound on how long the loop can go without checking the running flag
    pub housekeeping_interval: Duration,
    /// Slot count of the persistence ring
    pub persist_queue_capacity: usize,
    pub world: World,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_PLAYERS,
            session_timeout: SESSION_TIMEOUT,
            housekeeping_interval: Duration::from_millis(250),
            persist_queue_capacity: 256,
            world: World::standard(),
        }
    }
}

/// UDP server owning the socket and the authoritative simulation
pub struct Server {
    socket: UdpSocket,
    simulation: Simulation,
    housekeeping_interval: Duration,
    running: Arc<AtomicBool>,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig, store: Arc<dyn PlayerStore>) -> ServerResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Server listening on {}", socket.local_addr()?);

        let persistence = PersistenceQueue::spawn(store, config.persist_queue_capacity)?;
        let simulation = Simulation::new(
            config.world,
            SessionManager::new(config.max_sessions),
            Box::new(persistence),
            config.session_timeout,
        );

        Ok(Server {
            socket,
            simulation,
            housekeeping_interval: config.housekeeping_interval,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Flag checked once per loop iteration; store `false` to stop the server.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Main server loop. Processes one datagram at a time until the running flag clears.
    pub async fn run(&mut self) -> ServerResult<()> {
        let mut buffer = [0u8; MAX_PACKET_SIZE * 2];
        let mut housekeeping = interval(self.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        while self.running.load(Ordering::Acquire) {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => {
                            let outgoing = self.simulation.handle_datagram(&buffer[..len], addr, Instant::now());
                            send_all(&self.socket, outgoing).await;
                        }
                        Err(e) if is_transient(&e) => {
                            debug!("Transient receive error: {}", e);
                        }
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                        }
                    }
                },

                _ = housekeeping.tick() => {
                    let evicted = self.simulation.evict_expired(Instant::now());
                    if !evicted.is_empty() {
                        debug!("Evicted {} sessions, {} remaining", evicted.len(), self.simulation.sessions().len());
                    }
                },
            }
        }

        info!("Server shutting down");
        self.simulation.persist_all();
        Ok(())
    }
}

async fn send_all(socket: &UdpSocket, outgoing: Vec<Outgoing>) {
    for Outgoing { addr, packet } in outgoing {
        let data = match encode(&packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode packet for {}: {}", addr, e);
                continue;
            }
        };

        if let Err(e) = socket.send_to(&data, addr).await {
            warn!("Failed to send to {}: {}", addr, e);
        }
    }
}

/// Errors worth retrying on the next tick rather than logging loudly
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
