//! TCP rendezvous for the `env://` method.
//!
//! Worker 0 listens on `MASTER_ADDR:MASTER_PORT`. Every other worker
//! connects, sends a `hello` message with its rank and group size, and waits
//! until worker 0 has seen all peers and answers `ready`. Leaving the group
//! sends `bye` and closes the connection. Messages are one JSON object per
//! line.
//!
//! The networking runs on a current-thread tokio runtime owned by the
//! membership, so callers stay synchronous.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::time::{sleep, timeout_at, Instant};

use super::backend::{CoordinationBackend, GroupHandle, GroupMembership, SoloMembership};
use super::error::{ContextError, RendezvousError};
use super::identity::WorkerIdentity;

pub const MASTER_ADDR_VAR: &str = "MASTER_ADDR";
pub const MASTER_PORT_VAR: &str = "MASTER_PORT";
pub const TIMEOUT_VAR: &str = "VTB_RENDEZVOUS_TIMEOUT_SECS";
pub const HANDSHAKE_TIMEOUT_VAR: &str = "VTB_HANDSHAKE_TIMEOUT_SECS";

/// Variable exported by `bind_device`; every tool the worker launches
/// inherits it.
pub const DEVICE_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// The only supported rendezvous method.
pub const ENV_METHOD: &str = "env://";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_millis(200);
const MAX_MESSAGE_BYTES: u64 = 1024;

/// Rendezvous wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Message {
    Hello { rank: usize, world: usize },
    Ready,
    Bye,
}

/// Coordination backend using a TCP star around worker 0.
#[derive(Debug, Clone)]
pub struct TcpRendezvous {
    master_addr: Option<String>,
    master_port: Option<u16>,
    timeout: Duration,
    handshake_timeout: Duration,
}

impl TcpRendezvous {
    pub fn new(master_addr: impl Into<String>, master_port: u16) -> Self {
        Self {
            master_addr: Some(master_addr.into()),
            master_port: Some(master_port),
            timeout: DEFAULT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Read the rendezvous address from the process environment.
    ///
    /// The address may be absent; it is only required when a group with
    /// more than one worker is formed.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let master_port = match lookup(MASTER_PORT_VAR) {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                ContextError::InvalidVariable {
                    name: MASTER_PORT_VAR,
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        let rendezvous = Self {
            master_addr: lookup(MASTER_ADDR_VAR),
            master_port,
            timeout: DEFAULT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        };

        Ok(rendezvous
            .with_timeout(seconds_var(&lookup, TIMEOUT_VAR)?.unwrap_or(DEFAULT_TIMEOUT))
            .with_handshake_timeout(
                seconds_var(&lookup, HANDSHAKE_TIMEOUT_VAR)?.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            ))
    }

    /// Overall time allowed for the whole group to form.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time worker 0 waits for a greeting on each accepted connection.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn address(&self) -> Result<(String, u16), ContextError> {
        let host = self
            .master_addr
            .clone()
            .ok_or(ContextError::MissingVariable(MASTER_ADDR_VAR))?;
        let port = self
            .master_port
            .ok_or(ContextError::MissingVariable(MASTER_PORT_VAR))?;
        Ok((host, port))
    }
}

impl CoordinationBackend for TcpRendezvous {
    /// Pin the process to one device by exporting `CUDA_VISIBLE_DEVICES`.
    ///
    /// Must run before worker threads or tools are started.
    fn bind_device(&mut self, device_index: usize) -> Result<(), ContextError> {
        std::env::set_var(DEVICE_VAR, device_index.to_string());
        tracing::info!("Bound to device {}", device_index);
        Ok(())
    }

    fn join_group(
        &mut self,
        identity: &WorkerIdentity,
        backend_name: &str,
        method: &str,
    ) -> Result<GroupHandle, ContextError> {
        if method != ENV_METHOD {
            return Err(ContextError::UnsupportedMethod(method.to_string()));
        }

        if identity.total_workers <= 1 {
            tracing::debug!("Single-worker group, no rendezvous needed");
            return Ok(GroupHandle::new(
                backend_name,
                *identity,
                Box::new(SoloMembership),
            ));
        }

        let (host, port) = self.address()?;
        let started = std::time::Instant::now();
        tracing::info!(
            "Waiting for {} workers at {}:{}",
            identity.total_workers,
            host,
            port
        );

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RendezvousError::io("start rendezvous runtime", e))?;

        let membership: Box<dyn GroupMembership> = if identity.is_leader() {
            let peers = runtime.block_on(lead(
                &host,
                port,
                identity.total_workers,
                self.timeout,
                self.handshake_timeout,
            ))?;
            Box::new(LeaderMembership { peers, runtime })
        } else {
            let leader = runtime.block_on(follow(&host, port, identity, self.timeout))?;
            Box::new(FollowerMembership {
                leader: Some(leader),
                runtime,
            })
        };

        tracing::info!(
            "Joined {} group as {} after {:.1}s",
            backend_name,
            identity,
            started.elapsed().as_secs_f64()
        );

        Ok(GroupHandle::new(backend_name, *identity, membership))
    }
}

fn seconds_var<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ContextError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ContextError::InvalidVariable { name, value: raw }),
        None => Ok(None),
    }
}

/// One rendezvous connection.
struct Link {
    stream: BufReader<TcpStream>,
}

impl Link {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn send(&mut self, message: &Message) -> io::Result<()> {
        let mut line = serde_json::to_string(message).map_err(io::Error::other)?;
        line.push('\n');
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await
    }

    /// Next message, or `None` once the peer has closed the connection.
    async fn receive(&mut self) -> Result<Option<Message>, RendezvousError> {
        let mut line = String::new();
        let read = (&mut self.stream)
            .take(MAX_MESSAGE_BYTES)
            .read_line(&mut line)
            .await
            .map_err(|e| RendezvousError::io("read", e))?;
        if read == 0 {
            return Ok(None);
        }

        serde_json::from_str(line.trim()).map(Some).map_err(|e| {
            RendezvousError::Protocol(format!("malformed message '{}': {}", line.trim(), e))
        })
    }

    async fn close(mut self, rank: usize) {
        if let Err(e) = self.send(&Message::Bye).await {
            tracing::debug!("Worker {} already gone: {}", rank, e);
        }
        let _ = self.stream.get_mut().shutdown().await;
    }
}

/// Worker 0's side of the group: one connection per peer.
struct LeaderMembership {
    peers: Vec<(usize, Link)>,
    runtime: Runtime,
}

impl GroupMembership for LeaderMembership {
    fn leave(&mut self) -> Result<(), ContextError> {
        let peers = std::mem::take(&mut self.peers);
        self.runtime.block_on(async move {
            for (rank, link) in peers {
                link.close(rank).await;
            }
        });
        Ok(())
    }
}

/// A peer's connection to worker 0.
struct FollowerMembership {
    leader: Option<Link>,
    runtime: Runtime,
}

impl GroupMembership for FollowerMembership {
    fn leave(&mut self) -> Result<(), ContextError> {
        if let Some(link) = self.leader.take() {
            self.runtime.block_on(link.close(0));
        }
        Ok(())
    }
}

/// Accept peers until all `world - 1` have greeted.
///
/// Connections that send garbage, close early or stay silent past the
/// handshake timeout are dropped. A well-formed greeting that disagrees on
/// the group is a configuration error and fails the rendezvous.
async fn lead(
    host: &str,
    port: u16,
    world: usize,
    limit: Duration,
    handshake: Duration,
) -> Result<Vec<(usize, Link)>, RendezvousError> {
    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| RendezvousError::io(format!("bind {}:{}", host, port), e))?;

    let deadline = Instant::now() + limit;
    let expected_peers = world - 1;
    let mut peers: Vec<(usize, Link)> = Vec::with_capacity(expected_peers);

    while peers.len() < expected_peers {
        let timed_out = || RendezvousError::Timeout {
            waited: limit,
            joined: peers.len() + 1,
            expected: world,
        };

        let (stream, addr) = timeout_at(deadline, listener.accept())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| RendezvousError::io("accept", e))?;

        let mut link = Link::new(stream);
        let cutoff = (Instant::now() + handshake).min(deadline);

        match timeout_at(cutoff, link.receive()).await {
            Ok(Ok(Some(Message::Hello {
                rank,
                world: claimed,
            }))) => {
                check_peer(rank, claimed, world, &peers)?;
                tracing::debug!("Worker {} joined from {}", rank, addr);
                peers.push((rank, link));
            }
            Ok(Ok(Some(other))) => {
                tracing::warn!("Dropping connection from {}: expected hello, got {:?}", addr, other);
            }
            Ok(Ok(None)) => {
                tracing::debug!("Connection from {} closed before greeting", addr);
            }
            Ok(Err(e)) => {
                tracing::warn!("Dropping connection from {}: {}", addr, e);
            }
            Err(_) => {
                tracing::warn!("Dropping connection from {}: no greeting within {:?}", addr, handshake);
            }
        }
    }

    for (rank, link) in peers.iter_mut() {
        link.send(&Message::Ready)
            .await
            .map_err(|e| RendezvousError::io(format!("release worker {}", rank), e))?;
    }

    Ok(peers)
}

fn check_peer(
    rank: usize,
    claimed_world: usize,
    world: usize,
    peers: &[(usize, Link)],
) -> Result<(), RendezvousError> {
    if claimed_world != world {
        return Err(RendezvousError::Protocol(format!(
            "worker {} expects {} workers, this group has {}",
            rank, claimed_world, world
        )));
    }
    if rank == 0 || rank >= world {
        return Err(RendezvousError::Protocol(format!(
            "unexpected worker index {} in a group of {}",
            rank, world
        )));
    }
    if peers.iter().any(|(r, _)| *r == rank) {
        return Err(RendezvousError::Protocol(format!(
            "worker {} joined twice",
            rank
        )));
    }
    Ok(())
}

async fn follow(
    host: &str,
    port: u16,
    identity: &WorkerIdentity,
    limit: Duration,
) -> Result<Link, RendezvousError> {
    let deadline = Instant::now() + limit;
    let timed_out = || RendezvousError::Timeout {
        waited: limit,
        joined: 0,
        expected: identity.total_workers,
    };

    let stream = connect_with_retry(host, port, deadline, limit).await?;
    let mut leader = Link::new(stream);
    leader
        .send(&Message::Hello {
            rank: identity.index,
            world: identity.total_workers,
        })
        .await
        .map_err(|e| RendezvousError::io("announce", e))?;

    match timeout_at(deadline, leader.receive())
        .await
        .map_err(|_| timed_out())??
    {
        Some(Message::Ready) => Ok(leader),
        Some(other) => Err(RendezvousError::Protocol(format!(
            "expected ready, got {:?}",
            other
        ))),
        None => Err(RendezvousError::Protocol(
            "connection closed during rendezvous".to_string(),
        )),
    }
}

async fn connect_with_retry(
    host: &str,
    port: u16,
    deadline: Instant,
    limit: Duration,
) -> Result<TcpStream, RendezvousError> {
    let mut last_error = None;

    loop {
        match timeout_at(deadline, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {}
        }

        if Instant::now() >= deadline {
            return Err(match last_error {
                Some(e) => RendezvousError::io(
                    format!("connect to {}:{} within {:?}", host, port, limit),
                    e,
                ),
                None => RendezvousError::Protocol(format!(
                    "no answer from {}:{} within {:?}",
                    host, port, limit
                )),
            });
        }
        sleep(RETRY_INTERVAL).await;
    }
}
