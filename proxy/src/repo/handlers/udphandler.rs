//! Session multiplexer.
//!
//! Owns the listening socket and the session table. Every request datagram
//! is decoded on the side (decoding never gates forwarding) and then handed
//! unmodified to the upstream session for its client address, creating the
//! session on first sight. Replies surfaced by a session go back to that
//! session's client address only.

use crate::data::state::{RelayStats, SessionTable};
use crate::data::udpstruct::{SessionEvent, SessionState, UdpSession};
use crate::repo::handlers::session::{self, MAX_DATAGRAM};

use common_data::relay::data::quality::is_suspect;
use common_data::relay::data::telemetry::{decode, DecodedReading};

use std::future::{self, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::prelude::*;
use chrono::TimeDelta;

use log::{debug, error, info, log_enabled, warn, Level};

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::time::{self, Interval, MissedTickBehavior};

use uuid::Uuid;

const EVENT_QUEUE: usize = 1_000;
const REPLY_QUEUE: usize = 1_000;
const SESSION_QUEUE: usize = 64;
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Multiplexer {
    socket: Arc<UdpSocket>,
    upstream: SocketAddr,
    idle_timeout: Option<Duration>,
    readings: Option<Sender<DecodedReading>>,
    sessions: SessionTable,
    stats: RelayStats,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl Multiplexer {
    /// Binds the listening endpoint. Failing to bind is the relay's only
    /// fatal error.
    pub async fn bind(addr: SocketAddr, upstream: SocketAddr) -> io::Result<Multiplexer> {
        let socket = UdpSocket::bind(addr).await?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        return Ok(Multiplexer {
            socket: Arc::new(socket),
            upstream,
            idle_timeout: None,
            readings: None,
            sessions: SessionTable::new(),
            stats: RelayStats::default(),
            events_tx,
            events_rx,
        });
    }

    /// Evicts sessions with no traffic in either direction for `idle`.
    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Non-suppressed readings are offered to `readings`; a full queue
    /// drops the reading, never the datagram.
    pub fn with_readings(mut self, readings: Sender<DecodedReading>) -> Self {
        self.readings = Some(readings);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Relays until `shutdown` completes, then tears down every session and
    /// returns the counters.
    pub async fn run<F>(mut self, shutdown: F) -> RelayStats
    where
        F: Future<Output = ()>,
    {
        let (udp_tx, udp_rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(REPLY_QUEUE);
        let writer = tokio::spawn(write_replies(Arc::clone(&self.socket), udp_rx));

        let mut sweep = self.idle_timeout.map(|idle| {
            let mut interval = time::interval(idle.min(MAX_SWEEP_INTERVAL));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        tokio::pin!(shutdown);
        let mut buff = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                incoming = self.socket.recv_from(&mut buff) => match incoming {
                    Ok((len, addr)) => self.handle_datagram(&buff[..len], addr),
                    Err(err) => error!("error on udp read: {err}"),
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event, &udp_tx),
                _ = tick(&mut sweep) => self.evict_idle(),
            }
        }

        info!("Closing {} session(s)", self.sessions.len());
        drop(self.sessions.drain());
        writer.abort();

        self.stats
    }

    fn handle_datagram(&mut self, data: &[u8], client: SocketAddr) {
        if log_enabled!(Level::Debug) {
            debug!(
                "Outbound datagram from {client}... {} bytes long\n{}",
                data.len(),
                hex::encode(data)
            );
        }

        self.inspect(data, client);
        self.forward(data, client);
    }

    /// Decode and quality side channel. Never affects forwarding.
    fn inspect(&mut self, data: &[u8], client: SocketAddr) {
        let reading = match decode(data) {
            Ok(r) => r,
            Err(err) => {
                self.stats.decode_failures += 1;
                debug!("not decoding datagram from {client}: {err}");
                return;
            }
        };

        if log_enabled!(Level::Debug) {
            if let Ok(json) = serde_json::to_string(&reading) {
                debug!("Decoded {json}");
            }
        }

        if is_suspect(&reading) {
            self.stats.suspect_readings += 1;
            warn!(
                "3094 condition detected from {} - data values ignored",
                reading.serial_number
            );
            return;
        }

        let readings = match &self.readings {
            Some(r) => r,
            None => return,
        };

        if let Err(err) = readings.try_send(reading) {
            self.stats.dropped_readings += 1;
            warn!("reading from {} not published: {err}", reading.serial_number);
        }
    }

    fn forward(&mut self, data: &[u8], client: SocketAddr) {
        let queued = match self.sessions.get_mut(&client) {
            Some(session) => {
                session.last_changed = Utc::now();
                session.outbound.try_send(data.to_vec())
            }
            None => return self.open_session(client, data.to_vec()),
        };

        match queued {
            Ok(()) => self.stats.forwarded_upstream += 1,
            Err(TrySendError::Full(_)) => {
                self.stats.dropped_datagrams += 1;
                warn!("upstream queue for {client} is full, datagram dropped");
            }
            // The session task is gone but its teardown event has not been
            // handled yet; start over with a new session.
            Err(TrySendError::Closed(bytes)) => {
                drop(self.sessions.remove(&client));
                self.open_session(client, bytes);
            }
        }
    }

    fn open_session(&mut self, client: SocketAddr, first: Vec<u8>) {
        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(SESSION_QUEUE);

        // Queued before the socket exists; the task sends it once active.
        if outbound_tx.try_send(first).is_err() {
            return;
        }

        let task = tokio::spawn(session::run_session(
            client,
            id,
            self.upstream,
            outbound_rx,
            self.events_tx.clone(),
        ));

        self.sessions
            .insert(UdpSession::new(id, client, outbound_tx, task.abort_handle()));
        self.stats.sessions_created += 1;
        self.stats.forwarded_upstream += 1;

        info!("New session {id} for {client}");
    }

    fn handle_event(&mut self, event: SessionEvent, udp_tx: &Sender<(Vec<u8>, SocketAddr)>) {
        match event {
            SessionEvent::Active { client, id, local } => {
                if let Some(session) = self.sessions.current_mut(&client, id) {
                    session.state = SessionState::Active;
                    debug!("session {id} for {client} relaying from {local}");
                }
            }
            SessionEvent::Reply { client, id, data } => {
                if log_enabled!(Level::Debug) {
                    debug!(
                        "Inbound datagram for {client}...  {} bytes long\n{}",
                        data.len(),
                        hex::encode(&data)
                    );
                }

                self.sessions.touch(&client, id, Utc::now());

                match udp_tx.try_send((data, client)) {
                    Ok(()) => self.stats.forwarded_downstream += 1,
                    Err(_) => {
                        self.stats.dropped_datagrams += 1;
                        warn!("reply queue is full, datagram for {client} dropped");
                    }
                }
            }
            SessionEvent::Closed {
                client,
                id,
                error,
                dropped,
            } => {
                // Counted as forwarded when queued, but never sent.
                let dropped = dropped as u64;
                self.stats.forwarded_upstream =
                    self.stats.forwarded_upstream.saturating_sub(dropped);
                self.stats.dropped_datagrams += dropped;

                let session = match self.sessions.remove_if_current(&client, id) {
                    Some(s) => s,
                    None => return,
                };
                self.stats.sessions_closed += 1;

                match (session.state, error) {
                    (SessionState::Pending, error) => {
                        warn!("session {id} for {client} failed: {error}")
                    }
                    (SessionState::Active, error) => info!(
                        "session {id} for {client} closed after {}s: {error}",
                        (Utc::now() - session.created).num_seconds()
                    ),
                }
            }
        }
    }

    fn evict_idle(&mut self) {
        let idle = match self.idle_timeout.and_then(|idle| TimeDelta::from_std(idle).ok()) {
            Some(i) => i,
            None => return,
        };

        for session in self.sessions.evict_idle(Utc::now() - idle) {
            self.stats.sessions_evicted += 1;
            info!(
                "session {} for {} idle since {}, evicted",
                session.id, session.client, session.last_changed
            );
        }
    }
}

async fn tick(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn write_replies(socket: Arc<UdpSocket>, mut udp_rx: Receiver<(Vec<u8>, SocketAddr)>) {
    while let Some((bytes, addr)) = udp_rx.recv().await {
        match socket.send_to(&bytes, addr).await {
            Ok(len) => debug!("{len} bytes sent to {addr}"),
            Err(err) => error!("error on udp write to {addr}: {err}"),
        }
    }
}
