use crate::data::udpstruct::{SessionError, SessionEvent};

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use log::{debug, warn};

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{Receiver, Sender};

use uuid::Uuid;

/// Largest datagram relayed in either direction.
pub const MAX_DATAGRAM: usize = 65_536;

/// Opens a fresh socket on an ephemeral local port, connected to the
/// shared upstream endpoint.
pub async fn open_upstream(upstream: SocketAddr) -> std::io::Result<UdpSocket> {
    let local: SocketAddr = match upstream {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(upstream).await?;

    return Ok(socket);
}

/// Runs one client's upstream session until its socket fails or the
/// multiplexer drops the queue.
///
/// Datagrams queued in `outbound` are sent upstream in order, including
/// any that arrived while the socket was still being opened. Replies are
/// sent back as [`SessionEvent::Reply`] tagged with `client`.
pub async fn run_session(
    client: SocketAddr,
    id: Uuid,
    upstream: SocketAddr,
    mut outbound: Receiver<Vec<u8>>,
    events: Sender<SessionEvent>,
) {
    let error = match relay(client, id, upstream, &mut outbound, &events).await {
        Ok(()) => {
            debug!("session {id} for {client} released");
            return;
        }
        Err(e) => e,
    };

    // Later datagrams from this client see a closed queue and go to a
    // new session instead.
    outbound.close();
    let mut dropped = 0;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }

    if dropped > 0 {
        warn!("dropping {dropped} queued datagram(s) from {client}: {error}");
    }

    let _ = events
        .send(SessionEvent::Closed {
            client,
            id,
            error,
            dropped,
        })
        .await;
}

async fn relay(
    client: SocketAddr,
    id: Uuid,
    upstream: SocketAddr,
    outbound: &mut Receiver<Vec<u8>>,
    events: &Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let socket = open_upstream(upstream).await.map_err(SessionError::Create)?;
    let local = socket.local_addr().map_err(SessionError::Create)?;

    if events
        .send(SessionEvent::Active { client, id, local })
        .await
        .is_err()
    {
        return Ok(());
    }

    let mut buff = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let bytes = match outgoing {
                    Some(b) => b,
                    None => return Ok(()),
                };

                socket.send(&bytes).await.map_err(SessionError::Transport)?;
            }
            incoming = socket.recv(&mut buff) => {
                let len = incoming.map_err(SessionError::Transport)?;

                let reply = SessionEvent::Reply {
                    client,
                    id,
                    data: buff[..len].to_vec(),
                };

                if events.send(reply).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
