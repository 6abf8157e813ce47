use std::io;
use std::net::SocketAddr;

use chrono::prelude::*;

use thiserror::Error;

use tokio::sync::mpsc::Sender;
use tokio::task::AbortHandle;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upstream socket is still being opened; datagrams queue up.
    Pending,
    Active,
}

/// One client's relay state: the sending half of its upstream task's queue.
///
/// Dropping the session aborts the task, which closes its upstream socket.
pub struct UdpSession {
    pub id: Uuid,
    pub client: SocketAddr,
    pub state: SessionState,
    pub outbound: Sender<Vec<u8>>,
    pub created: DateTime<Utc>,
    pub last_changed: DateTime<Utc>,
    task: AbortHandle,
}

impl UdpSession {
    pub fn new(id: Uuid, client: SocketAddr, outbound: Sender<Vec<u8>>, task: AbortHandle) -> Self {
        let now = Utc::now();

        return UdpSession {
            id,
            client,
            state: SessionState::Pending,
            outbound,
            created: now,
            last_changed: now,
            task,
        };
    }
}

impl UdpSession {
    /// Stops the session task; its socket closes and its queue is dropped.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for UdpSession {
    fn drop(&mut self) {
        self.abort();
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot open upstream socket: {0}")]
    Create(io::Error),
    #[error("upstream transport error: {0}")]
    Transport(io::Error),
}

/// Messages from a session task back to the multiplexer. Every event is
/// tagged with the session's own client address and id.
#[derive(Debug)]
pub enum SessionEvent {
    Active {
        client: SocketAddr,
        id: Uuid,
        local: SocketAddr,
    },
    Reply {
        client: SocketAddr,
        id: Uuid,
        data: Vec<u8>,
    },
    Closed {
        client: SocketAddr,
        id: Uuid,
        error: SessionError,
        /// Datagrams still queued for upstream when the session ended.
        dropped: usize,
    },
}
