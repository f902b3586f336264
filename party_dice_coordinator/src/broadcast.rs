// Outbound fan-out to live client connections.
//
// `Broadcaster` owns the write half of every attached TCP connection, keyed
// by the `ConnectionId` the server assigned at accept time. It is the only
// writer to client sockets, and it is only ever driven from the server's
// main thread, so it needs no locking.
//
// Write failures are logged and swallowed. A broken socket is detected by the
// connection's reader thread, which reports the disconnect through the normal
// event channel; the broadcaster never tears connections down on its own.

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufWriter;
use std::net::TcpStream;

use party_dice_protocol::{ServerMessage, send_frame};

/// Server-assigned handle for one client connection (an account's live
/// delivery address).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Write halves of all attached connections.
#[derive(Default)]
pub struct Broadcaster {
    writers: BTreeMap<ConnectionId, BufWriter<TcpStream>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering to `connection` through `stream`.
    pub fn attach(&mut self, connection: ConnectionId, stream: TcpStream) {
        self.writers.insert(connection, BufWriter::new(stream));
    }

    /// Stop delivering to `connection`. Returns whether it was attached.
    pub fn detach(&mut self, connection: ConnectionId) -> bool {
        self.writers.remove(&connection).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.writers.len()
    }

    /// Send one message to one connection. Unattached connections are
    /// skipped silently.
    pub fn send_to(&mut self, connection: ConnectionId, msg: &ServerMessage) {
        let Some(writer) = self.writers.get_mut(&connection) else {
            return;
        };
        if let Err(e) = send_frame(writer, msg) {
            tracing::warn!(%connection, error = %e, "write to client failed");
        }
    }

    /// Send the same message to every listed connection, in order.
    pub fn fan_out<I>(&mut self, connections: I, msg: &ServerMessage)
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        for connection in connections {
            self.send_to(connection, msg);
        }
    }
}
