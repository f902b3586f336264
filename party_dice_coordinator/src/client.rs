// Blocking TCP client for the coordinator.
//
// Architecture:
// - `connect()` opens the TCP connection and spawns a background reader
//   thread that calls `recv_frame()` in a loop and pushes every
//   `ServerMessage` into an `mpsc` channel.
// - The calling thread holds a `BufWriter<TcpStream>` for sending.
// - `call()` numbers a request, sends it, and blocks on the channel until the
//   reply with the same id arrives. Events that show up in the meantime are
//   kept in order in a local queue for `poll_events()` / `wait_for_event()`.
//
// The coordinator writes a reply before any event its request triggers, so
// after `call()` returns, the events it caused are either already queued or
// about to arrive.
//
// Used by the integration tests and by anything embedding a player in-process.

use std::collections::VecDeque;
use std::io::{self, BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use party_dice_protocol::{
    AccountCode, ClientMessage, LobbyCode, Reply, Request, RequestId, ServerMessage, recv_frame,
    send_frame,
};

/// How long `call()` and `wait_for_event()` block by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error talking to coordinator: {0}")]
    Io(#[from] io::Error),
    #[error("coordinator closed the connection")]
    Closed,
    #[error("timed out waiting for the coordinator")]
    Timeout,
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(Reply),
    #[error("coordinator refused the request: {0}")]
    Refused(String),
}

/// TCP client for coordinator communication.
pub struct CoordinatorClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    events: VecDeque<ServerMessage>,
    next_id: u64,
    timeout: Duration,
}

impl CoordinatorClient {
    /// Connect and spawn the reader thread.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader = BufReader::new(stream.try_clone()?);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || reader_loop(reader, tx));

        Ok(Self {
            writer: BufWriter::new(stream),
            inbox: rx,
            events: VecDeque::new(),
            next_id: 1,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send one request and block until its reply arrives.
    pub fn call(&mut self, request: Request) -> Result<Reply, ClientError> {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        send_frame(&mut self.writer, &ClientMessage::Request { id, request })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match self.recv_until(deadline)? {
                ServerMessage::Reply { id: got, reply } if got == id => return Ok(reply),
                ServerMessage::Reply { id: stale, .. } => {
                    tracing::debug!(id = stale.0, "ignoring reply to an abandoned request");
                }
                event => self.events.push_back(event),
            }
        }
    }

    /// Log in, minting a new account when `code` is `None`.
    pub fn login(
        &mut self,
        code: Option<AccountCode>,
        display_name: &str,
    ) -> Result<AccountCode, ClientError> {
        match self.call(Request::Login {
            code,
            display_name: display_name.into(),
        })? {
            Reply::LoggedIn { code } => Ok(code),
            other => Err(unexpected(other)),
        }
    }

    pub fn create_lobby(&mut self) -> Result<LobbyCode, ClientError> {
        match self.call(Request::CreateLobby)? {
            Reply::LobbyCreated { lobby_code } => Ok(lobby_code),
            other => Err(unexpected(other)),
        }
    }

    pub fn invite(
        &mut self,
        lobby_code: &LobbyCode,
        target: &AccountCode,
    ) -> Result<bool, ClientError> {
        self.call_ack(Request::InvitePlayer {
            lobby_code: lobby_code.clone(),
            target: target.clone(),
        })
    }

    pub fn invitations(&mut self) -> Result<Vec<LobbyCode>, ClientError> {
        match self.call(Request::GetInvitations)? {
            Reply::Invitations { lobby_codes } => Ok(lobby_codes),
            other => Err(unexpected(other)),
        }
    }

    pub fn accept_invitation(&mut self, lobby_code: &LobbyCode) -> Result<bool, ClientError> {
        self.call_ack(Request::AcceptInvitation {
            lobby_code: lobby_code.clone(),
        })
    }

    pub fn vote_map(&mut self, lobby_code: &LobbyCode, map: &str) -> Result<bool, ClientError> {
        self.call_ack(Request::VoteMap {
            lobby_code: lobby_code.clone(),
            map: map.into(),
        })
    }

    pub fn choose_color(
        &mut self,
        lobby_code: &LobbyCode,
        color: &str,
    ) -> Result<bool, ClientError> {
        self.call_ack(Request::ChooseColor {
            lobby_code: lobby_code.clone(),
            color: color.into(),
        })
    }

    pub fn start_game(&mut self, lobby_code: &LobbyCode) -> Result<bool, ClientError> {
        self.call_ack(Request::StartGame {
            lobby_code: lobby_code.clone(),
        })
    }

    /// Roll for this player's turn. An out-of-turn roll comes back as
    /// `ClientError::Refused("not your turn")`.
    pub fn roll_dice(&mut self, lobby_code: &LobbyCode, tier: &str) -> Result<u8, ClientError> {
        match self.call(Request::RollDice {
            lobby_code: lobby_code.clone(),
            tier: tier.into(),
        })? {
            Reply::Rolled { roll } => Ok(roll),
            other => Err(unexpected(other)),
        }
    }

    /// Report this player's placement in the current minigame round. Lower
    /// is better; negative and fractional ranks are fine.
    pub fn submit_minigame_result(
        &mut self,
        lobby_code: &LobbyCode,
        rank: f64,
    ) -> Result<bool, ClientError> {
        self.call_ack(Request::SubmitMinigameResult {
            lobby_code: lobby_code.clone(),
            rank,
        })
    }

    /// Drain every event received so far without blocking.
    pub fn poll_events(&mut self) -> Vec<ServerMessage> {
        while let Ok(msg) = self.inbox.try_recv() {
            self.events.push_back(msg);
        }
        self.events.drain(..).collect()
    }

    /// Block until an event matching `pred` arrives. Earlier non-matching
    /// events stay queued in order.
    pub fn wait_for_event<F>(&mut self, pred: F) -> Result<ServerMessage, ClientError>
    where
        F: Fn(&ServerMessage) -> bool,
    {
        if let Some(pos) = self.events.iter().position(&pred) {
            return self.events.remove(pos).ok_or(ClientError::Closed);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            let msg = self.recv_until(deadline)?;
            if pred(&msg) {
                return Ok(msg);
            }
            self.events.push_back(msg);
        }
    }

    /// Send Goodbye and drop the connection.
    pub fn goodbye(mut self) {
        let _ = send_frame(&mut self.writer, &ClientMessage::Goodbye);
    }

    fn call_ack(&mut self, request: Request) -> Result<bool, ClientError> {
        match self.call(request)? {
            Reply::Ack { ok } => Ok(ok),
            other => Err(unexpected(other)),
        }
    }

    fn recv_until(&self, deadline: Instant) -> Result<ServerMessage, ClientError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.inbox.recv_timeout(remaining).map_err(|e| match e {
            RecvTimeoutError::Timeout => ClientError::Timeout,
            RecvTimeoutError::Disconnected => ClientError::Closed,
        })
    }
}

fn unexpected(reply: Reply) -> ClientError {
    match reply {
        Reply::Error { reason } => ClientError::Refused(reason),
        other => ClientError::UnexpectedReply(other),
    }
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    loop {
        match recv_frame::<_, ServerMessage>(&mut reader) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Client dropped the receiver.
                }
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::warn!(error = %e, "coordinator connection failed");
                }
                break;
            }
        }
    }
}
