// Top-level coordinator state and request dispatch.
//
// `Coordinator` owns every registry plus the broadcaster and the PRNG as
// plain fields; there is no global state. The server's main thread holds the
// only instance and feeds it one event at a time, which is what serializes
// concurrent client actions.
//
// Each request runs in three steps:
//
// 1. The operation mutates state and queues any events it triggers into
//    `outbox` (nothing is written yet).
// 2. The `Reply` goes to the requesting connection.
// 3. The outbox is flushed to members' live connections.
//
// So a client always sees its reply before the fan-out its own request
// caused. Errors are answered only to the requester; bool operations reply
// `Ack { ok: false }`, everything else replies `Error { reason }`.
//
// Lobby fan-out is addressed by account: each member's current live
// connection is looked up at queue time, so offline members are skipped. A
// queued event carries its whole recipient list and goes out through
// `Broadcaster::fan_out` in one pass.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use party_dice_prng::DiceRng;
use party_dice_protocol::{
    AccountCode, DiceTier, LobbyCode, Reply, Request, RequestId, ServerMessage,
};

use crate::broadcast::{Broadcaster, ConnectionId};
use crate::error::CoordinatorError;
use crate::identity::IdentityRegistry;
use crate::invitations::InvitationDirectory;
use crate::lobby::LobbyRegistry;
use crate::session::{MinigameRound, RollOutcome, SessionCoordinator};

pub struct Coordinator {
    identities: IdentityRegistry,
    invitations: InvitationDirectory,
    lobbies: LobbyRegistry,
    sessions: SessionCoordinator,
    broadcaster: Broadcaster,
    rng: DiceRng,
    /// Idle window before an abandoned lobby is reaped. `None` keeps
    /// lobbies forever.
    lobby_ttl: Option<Duration>,
    /// Events held back until the current reply is written, each with the
    /// connections it is addressed to.
    outbox: Vec<(Vec<ConnectionId>, ServerMessage)>,
}

impl Coordinator {
    pub fn new(rng: DiceRng, turn_timeout: Option<Duration>, lobby_ttl: Option<Duration>) -> Self {
        Self {
            identities: IdentityRegistry::new(),
            invitations: InvitationDirectory::new(),
            lobbies: LobbyRegistry::new(),
            sessions: SessionCoordinator::new(turn_timeout),
            broadcaster: Broadcaster::new(),
            rng,
            lobby_ttl,
            outbox: Vec::new(),
        }
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn invitations(&self) -> &InvitationDirectory {
        &self.invitations
    }

    pub fn lobbies(&self) -> &LobbyRegistry {
        &self.lobbies
    }

    pub fn connection_count(&self) -> usize {
        self.broadcaster.connection_count()
    }

    /// Register the write half of a newly accepted connection.
    pub fn attach_connection(&mut self, connection: ConnectionId, stream: TcpStream) {
        self.broadcaster.attach(connection, stream);
        tracing::debug!(%connection, "connection attached");
    }

    /// A connection closed (EOF, read error, malformed frame, or Goodbye).
    /// Its account goes offline but keeps every lobby seat.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.broadcaster.detach(connection);
        if let Some(code) = self.identities.detach(connection) {
            tracing::info!(%connection, %code, "account went offline");
            self.queue_presence(&code);
        }
        self.flush();
    }

    /// Run one request to completion: apply it, reply to the caller, then
    /// deliver the events it queued. Returns the reply that was sent.
    pub fn handle(&mut self, connection: ConnectionId, id: RequestId, request: Request) -> Reply {
        let acked = answers_with_ack(&request);
        let reply = match self.apply(connection, request) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::debug!(%connection, kind = ?err.kind(), error = %err, "request rejected");
                self.outbox.clear();
                if acked && err != CoordinatorError::NotLoggedIn {
                    Reply::Ack { ok: false }
                } else {
                    Reply::Error {
                        reason: err.to_string(),
                    }
                }
            }
        };
        let msg = ServerMessage::Reply {
            id,
            reply: reply.clone(),
        };
        self.broadcaster.send_to(connection, &msg);
        self.flush();
        reply
    }

    /// Periodic sweep: auto-roll expired turns, then reap idle lobbies.
    pub fn tick(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for lobby in self.lobbies.iter_mut() {
            if let Some(outcome) = self.sessions.expire_turn(lobby, now, &mut self.rng) {
                expired.push((lobby.code.clone(), outcome));
            }
        }
        for (lobby_code, outcome) in expired {
            self.queue_roll(&lobby_code, outcome);
        }

        if let Some(ttl) = self.lobby_ttl {
            let identities = &self.identities;
            for lobby_code in self
                .lobbies
                .reap_idle(now, ttl, |member| identities.is_online(member))
            {
                self.invitations.forget_lobby(&lobby_code);
            }
        }
        self.flush();
    }

    fn apply(
        &mut self,
        connection: ConnectionId,
        request: Request,
    ) -> Result<Reply, CoordinatorError> {
        match request {
            Request::Login { code, display_name } => {
                let code = self.login(connection, code, display_name);
                Ok(Reply::LoggedIn { code })
            }
            Request::CreateLobby => {
                let caller = self.caller(connection)?;
                let lobby_code = self.lobbies.create(caller, &mut self.rng);
                self.queue_lobby_update(&lobby_code);
                Ok(Reply::LobbyCreated { lobby_code })
            }
            Request::InvitePlayer { lobby_code, target } => {
                let caller = self.caller(connection)?;
                self.invite(caller, lobby_code, target)?;
                Ok(Reply::Ack { ok: true })
            }
            Request::GetInvitations => {
                let caller = self.caller(connection)?;
                Ok(Reply::Invitations {
                    lobby_codes: self.invitations.list_for(&caller),
                })
            }
            Request::AcceptInvitation { lobby_code } => {
                let caller = self.caller(connection)?;
                self.lobbies.join(&lobby_code, &caller)?;
                self.invitations.consume(&caller, &lobby_code);
                self.queue_lobby_update(&lobby_code);
                Ok(Reply::Ack { ok: true })
            }
            Request::VoteMap { lobby_code, map } => {
                let caller = self.caller(connection)?;
                self.lobbies.vote_map(&lobby_code, &caller, map)?;
                self.queue_lobby_update(&lobby_code);
                Ok(Reply::Ack { ok: true })
            }
            Request::ChooseColor { lobby_code, color } => {
                let caller = self.caller(connection)?;
                self.lobbies.choose_color(&lobby_code, &caller, color)?;
                self.queue_lobby_update(&lobby_code);
                Ok(Reply::Ack { ok: true })
            }
            Request::StartGame { lobby_code } => {
                let caller = self.caller(connection)?;
                let lobby = self.lobbies.get_mut(&lobby_code)?;
                let start = self.sessions.start_game(lobby, &caller, &mut self.rng)?;
                self.queue_to_lobby(
                    &lobby_code,
                    ServerMessage::GameStarted {
                        map: start.map,
                        turn_order: start.turn_order,
                        colors: start.colors,
                    },
                );
                Ok(Reply::Ack { ok: true })
            }
            Request::RollDice { lobby_code, tier } => {
                let caller = self.caller(connection)?;
                let tier = DiceTier::parse(&tier);
                let lobby = self.lobbies.get_mut(&lobby_code)?;
                let rng = &mut self.rng;
                let outcome = self.sessions.roll_dice(lobby, &caller, tier, rng)?;
                let roll = outcome.roll;
                self.queue_roll(&lobby_code, outcome);
                Ok(Reply::Rolled { roll })
            }
            Request::SubmitMinigameResult { lobby_code, rank } => {
                let caller = self.caller(connection)?;
                let lobby = self.lobbies.get_mut(&lobby_code)?;
                let round = self.sessions.submit_minigame_result(lobby, &caller, rank)?;
                if let Some(round) = round {
                    self.queue_round(&lobby_code, round);
                }
                Ok(Reply::Ack { ok: true })
            }
        }
    }

    fn caller(&self, connection: ConnectionId) -> Result<AccountCode, CoordinatorError> {
        self.identities
            .account_for(connection)
            .cloned()
            .ok_or(CoordinatorError::NotLoggedIn)
    }

    fn login(
        &mut self,
        connection: ConnectionId,
        code: Option<AccountCode>,
        display_name: String,
    ) -> AccountCode {
        let previous = self.identities.account_for(connection).cloned();
        let code = self
            .identities
            .login(code, display_name, connection, &mut self.rng);
        if let Some(previous) = previous.filter(|p| *p != code) {
            self.queue_presence(&previous);
        }
        self.queue_presence(&code);
        code
    }

    fn invite(
        &mut self,
        from: AccountCode,
        lobby_code: LobbyCode,
        target: AccountCode,
    ) -> Result<(), CoordinatorError> {
        if self.lobbies.get(&lobby_code).is_none() {
            return Err(CoordinatorError::UnknownLobby(lobby_code));
        }
        if self.identities.resolve(&target).is_none() {
            return Err(CoordinatorError::UnknownAccount(target));
        }
        self.invitations.invite(&target, &lobby_code);
        tracing::debug!(lobby = %lobby_code, %from, %target, "invitation sent");
        if let Some(live) = self.identities.live_address(&target) {
            let msg = ServerMessage::InvitationReceived { lobby_code, from };
            self.outbox.push((vec![live], msg));
        }
        Ok(())
    }

    /// Queue `msg` for every online member of a lobby.
    fn queue_to_lobby(&mut self, lobby_code: &LobbyCode, msg: ServerMessage) {
        let Some(lobby) = self.lobbies.get(lobby_code) else {
            return;
        };
        let online: Vec<ConnectionId> = lobby
            .members()
            .iter()
            .filter_map(|member| self.identities.live_address(member))
            .collect();
        if !online.is_empty() {
            self.outbox.push((online, msg));
        }
    }

    fn queue_lobby_update(&mut self, lobby_code: &LobbyCode) {
        let Some(lobby) = self.lobbies.get(lobby_code) else {
            return;
        };
        let msg = ServerMessage::LobbyUpdate {
            lobby_code: lobby_code.clone(),
            lobby: lobby.snapshot(&self.identities),
        };
        self.queue_to_lobby(lobby_code, msg);
    }

    /// An account came online or went offline: refresh its lobbies.
    fn queue_presence(&mut self, code: &AccountCode) {
        for lobby_code in self.lobbies.codes_with_member(code) {
            self.queue_lobby_update(&lobby_code);
        }
    }

    fn queue_roll(&mut self, lobby_code: &LobbyCode, outcome: RollOutcome) {
        self.queue_to_lobby(
            lobby_code,
            ServerMessage::DiceRolled {
                player: outcome.player,
                roll: outcome.roll,
                tier: outcome.tier,
                auto: outcome.auto,
            },
        );
        self.queue_to_lobby(
            lobby_code,
            ServerMessage::TurnChanged {
                current_player: outcome.next_player,
            },
        );
    }

    fn queue_round(&mut self, lobby_code: &LobbyCode, round: MinigameRound) {
        self.queue_to_lobby(
            lobby_code,
            ServerMessage::MinigameResults {
                sorted: round.sorted,
                bonuses: round.bonuses,
            },
        );
    }

    fn flush(&mut self) {
        for (connections, msg) in std::mem::take(&mut self.outbox) {
            self.broadcaster.fan_out(connections, &msg);
        }
    }
}

/// Operations whose wire answer is a bare success flag.
fn answers_with_ack(request: &Request) -> bool {
    matches!(
        request,
        Request::InvitePlayer { .. }
            | Request::AcceptInvitation { .. }
            | Request::VoteMap { .. }
            | Request::ChooseColor { .. }
            | Request::StartGame { .. }
            | Request::SubmitMinigameResult { .. }
    )
}
