// Protocol messages exchanged between clients and the coordinator.
//
// - `ClientMessage`: a numbered `Request` or a graceful `Goodbye`.
// - `ServerMessage`: either the `Reply` to one request (sent only to the
//   requesting connection) or a fire-and-forget event fanned out to lobby
//   members.
//
// The coordinator always writes a request's `Reply` before any event that
// request triggers, so a client that blocks on its reply sees the events
// afterwards in order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{AccountCode, BonusTier, DiceTier, LobbyCode, RequestId};

/// Frames sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// A request expecting exactly one `ServerMessage::Reply` with the same id.
    Request { id: RequestId, request: Request },
    /// Client is disconnecting on purpose.
    Goodbye,
}

/// Operations a client can ask the coordinator to perform. Every variant
/// except `Login` acts as the account the connection last logged in as.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Register (no code) or re-attach (existing code) an account.
    Login {
        code: Option<AccountCode>,
        display_name: String,
    },
    CreateLobby,
    InvitePlayer {
        lobby_code: LobbyCode,
        target: AccountCode,
    },
    GetInvitations,
    AcceptInvitation {
        lobby_code: LobbyCode,
    },
    VoteMap {
        lobby_code: LobbyCode,
        map: String,
    },
    ChooseColor {
        lobby_code: LobbyCode,
        color: String,
    },
    StartGame {
        lobby_code: LobbyCode,
    },
    /// `tier` is free text; unknown names roll a normal die.
    RollDice {
        lobby_code: LobbyCode,
        tier: String,
    },
    /// Lower rank is a better placement. Any JSON number is accepted,
    /// including negative and fractional places.
    SubmitMinigameResult {
        lobby_code: LobbyCode,
        rank: f64,
    },
}

/// Answer to a single request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Account code bound to this connection by `Login`.
    LoggedIn { code: AccountCode },
    LobbyCreated { lobby_code: LobbyCode },
    /// Outcome of a yes/no operation.
    Ack { ok: bool },
    Invitations { lobby_codes: Vec<LobbyCode> },
    Rolled { roll: u8 },
    Error { reason: String },
}

/// Frames sent by the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Reply {
        id: RequestId,
        reply: Reply,
    },
    /// Pushed to an invitee that is online when the invitation is made.
    InvitationReceived {
        lobby_code: LobbyCode,
        from: AccountCode,
    },
    /// Full lobby state after any accepted pre-game mutation.
    LobbyUpdate {
        lobby_code: LobbyCode,
        lobby: LobbySnapshot,
    },
    GameStarted {
        map: String,
        turn_order: Vec<AccountCode>,
        colors: BTreeMap<AccountCode, String>,
    },
    /// `auto` is set when the coordinator rolled for a player whose turn
    /// deadline passed.
    DiceRolled {
        player: AccountCode,
        roll: u8,
        tier: DiceTier,
        auto: bool,
    },
    TurnChanged {
        current_player: AccountCode,
    },
    MinigameResults {
        sorted: Vec<MinigameEntry>,
        bonuses: BTreeMap<AccountCode, BonusTier>,
    },
}

/// One member's submission in a minigame round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinigameEntry {
    pub player: AccountCode,
    pub rank: f64,
}

/// Public view of a lobby member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub code: AccountCode,
    pub display_name: String,
    pub online: bool,
}

/// Everything a client needs to render a lobby.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub host: AccountCode,
    pub members: Vec<MemberInfo>,
    pub map_votes: BTreeMap<AccountCode, String>,
    pub colors: BTreeMap<AccountCode, String>,
    pub started: bool,
    pub chosen_map: Option<String>,
    pub turn_order: Vec<AccountCode>,
    pub current_player: Option<AccountCode>,
    pub pending_results: usize,
}
