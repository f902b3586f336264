// Lobby records and the registry that owns them.
//
// A `Lobby` is both the pre-game assembly room and, once started, the live
// game's authoritative state. It moves through two phases:
//
//   Forming: members can join, vote for a map, and claim a color.
//   Active: the map and turn order are frozen; `session.rs` cycles the
//           turn index and runs minigame rounds on this same record.
//
// There is no way back from Active. `LobbyRegistry` handles the Forming-phase
// mutations and enforces membership: only members vote or pick colors, so
// vote keys always stay a subset of `members`. Joining an Active lobby is
// refused because the turn order must remain a permutation of the members.
//
// Lobbies are reaped by `reap_idle` once nobody has touched them for the
// configured idle window and none of their members is online.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use party_dice_prng::DiceRng;
use party_dice_protocol::{AccountCode, LobbyCode, LobbySnapshot, MemberInfo, MinigameEntry};

use crate::error::CoordinatorError;
use crate::identity::{CODE_ALPHABET, IdentityRegistry};

/// Length of a minted lobby code.
pub const LOBBY_CODE_LEN: usize = 4;

/// Lifecycle phase of a lobby.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LobbyPhase {
    Forming,
    Active(ActiveGame),
}

/// State frozen or cycled once the host starts the game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveGame {
    pub map: String,
    /// Permutation of the lobby members fixed at start.
    pub turn_order: Vec<AccountCode>,
    /// Always a valid index into `turn_order`.
    pub current_turn: usize,
    /// When the current player received the turn.
    pub turn_started_at: Instant,
}

impl ActiveGame {
    pub fn current_player(&self) -> &AccountCode {
        &self.turn_order[self.current_turn]
    }

    /// Pass the turn to the next player in order and return them.
    pub fn advance(&mut self, now: Instant) -> &AccountCode {
        self.current_turn = (self.current_turn + 1) % self.turn_order.len();
        self.turn_started_at = now;
        self.current_player()
    }
}

#[derive(Clone, Debug)]
pub struct Lobby {
    pub code: LobbyCode,
    pub host: AccountCode,
    pub(crate) members: Vec<AccountCode>,
    pub(crate) map_votes: BTreeMap<AccountCode, String>,
    pub(crate) colors: BTreeMap<AccountCode, String>,
    pub(crate) phase: LobbyPhase,
    pub(crate) pending_results: Vec<MinigameEntry>,
    pub(crate) last_activity: Instant,
}

impl Lobby {
    fn new(code: LobbyCode, host: AccountCode) -> Self {
        Self {
            code,
            members: vec![host.clone()],
            host,
            map_votes: BTreeMap::new(),
            colors: BTreeMap::new(),
            phase: LobbyPhase::Forming,
            pending_results: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn members(&self) -> &[AccountCode] {
        &self.members
    }

    pub fn is_member(&self, code: &AccountCode) -> bool {
        self.members.contains(code)
    }

    pub fn map_votes(&self) -> &BTreeMap<AccountCode, String> {
        &self.map_votes
    }

    pub fn colors(&self) -> &BTreeMap<AccountCode, String> {
        &self.colors
    }

    pub fn is_started(&self) -> bool {
        matches!(self.phase, LobbyPhase::Active(_))
    }

    pub fn active(&self) -> Option<&ActiveGame> {
        match &self.phase {
            LobbyPhase::Active(game) => Some(game),
            LobbyPhase::Forming => None,
        }
    }

    pub fn current_player(&self) -> Option<&AccountCode> {
        self.active().map(ActiveGame::current_player)
    }

    pub fn pending_results(&self) -> &[MinigameEntry] {
        &self.pending_results
    }

    /// Record an accepted mutation for idle tracking.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Error unless `code` is a member.
    pub fn require_member(&self, code: &AccountCode) -> Result<(), CoordinatorError> {
        if self.is_member(code) {
            Ok(())
        } else {
            Err(CoordinatorError::NotAMember {
                account: code.clone(),
                lobby: self.code.clone(),
            })
        }
    }

    fn require_forming(&self) -> Result<(), CoordinatorError> {
        if self.is_started() {
            Err(CoordinatorError::AlreadyStarted(self.code.clone()))
        } else {
            Ok(())
        }
    }

    /// Wire view of this lobby, with display names and online flags from
    /// the identity registry.
    pub fn snapshot(&self, identities: &IdentityRegistry) -> LobbySnapshot {
        let members = self
            .members
            .iter()
            .map(|code| {
                let account = identities.resolve(code);
                MemberInfo {
                    code: code.clone(),
                    display_name: account.map(|a| a.display_name.clone()).unwrap_or_default(),
                    online: account.is_some_and(|a| a.live.is_some()),
                }
            })
            .collect();
        let active = self.active();
        LobbySnapshot {
            host: self.host.clone(),
            members,
            map_votes: self.map_votes.clone(),
            colors: self.colors.clone(),
            started: active.is_some(),
            chosen_map: active.map(|g| g.map.clone()),
            turn_order: active.map(|g| g.turn_order.clone()).unwrap_or_default(),
            current_player: active.map(|g| g.current_player().clone()),
            pending_results: self.pending_results.len(),
        }
    }
}

/// Owner of every lobby record.
#[derive(Default)]
pub struct LobbyRegistry {
    lobbies: BTreeMap<LobbyCode, Lobby>,
}

impl LobbyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new Forming lobby with `host` as its only member.
    pub fn create(&mut self, host: AccountCode, rng: &mut DiceRng) -> LobbyCode {
        let code = loop {
            let candidate = LobbyCode(rng.code(CODE_ALPHABET, LOBBY_CODE_LEN));
            if !self.lobbies.contains_key(&candidate) {
                break candidate;
            }
        };
        tracing::info!(lobby = %code, %host, "lobby created");
        let lobby = Lobby::new(code.clone(), host);
        self.lobbies.insert(code.clone(), lobby);
        code
    }

    pub fn get(&self, code: &LobbyCode) -> Option<&Lobby> {
        self.lobbies.get(code)
    }

    pub fn get_mut(&mut self, code: &LobbyCode) -> Result<&mut Lobby, CoordinatorError> {
        self.lobbies
            .get_mut(code)
            .ok_or_else(|| CoordinatorError::UnknownLobby(code.clone()))
    }

    /// Add `member` to a lobby. Joining twice is a no-op success; joining a
    /// started game as a newcomer is refused. No capacity limit.
    pub fn join(
        &mut self,
        lobby_code: &LobbyCode,
        member: &AccountCode,
    ) -> Result<&Lobby, CoordinatorError> {
        let lobby = self.get_mut(lobby_code)?;
        if !lobby.is_member(member) {
            lobby.require_forming()?;
            lobby.members.push(member.clone());
            tracing::info!(lobby = %lobby_code, %member, "member joined");
        }
        lobby.touch();
        Ok(&*lobby)
    }

    /// Record or overwrite `member`'s map vote.
    pub fn vote_map(
        &mut self,
        lobby_code: &LobbyCode,
        member: &AccountCode,
        map: String,
    ) -> Result<&Lobby, CoordinatorError> {
        let lobby = self.get_mut(lobby_code)?;
        lobby.require_member(member)?;
        lobby.require_forming()?;
        lobby.map_votes.insert(member.clone(), map);
        lobby.touch();
        Ok(&*lobby)
    }

    /// Claim a color. First writer wins: a color already held by anyone in
    /// the lobby is refused. A member's previous color is released.
    pub fn choose_color(
        &mut self,
        lobby_code: &LobbyCode,
        member: &AccountCode,
        color: String,
    ) -> Result<&Lobby, CoordinatorError> {
        let lobby = self.get_mut(lobby_code)?;
        lobby.require_member(member)?;
        lobby.require_forming()?;
        if lobby.colors.values().any(|taken| *taken == color) {
            return Err(CoordinatorError::ColorTaken(color));
        }
        lobby.colors.insert(member.clone(), color);
        lobby.touch();
        Ok(&*lobby)
    }

    /// Codes of every lobby `member` belongs to.
    pub fn codes_with_member(&self, member: &AccountCode) -> Vec<LobbyCode> {
        self.lobbies
            .values()
            .filter(|lobby| lobby.is_member(member))
            .map(|lobby| lobby.code.clone())
            .collect()
    }

    /// Every lobby, for periodic sweeps.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Lobby> {
        self.lobbies.values_mut()
    }

    /// Remove lobbies idle for at least `max_idle` whose members are all
    /// offline. Returns the removed codes.
    pub fn reap_idle(
        &mut self,
        now: Instant,
        max_idle: Duration,
        is_online: impl Fn(&AccountCode) -> bool,
    ) -> Vec<LobbyCode> {
        let mut reaped = Vec::new();
        self.lobbies.retain(|code, lobby| {
            let idle = now.duration_since(lobby.last_activity) >= max_idle;
            let abandoned = !lobby.members.iter().any(&is_online);
            if idle && abandoned {
                reaped.push(code.clone());
                false
            } else {
                true
            }
        });
        for code in &reaped {
            tracing::info!(lobby = %code, "idle lobby reaped");
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }
}
