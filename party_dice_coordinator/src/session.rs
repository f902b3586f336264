// Game rules for a started lobby.
//
// `SessionCoordinator` promotes a Forming lobby into an Active game and then
// arbitrates two protocols on that same record:
//
// - Turns: only `turn_order[current_turn]` may roll. A roll draws from the
//   chosen tier's faces and passes the turn on. The roll is not applied to any
//   board; this module only decides whose turn it is and what they rolled.
// - Minigame rounds: every member submits a rank once per round. When the
//   last submission arrives, results are stably sorted by rank and the top
//   three earn gold, silver and bronze bonus dice.
//
// Optional turn deadline: if a player holds the turn longer than
// `turn_timeout`, `expire_turn` rolls a normal die for them so an absent
// player cannot stall the table forever.
//
// All methods are synchronous state transitions. They return what happened
// and leave fan-out to the caller, which owns the connections.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use party_dice_prng::DiceRng;
use party_dice_protocol::{AccountCode, BonusTier, DiceTier, MinigameEntry};

use crate::error::CoordinatorError;
use crate::lobby::{ActiveGame, Lobby, LobbyPhase};

/// What `start_game` decided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameStart {
    pub map: String,
    pub turn_order: Vec<AccountCode>,
    pub colors: BTreeMap<AccountCode, String>,
}

/// One resolved roll and the turn hand-off that followed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollOutcome {
    pub player: AccountCode,
    pub tier: DiceTier,
    pub roll: u8,
    pub next_player: AccountCode,
    /// Rolled by the coordinator after the turn deadline passed.
    pub auto: bool,
}

/// A completed minigame round.
#[derive(Clone, Debug, PartialEq)]
pub struct MinigameRound {
    pub sorted: Vec<MinigameEntry>,
    pub bonuses: BTreeMap<AccountCode, BonusTier>,
}

pub struct SessionCoordinator {
    turn_timeout: Option<Duration>,
}

impl SessionCoordinator {
    /// `turn_timeout` of `None` lets a turn last forever.
    pub fn new(turn_timeout: Option<Duration>) -> Self {
        Self { turn_timeout }
    }

    /// Host-only transition from Forming to Active.
    ///
    /// Requires a map vote from every member. The map with the most votes
    /// wins; ties are broken uniformly among the tied maps only. Turn order
    /// is a uniformly random permutation of the members.
    pub fn start_game(
        &self,
        lobby: &mut Lobby,
        requester: &AccountCode,
        rng: &mut DiceRng,
    ) -> Result<GameStart, CoordinatorError> {
        if *requester != lobby.host {
            return Err(CoordinatorError::NotHost);
        }
        if lobby.is_started() {
            return Err(CoordinatorError::AlreadyStarted(lobby.code.clone()));
        }
        let votes = &lobby.map_votes;
        if lobby.members.iter().any(|m| !votes.contains_key(m)) {
            return Err(CoordinatorError::VotesIncomplete);
        }

        let leaders = most_voted(votes);
        let map = rng
            .pick(&leaders)
            .map(|m| (*m).to_owned())
            .ok_or(CoordinatorError::VotesIncomplete)?;

        let mut turn_order = lobby.members.clone();
        rng.shuffle(&mut turn_order);

        lobby.phase = LobbyPhase::Active(ActiveGame {
            map: map.clone(),
            turn_order: turn_order.clone(),
            current_turn: 0,
            turn_started_at: Instant::now(),
        });
        lobby.touch();
        tracing::info!(lobby = %lobby.code, %map, players = turn_order.len(), "game started");

        Ok(GameStart {
            map,
            turn_order,
            colors: lobby.colors.clone(),
        })
    }

    /// Roll for the current player and pass the turn.
    ///
    /// Fails with `NotYourTurn`, leaving the turn index untouched, if the
    /// game has not started or `requester` does not hold the turn.
    pub fn roll_dice(
        &self,
        lobby: &mut Lobby,
        requester: &AccountCode,
        tier: DiceTier,
        rng: &mut DiceRng,
    ) -> Result<RollOutcome, CoordinatorError> {
        let LobbyPhase::Active(game) = &mut lobby.phase else {
            return Err(CoordinatorError::NotYourTurn);
        };
        if game.current_player() != requester {
            return Err(CoordinatorError::NotYourTurn);
        }
        let outcome = take_turn(game, tier, false, rng);
        lobby.touch();
        tracing::debug!(
            lobby = %lobby.code,
            player = %outcome.player,
            tier = tier.as_str(),
            roll = outcome.roll,
            "dice rolled"
        );
        Ok(outcome)
    }

    /// Auto-roll a normal die for a player who has held the turn past the
    /// deadline. Returns `None` when there is no deadline, the lobby has not
    /// started, or the turn is still fresh.
    pub fn expire_turn(
        &self,
        lobby: &mut Lobby,
        now: Instant,
        rng: &mut DiceRng,
    ) -> Option<RollOutcome> {
        let timeout = self.turn_timeout?;
        let LobbyPhase::Active(game) = &mut lobby.phase else {
            return None;
        };
        if now.duration_since(game.turn_started_at) < timeout {
            return None;
        }
        let outcome = take_turn(game, DiceTier::Normal, true, rng);
        // Keep the deadline anchored to the sweep time, not the wall clock.
        game.turn_started_at = now;
        tracing::info!(
            lobby = %lobby.code,
            player = %outcome.player,
            roll = outcome.roll,
            "turn deadline passed, rolled on player's behalf"
        );
        Some(outcome)
    }

    /// Record one member's minigame placement. Returns the finished round
    /// once every member has submitted, and resets for the next round.
    pub fn submit_minigame_result(
        &self,
        lobby: &mut Lobby,
        member: &AccountCode,
        rank: f64,
    ) -> Result<Option<MinigameRound>, CoordinatorError> {
        lobby.require_member(member)?;
        if lobby.pending_results.iter().any(|e| e.player == *member) {
            return Err(CoordinatorError::AlreadySubmitted(member.clone()));
        }
        lobby.pending_results.push(MinigameEntry {
            player: member.clone(),
            rank,
        });
        lobby.touch();

        if lobby.pending_results.len() < lobby.members.len() {
            return Ok(None);
        }

        let round = rank_round(std::mem::take(&mut lobby.pending_results));
        tracing::info!(
            lobby = %lobby.code,
            entries = round.sorted.len(),
            "minigame round resolved"
        );
        Ok(Some(round))
    }
}

/// Draw a roll for the current player and advance the turn.
fn take_turn(game: &mut ActiveGame, tier: DiceTier, auto: bool, rng: &mut DiceRng) -> RollOutcome {
    let (low, high) = tier.faces();
    let roll = rng.roll_between(low, high);
    let player = game.current_player().clone();
    let next_player = game.advance(Instant::now()).clone();
    RollOutcome {
        player,
        tier,
        roll,
        next_player,
        auto,
    }
}

/// Every map sharing the highest vote count, in map-name order.
fn most_voted(votes: &BTreeMap<AccountCode, String>) -> Vec<&str> {
    let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
    for map in votes.values() {
        *tally.entry(map.as_str()).or_default() += 1;
    }
    let max_count = tally.values().copied().max().unwrap_or(0);
    tally
        .into_iter()
        .filter(|(_, count)| *count == max_count)
        .map(|(map, _)| map)
        .collect()
}

/// Stable sort by ascending rank (arrival order breaks ties) and hand out
/// bonus dice to the top three.
fn rank_round(mut entries: Vec<MinigameEntry>) -> MinigameRound {
    entries.sort_by(|a, b| a.rank.total_cmp(&b.rank));
    let bonuses = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| Some((e.player.clone(), BonusTier::for_placement(i)?)))
        .collect();
    MinigameRound {
        sorted: entries,
        bonuses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::LobbyRegistry;
    use party_dice_protocol::LobbyCode;

    fn account(code: &str) -> AccountCode {
        AccountCode::new(code)
    }

    /// A Forming lobby hosted by `members[0]` with the others joined.
    fn lobby_with(members: &[&str]) -> (LobbyRegistry, LobbyCode) {
        let mut registry = LobbyRegistry::new();
        let code = registry.create(account(members[0]), &mut DiceRng::new(99));
        for m in &members[1..] {
            registry.join(&code, &account(m)).unwrap();
        }
        (registry, code)
    }

    fn vote_all(registry: &mut LobbyRegistry, code: &LobbyCode, votes: &[(&str, &str)]) {
        for (member, map) in votes {
            registry
                .vote_map(code, &account(member), (*map).into())
                .unwrap();
        }
    }

    /// Start a game and return the registry, code, and start details.
    fn started(members: &[&str], seed: u64) -> (LobbyRegistry, LobbyCode, GameStart) {
        let (mut registry, code) = lobby_with(members);
        let votes: Vec<(&str, &str)> = members.iter().map(|m| (*m, "forest")).collect();
        vote_all(&mut registry, &code, &votes);
        let sessions = SessionCoordinator::new(None);
        let start = sessions
            .start_game(
                registry.get_mut(&code).unwrap(),
                &account(members[0]),
                &mut DiceRng::new(seed),
            )
            .unwrap();
        (registry, code, start)
    }

    fn submit(
        sessions: &SessionCoordinator,
        lobby: &mut Lobby,
        member: &str,
        rank: f64,
    ) -> Result<Option<MinigameRound>, CoordinatorError> {
        sessions.submit_minigame_result(lobby, &account(member), rank)
    }

    fn placements(round: &MinigameRound) -> Vec<&str> {
        round.sorted.iter().map(|e| e.player.as_str()).collect()
    }

    #[test]
    fn start_requires_host() {
        let (mut registry, code) = lobby_with(&["AAAAA", "BBBBB"]);
        vote_all(&mut registry, &code, &[("AAAAA", "x"), ("BBBBB", "x")]);
        let sessions = SessionCoordinator::new(None);
        let err = sessions
            .start_game(
                registry.get_mut(&code).unwrap(),
                &account("BBBBB"),
                &mut DiceRng::new(1),
            )
            .unwrap_err();
        assert_eq!(err, CoordinatorError::NotHost);
        assert!(!registry.get(&code).unwrap().is_started());
    }

    #[test]
    fn start_fails_until_everyone_voted() {
        let (mut registry, code) = lobby_with(&["AAAAA", "BBBBB", "CCCCC"]);
        vote_all(&mut registry, &code, &[("AAAAA", "x"), ("BBBBB", "y")]);
        let sessions = SessionCoordinator::new(None);
        for seed in 0..20 {
            let err = sessions
                .start_game(
                    registry.get_mut(&code).unwrap(),
                    &account("AAAAA"),
                    &mut DiceRng::new(seed),
                )
                .unwrap_err();
            assert_eq!(err, CoordinatorError::VotesIncomplete);
        }
        assert!(!registry.get(&code).unwrap().is_started());
    }

    #[test]
    fn start_twice_is_rejected() {
        let (mut registry, code, _) = started(&["AAAAA"], 1);
        let sessions = SessionCoordinator::new(None);
        let err = sessions
            .start_game(
                registry.get_mut(&code).unwrap(),
                &account("AAAAA"),
                &mut DiceRng::new(2),
            )
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyStarted(_)));
    }

    #[test]
    fn majority_map_wins() {
        let sessions = SessionCoordinator::new(None);
        for seed in 0..50 {
            let (mut registry, code) = lobby_with(&["AAAAA", "BBBBB", "CCCCC"]);
            vote_all(
                &mut registry,
                &code,
                &[("AAAAA", "x"), ("BBBBB", "y"), ("CCCCC", "x")],
            );
            let start = sessions
                .start_game(
                    registry.get_mut(&code).unwrap(),
                    &account("AAAAA"),
                    &mut DiceRng::new(seed),
                )
                .unwrap();
            assert_eq!(start.map, "x");
        }
    }

    #[test]
    fn tied_maps_split_roughly_evenly() {
        let sessions = SessionCoordinator::new(None);
        let mut rng = DiceRng::new(2024);
        let trials = 2_000;
        let mut x_wins = 0;
        for _ in 0..trials {
            let (mut registry, code) = lobby_with(&["AAAAA", "BBBBB"]);
            vote_all(&mut registry, &code, &[("AAAAA", "x"), ("BBBBB", "y")]);
            let lobby = registry.get_mut(&code).unwrap();
            let start = sessions
                .start_game(lobby, &account("AAAAA"), &mut rng)
                .unwrap();
            assert!(start.map == "x" || start.map == "y");
            if start.map == "x" {
                x_wins += 1;
            }
        }
        assert!((850..1150).contains(&x_wins), "x won {x_wins}");
    }

    #[test]
    fn minority_choice_never_wins_a_tie_break() {
        // Two-way tie at the top plus a single minority vote.
        let sessions = SessionCoordinator::new(None);
        let mut rng = DiceRng::new(17);
        for _ in 0..300 {
            let (mut registry, code) = lobby_with(&["AAAAA", "BBBBB", "CCCCC", "DDDDD", "EEEEE"]);
            vote_all(
                &mut registry,
                &code,
                &[
                    ("AAAAA", "x"),
                    ("BBBBB", "y"),
                    ("CCCCC", "x"),
                    ("DDDDD", "y"),
                    ("EEEEE", "z"),
                ],
            );
            let lobby = registry.get_mut(&code).unwrap();
            let start = sessions
                .start_game(lobby, &account("AAAAA"), &mut rng)
                .unwrap();
            assert_ne!(start.map, "z");
        }
    }

    #[test]
    fn turn_order_is_a_permutation_of_members() {
        let members = ["AAAAA", "BBBBB", "CCCCC", "DDDDD"];
        for seed in 0..30 {
            let (registry, code, start) = started(&members, seed);
            let mut order = start.turn_order.clone();
            order.sort();
            let mut expected: Vec<AccountCode> = members.iter().map(|m| account(m)).collect();
            expected.sort();
            assert_eq!(order, expected);

            let lobby = registry.get(&code).unwrap();
            assert!(lobby.is_started());
            let game = lobby.active().unwrap();
            assert_eq!(game.turn_order, start.turn_order);
            assert_eq!(game.current_turn, 0);
            assert_eq!(game.map, "forest");
        }
    }

    #[test]
    fn roll_before_start_is_out_of_turn() {
        let (mut registry, code) = lobby_with(&["AAAAA"]);
        let sessions = SessionCoordinator::new(None);
        let err = sessions
            .roll_dice(
                registry.get_mut(&code).unwrap(),
                &account("AAAAA"),
                DiceTier::Normal,
                &mut DiceRng::new(0),
            )
            .unwrap_err();
        assert_eq!(err, CoordinatorError::NotYourTurn);
    }

    #[test]
    fn rolls_cycle_turns_and_reject_out_of_turn_players() {
        let (mut registry, code, start) = started(&["AAAAA", "BBBBB", "CCCCC"], 5);
        let sessions = SessionCoordinator::new(None);
        let mut rng = DiceRng::new(6);
        let k = start.turn_order.len();

        for n in 0..10 {
            let lobby = registry.get_mut(&code).unwrap();
            let current = lobby.current_player().unwrap().clone();
            assert_eq!(lobby.active().unwrap().current_turn, n % k);

            // Everyone else is refused and the index does not move.
            for other in start.turn_order.iter().filter(|p| **p != current) {
                let err = sessions
                    .roll_dice(lobby, other, DiceTier::Normal, &mut rng)
                    .unwrap_err();
                assert_eq!(err, CoordinatorError::NotYourTurn);
                assert_eq!(lobby.active().unwrap().current_turn, n % k);
            }

            let outcome = sessions
                .roll_dice(lobby, &current, DiceTier::Normal, &mut rng)
                .unwrap();
            assert_eq!(outcome.player, current);
            assert_eq!(outcome.next_player, start.turn_order[(n + 1) % k]);
            assert!(!outcome.auto);
        }
        assert_eq!(
            registry.get(&code).unwrap().active().unwrap().current_turn,
            10 % k
        );
    }

    #[test]
    fn single_player_keeps_the_turn() {
        let (mut registry, code, _) = started(&["SOLO1"], 3);
        let sessions = SessionCoordinator::new(None);
        let mut rng = DiceRng::new(3);
        for _ in 0..3 {
            let outcome = sessions
                .roll_dice(
                    registry.get_mut(&code).unwrap(),
                    &account("SOLO1"),
                    DiceTier::Gold,
                    &mut rng,
                )
                .unwrap();
            assert_eq!(outcome.next_player, account("SOLO1"));
        }
    }

    /// Roll `trials` times with one tier and return the face histogram.
    fn histogram(tier: DiceTier, trials: usize, seed: u64) -> [usize; 7] {
        let (mut registry, code, _) = started(&["SOLO1"], seed);
        let sessions = SessionCoordinator::new(None);
        let mut rng = DiceRng::new(seed);
        let solo = account("SOLO1");
        let mut counts = [0usize; 7];
        for _ in 0..trials {
            let lobby = registry.get_mut(&code).unwrap();
            let outcome = sessions.roll_dice(lobby, &solo, tier, &mut rng).unwrap();
            counts[usize::from(outcome.roll)] += 1;
        }
        counts
    }

    /// Pearson chi-square against a uniform distribution over `faces`.
    fn chi_square(counts: &[usize; 7], faces: std::ops::RangeInclusive<usize>) -> f64 {
        let total: usize = faces.clone().map(|f| counts[f]).sum();
        let expected = total as f64 / faces.clone().count() as f64;
        faces
            .map(|f| {
                let d = counts[f] as f64 - expected;
                d * d / expected
            })
            .sum()
    }

    #[test]
    fn tier_rolls_stay_in_range_and_are_uniform() {
        // Critical values at p = 0.001: df=5 -> 20.52, df=2 -> 13.82.
        let cases = [
            (DiceTier::Normal, 1..=6, 20.52),
            (DiceTier::Gold, 4..=6, 13.82),
            (DiceTier::Silver, 2..=4, 13.82),
            (DiceTier::Bronze, 1..=3, 13.82),
        ];
        for (tier, faces, critical) in cases {
            let counts = histogram(tier, 10_000, 41);
            let outside: usize = (0..7)
                .filter(|f| !faces.contains(f))
                .map(|f| counts[f])
                .sum();
            assert_eq!(outside, 0, "{tier:?} outside {faces:?}: {counts:?}");
            let stat = chi_square(&counts, faces.clone());
            assert!(stat < critical, "{tier:?} chi-square {stat:.2}");
        }
    }

    #[test]
    fn unknown_tier_rolls_like_normal() {
        let tier = DiceTier::parse("diamond");
        let counts = histogram(tier, 3_000, 8);
        assert_eq!(counts[0], 0);
        assert!((1..=6).all(|f| counts[f] > 0));
    }

    #[test]
    fn minigame_ranks_award_bonus_tiers() {
        let (mut registry, code, _) = started(&["AAAAA", "BBBBB", "CCCCC"], 4);
        let sessions = SessionCoordinator::new(None);
        let lobby = registry.get_mut(&code).unwrap();

        assert_eq!(submit(&sessions, lobby, "AAAAA", 2.0), Ok(None));
        assert_eq!(submit(&sessions, lobby, "BBBBB", 1.0), Ok(None));
        assert_eq!(lobby.pending_results().len(), 2);
        let round = submit(&sessions, lobby, "CCCCC", 3.0).unwrap().unwrap();

        assert_eq!(placements(&round), ["BBBBB", "AAAAA", "CCCCC"]);
        assert_eq!(round.bonuses[&account("BBBBB")], BonusTier::Gold);
        assert_eq!(round.bonuses[&account("AAAAA")], BonusTier::Silver);
        assert_eq!(round.bonuses[&account("CCCCC")], BonusTier::Bronze);
        assert!(lobby.pending_results().is_empty());
    }

    #[test]
    fn minigame_ties_keep_arrival_order_and_fourth_gets_nothing() {
        let (mut registry, code, _) = started(&["AAAAA", "BBBBB", "CCCCC", "DDDDD"], 4);
        let sessions = SessionCoordinator::new(None);
        let lobby = registry.get_mut(&code).unwrap();
        for (member, rank) in [("DDDDD", 1.0), ("AAAAA", 1.0), ("BBBBB", 5.0)] {
            submit(&sessions, lobby, member, rank).unwrap();
        }
        let round = submit(&sessions, lobby, "CCCCC", 1.0).unwrap().unwrap();
        assert_eq!(placements(&round), ["DDDDD", "AAAAA", "CCCCC", "BBBBB"]);
        assert_eq!(round.bonuses.len(), 3);
        assert!(!round.bonuses.contains_key(&account("BBBBB")));
    }

    #[test]
    fn minigame_orders_negative_and_fractional_ranks() {
        let (mut registry, code, _) = started(&["AAAAA", "BBBBB", "CCCCC"], 4);
        let sessions = SessionCoordinator::new(None);
        let lobby = registry.get_mut(&code).unwrap();
        submit(&sessions, lobby, "AAAAA", 3.0).unwrap();
        submit(&sessions, lobby, "BBBBB", 0.25).unwrap();
        let round = submit(&sessions, lobby, "CCCCC", -1.5).unwrap().unwrap();

        assert_eq!(placements(&round), ["CCCCC", "BBBBB", "AAAAA"]);
        let ranks: Vec<f64> = round.sorted.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, [-1.5, 0.25, 3.0]);
        assert_eq!(round.bonuses[&account("CCCCC")], BonusTier::Gold);
        assert_eq!(round.bonuses[&account("AAAAA")], BonusTier::Bronze);
    }

    #[test]
    fn minigame_rounds_repeat() {
        let (mut registry, code, _) = started(&["AAAAA", "BBBBB"], 4);
        let sessions = SessionCoordinator::new(None);
        let lobby = registry.get_mut(&code).unwrap();
        for _ in 0..3 {
            submit(&sessions, lobby, "AAAAA", 1.0).unwrap();
            let round = submit(&sessions, lobby, "BBBBB", 2.0).unwrap();
            assert!(round.is_some());
            assert!(lobby.pending_results().is_empty());
        }
    }

    #[test]
    fn minigame_rejects_duplicates_and_outsiders() {
        let (mut registry, code, _) = started(&["AAAAA", "BBBBB"], 4);
        let sessions = SessionCoordinator::new(None);
        let lobby = registry.get_mut(&code).unwrap();
        submit(&sessions, lobby, "AAAAA", 1.0).unwrap();
        assert_eq!(
            submit(&sessions, lobby, "AAAAA", 2.0),
            Err(CoordinatorError::AlreadySubmitted(account("AAAAA")))
        );
        assert!(matches!(
            submit(&sessions, lobby, "ZZZZZ", 1.0),
            Err(CoordinatorError::NotAMember { .. })
        ));
        assert_eq!(lobby.pending_results().len(), 1);
    }

    #[test]
    fn expired_turn_is_auto_rolled() {
        let (mut registry, code, start) = started(&["AAAAA", "BBBBB"], 12);
        let sessions = SessionCoordinator::new(Some(Duration::from_secs(30)));
        let mut rng = DiceRng::new(12);
        let lobby = registry.get_mut(&code).unwrap();

        // Fresh turn: nothing happens.
        let now = Instant::now();
        assert!(sessions.expire_turn(lobby, now, &mut rng).is_none());

        let later = now + Duration::from_secs(31);
        let outcome = sessions.expire_turn(lobby, later, &mut rng).unwrap();
        assert!(outcome.auto);
        assert_eq!(outcome.tier, DiceTier::Normal);
        assert!((1..=6).contains(&outcome.roll));
        assert_eq!(outcome.player, start.turn_order[0]);
        assert_eq!(outcome.next_player, start.turn_order[1]);
        assert_eq!(lobby.current_player(), Some(&start.turn_order[1]));

        // The next player gets a full window from the sweep time.
        assert!(sessions.expire_turn(lobby, later, &mut rng).is_none());
    }

    #[test]
    fn no_deadline_means_no_expiry() {
        let (mut registry, code, _) = started(&["AAAAA", "BBBBB"], 12);
        let sessions = SessionCoordinator::new(None);
        let mut rng = DiceRng::new(1);
        let lobby = registry.get_mut(&code).unwrap();
        let far = Instant::now() + Duration::from_secs(86_400);
        assert!(sessions.expire_turn(lobby, far, &mut rng).is_none());
        assert_eq!(lobby.active().unwrap().current_turn, 0);
    }
}
