// party_dice_coordinator: lobby and turn coordinator for Party Dice.
//
// Clients connect over TCP, log in with an opaque account code, gather in a
// lobby by invitation, vote on a map and claim colors, and then play a
// strictly turn-ordered dice game with minigame rounds that award bonus dice.
// The coordinator owns all of that state and keeps every member's view in
// sync. It never simulates the board: a roll is recorded and broadcast, and
// that is all.
//
// Module overview:
// - `identity.rs`:    Account codes, display names, live connection binding.
// - `invitations.rs`: Pending invitations per account.
// - `lobby.rs`:       Lobby records, Forming-phase mutations, idle reaping.
// - `session.rs`:     Game start (map vote, turn order), dice turns, minigame
//                     rounds, turn deadlines.
// - `broadcast.rs`:   Write halves of client sockets and fan-out.
// - `coordinator.rs`: The single owner of all of the above; dispatches each
//                     request, replies, then flushes queued events.
// - `server.rs`:      TCP listener, per-client reader threads, and the main
//                     event loop feeding the `Coordinator` through `mpsc`.
// - `client.rs`:      Blocking client used by tests and embedders.
// - `error.rs`:       `CoordinatorError` and its `ErrorKind` taxonomy.
//
// The coordinator can run as a standalone binary (`main.rs`) or be embedded
// via the library API (`start_coordinator`).

pub mod broadcast;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod invitations;
pub mod lobby;
pub mod server;
pub mod session;

pub use client::{ClientError, CoordinatorClient};
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, ErrorKind};
pub use server::{CoordinatorConfig, CoordinatorHandle, start_coordinator};
