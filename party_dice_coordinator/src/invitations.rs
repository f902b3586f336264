// Pending lobby invitations per account.
//
// Each account has an ordered set of lobby codes it was invited to and has
// not accepted yet. Adding is idempotent. Entries leave the set when the
// invitee accepts, or when the lobby itself is reaped. Delivery of the
// real-time `InvitationReceived` push is the coordinator's job; this module
// only keeps the book.

use std::collections::BTreeMap;

use party_dice_protocol::{AccountCode, LobbyCode};

#[derive(Default)]
pub struct InvitationDirectory {
    pending: BTreeMap<AccountCode, Vec<LobbyCode>>,
}

impl InvitationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `lobby` to `target`'s invitations. Returns false if it was
    /// already there.
    pub fn invite(&mut self, target: &AccountCode, lobby: &LobbyCode) -> bool {
        let entries = self.pending.entry(target.clone()).or_default();
        if entries.contains(lobby) {
            return false;
        }
        entries.push(lobby.clone());
        true
    }

    /// Current invitations for `code`, oldest first.
    pub fn list_for(&self, code: &AccountCode) -> Vec<LobbyCode> {
        self.pending.get(code).cloned().unwrap_or_default()
    }

    /// Drop one invitation. No-op if absent.
    pub fn consume(&mut self, code: &AccountCode, lobby: &LobbyCode) {
        if let Some(entries) = self.pending.get_mut(code) {
            entries.retain(|l| l != lobby);
            if entries.is_empty() {
                self.pending.remove(code);
            }
        }
    }

    /// Drop every invitation to a lobby that no longer exists.
    pub fn forget_lobby(&mut self, lobby: &LobbyCode) {
        self.pending.retain(|_, entries| {
            entries.retain(|l| l != lobby);
            !entries.is_empty()
        });
    }
}
