// Account registry: opaque codes, display names, and live connections.
//
// An account code is a bearer token. Presenting a code at login re-attaches
// that account to the caller's connection without further checks. Logging in
// without a code mints a fresh one that collides with no registered account.
//
// Bindings are kept in both directions so the coordinator can answer "who is
// this connection?" for every request and "where do I deliver to this
// member?" for every fan-out. A connection is bound to at most one account and
// an account to at most one connection.

use std::collections::BTreeMap;

use party_dice_prng::DiceRng;
use party_dice_protocol::AccountCode;

use crate::broadcast::ConnectionId;

/// Characters used for account and lobby codes.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a minted account code.
pub const ACCOUNT_CODE_LEN: usize = 5;

/// A registered player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub code: AccountCode,
    pub display_name: String,
    /// Current connection, if the player is online.
    pub live: Option<ConnectionId>,
}

#[derive(Default)]
pub struct IdentityRegistry {
    accounts: BTreeMap<AccountCode, Account>,
    by_connection: BTreeMap<ConnectionId, AccountCode>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-attach an account and bind it to `connection`.
    /// Never fails.
    pub fn login(
        &mut self,
        existing: Option<AccountCode>,
        display_name: String,
        connection: ConnectionId,
        rng: &mut DiceRng,
    ) -> AccountCode {
        let code = existing.unwrap_or_else(|| self.mint_code(rng));

        // The connection may have been logged in as someone else.
        if let Some(account) = self
            .by_connection
            .remove(&connection)
            .and_then(|previous| self.accounts.get_mut(&previous))
        {
            account.live = None;
        }

        let account = self.accounts.entry(code.clone()).or_insert_with(|| Account {
            code: code.clone(),
            display_name: String::new(),
            live: None,
        });
        // The account may still be bound to an older connection.
        let previous = account.live.replace(connection);
        if let Some(old) = previous.filter(|old| *old != connection) {
            self.by_connection.remove(&old);
        }
        account.display_name = display_name;
        self.by_connection.insert(connection, code.clone());

        tracing::info!(%code, %connection, name = %account.display_name, "account logged in");
        code
    }

    pub fn resolve(&self, code: &AccountCode) -> Option<&Account> {
        self.accounts.get(code)
    }

    /// The account a connection is logged in as.
    pub fn account_for(&self, connection: ConnectionId) -> Option<&AccountCode> {
        self.by_connection.get(&connection)
    }

    /// Live connection of an account, if it is online.
    pub fn live_address(&self, code: &AccountCode) -> Option<ConnectionId> {
        self.accounts.get(code).and_then(|a| a.live)
    }

    pub fn is_online(&self, code: &AccountCode) -> bool {
        self.live_address(code).is_some()
    }

    /// Unbind a closed connection. The account stays registered with no
    /// live address. Returns the account that was bound, if any.
    pub fn detach(&mut self, connection: ConnectionId) -> Option<AccountCode> {
        let code = self.by_connection.remove(&connection)?;
        if let Some(account) = self.accounts.get_mut(&code) {
            account.live = None;
        }
        Some(code)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn mint_code(&self, rng: &mut DiceRng) -> AccountCode {
        loop {
            let candidate = AccountCode(rng.code(CODE_ALPHABET, ACCOUNT_CODE_LEN));
            if !self.accounts.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
