// Core identifier and tier types for the Party Dice protocol.
//
// Account and lobby codes are opaque strings minted by the coordinator. They
// travel as plain JSON strings (`#[serde(transparent)]`) so they can key the
// maps inside lobby snapshots. `RequestId` correlates a client request with
// the single `Reply` the coordinator sends back.
//
// `DiceTier` covers the four roll profiles a player may choose; `BonusTier`
// is the subset a minigame round can award.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque bearer code identifying an account.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountCode(pub String);

/// Opaque code identifying a lobby.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyCode(pub String);

/// Client-chosen correlation ID echoed in the matching `Reply`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl AccountCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl LobbyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Roll profile selected by the acting player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiceTier {
    Normal,
    Gold,
    Silver,
    Bronze,
}

impl DiceTier {
    /// Parse a tier name as sent on the wire. Anything unrecognized rolls as
    /// a normal die.
    pub fn parse(name: &str) -> Self {
        match name {
            "gold" => Self::Gold,
            "silver" => Self::Silver,
            "bronze" => Self::Bronze,
            _ => Self::Normal,
        }
    }

    /// Inclusive `(low, high)` face range for this tier.
    pub fn faces(self) -> (u8, u8) {
        match self {
            Self::Normal => (1, 6),
            Self::Gold => (4, 6),
            Self::Silver => (2, 4),
            Self::Bronze => (1, 3),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Bronze => "bronze",
        }
    }
}

/// Bonus die awarded for a top-three minigame placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BonusTier {
    Gold,
    Silver,
    Bronze,
}

impl BonusTier {
    /// Award for a 0-based placement in the sorted results.
    pub fn for_placement(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Gold),
            1 => Some(Self::Silver),
            2 => Some(Self::Bronze),
            _ => None,
        }
    }
}
