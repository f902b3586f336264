// Error type for rejected coordinator operations.
//
// Every variant is recoverable: the operation that produced it left all state
// untouched, and the error is reported only to the requesting connection.
// `ErrorKind` groups the variants for logging.

use party_dice_protocol::{AccountCode, LobbyCode};

/// Why a request was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unknown lobby {0}")]
    UnknownLobby(LobbyCode),
    #[error("unknown account {0}")]
    UnknownAccount(AccountCode),
    #[error("{account} is not a member of lobby {lobby}")]
    NotAMember {
        account: AccountCode,
        lobby: LobbyCode,
    },
    #[error("only the host can start the game")]
    NotHost,
    #[error("not every member has voted for a map")]
    VotesIncomplete,
    #[error("color {0} is already taken")]
    ColorTaken(String),
    #[error("lobby {0} has already started")]
    AlreadyStarted(LobbyCode),
    #[error("{0} already submitted a result this round")]
    AlreadySubmitted(AccountCode),
    #[error("not your turn")]
    NotYourTurn,
}

/// Coarse classification of `CoordinatorError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotAuthorized,
    PreconditionNotMet,
    OutOfTurn,
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownLobby(_) | Self::UnknownAccount(_) => ErrorKind::NotFound,
            Self::NotLoggedIn | Self::NotAMember { .. } | Self::NotHost => ErrorKind::NotAuthorized,
            Self::VotesIncomplete
            | Self::ColorTaken(_)
            | Self::AlreadyStarted(_)
            | Self::AlreadySubmitted(_) => ErrorKind::PreconditionNotMet,
            Self::NotYourTurn => ErrorKind::OutOfTurn,
        }
    }
}
