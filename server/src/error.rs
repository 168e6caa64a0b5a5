use common::ErrorCode;
use rust_decimal::Decimal;
use thiserror::Error;

/// Every way a ledger operation can be refused. All of these are detected
/// before anything is written, except `Store`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("authentication required")]
    Unauthorized,
    #[error("not permitted: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("invalid amount for {subject}: {amount}")]
    InvalidAmount { subject: String, amount: Decimal },
    #[error("category {0} appears more than once in the batch")]
    DuplicateCategoryInBatch(String),
    #[error("insufficient balance (available={available}, requested={requested})")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },
    #[error("game is locked")]
    GameLocked,
    #[error("game must be locked before winners are declared")]
    GameNotLocked,
    #[error("category {0} already has a winner")]
    AlreadyResolved(String),
    #[error("nominee {0} is not part of this category")]
    InvalidWinner(String),
    #[error("invalid or expired join code")]
    JoinCodeInvalidOrExpired,
    #[error("game has reached maximum capacity of {0} players")]
    GameAtCapacity(usize),
    #[error("store failure: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::Unauthorized => ErrorCode::Unauthorized,
            LedgerError::Forbidden(_) => ErrorCode::Forbidden,
            LedgerError::NotFound(_) => ErrorCode::NotFound,
            LedgerError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            LedgerError::InvalidReference(_) => ErrorCode::InvalidReference,
            LedgerError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
            LedgerError::DuplicateCategoryInBatch(_) => ErrorCode::DuplicateCategoryInBatch,
            LedgerError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            LedgerError::GameLocked => ErrorCode::GameLocked,
            LedgerError::GameNotLocked => ErrorCode::GameNotLocked,
            LedgerError::AlreadyResolved(_) => ErrorCode::AlreadyResolved,
            LedgerError::InvalidWinner(_) => ErrorCode::InvalidWinner,
            LedgerError::JoinCodeInvalidOrExpired => ErrorCode::JoinCodeInvalidOrExpired,
            LedgerError::GameAtCapacity(_) => ErrorCode::GameAtCapacity,
            LedgerError::Store(_) => ErrorCode::Transient,
        }
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(error: anyhow::Error) -> Self {
        LedgerError::Store(format!("{error:#}"))
    }
}
