use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod network;

/// Full view of one betting pool, as shown to a single viewer.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub admin: String,
    pub initial_balance: Decimal,
    pub locked: bool,
    // only populated for the admin
    pub join_code: Option<String>,
    pub join_code_expires_at: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub categories: Vec<Category>,
    pub participants: Vec<Participant>,
    pub leaderboard: Vec<Standing>,
}

/// What anyone holding a join code (or listing their games) gets to see.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct GameSummary {
    pub id: String,
    pub name: String,
    pub admin: String,
    pub locked: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub participant_count: usize,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub winner_id: Option<String>,
    pub nominees: Vec<Nominee>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Nominee {
    pub id: String,
    pub name: String,
    pub odds: Decimal,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Participant {
    pub id: String,
    pub principal: String,
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub bets: Vec<Bet>,
}

/// A stake joined with the names it refers to, ready for display.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Bet {
    pub id: String,
    pub category_id: String,
    pub category_name: String,
    pub nominee_id: String,
    pub nominee_name: String,
    pub odds: Decimal,
    pub amount: Decimal,
    pub paid_out: bool,
    pub payout_amount: Option<Decimal>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Standing {
    pub rank: usize,
    pub principal: String,
    pub balance: Decimal,
}

// One line of a bet batch: stake `amount` on `nominee_id` within `category_id`
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct BetSlip {
    pub category_id: String,
    pub nominee_id: String,
    pub amount: Decimal,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PotentialGame {
    pub name: String,
    pub initial_balance: Decimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PotentialCategory {
    pub name: String,
    pub nominees: Vec<PotentialNominee>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PotentialNominee {
    pub name: String,
    pub odds: Decimal,
}

/// Stable failure codes. Clients match on these, so variants are never renumbered.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidRequest,
    InvalidReference,
    InvalidAmount,
    DuplicateCategoryInBatch,
    InsufficientBalance,
    GameLocked,
    GameNotLocked,
    AlreadyResolved,
    InvalidWinner,
    JoinCodeInvalidOrExpired,
    GameAtCapacity,
    Transient,
}
