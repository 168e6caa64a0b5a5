//! Validation and arithmetic for every ledger operation.
//!
//! Each `plan_*` function inspects a consistent snapshot of one game
//! ([`GameRecords`]) and either refuses the operation or returns the exact set
//! of writes to commit. Nothing here touches the store, so an operation that
//! fails validation can never leave a partial write behind.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::{BetSlip, PotentialCategory, PotentialGame};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use surrealdb::sql::Thing;

use crate::catalog::Catalog;
use crate::database::{
    new_record, record_key, BetPayout, BetPlan, DbBet, DbCategory, DbGame, DbNominee,
    DbParticipant, GameRecords, NewCategory, Settlement, BET, CATEGORY, GAME, NOMINEE,
    PARTICIPANT,
};
use crate::error::LedgerError;
use crate::identity::Principal;

pub const JOIN_CODE_LENGTH: usize = 6;
/// Upper bound on a game's grant, keeping every stake times odds in range.
pub const MAX_INITIAL_BALANCE: i64 = 1_000_000_000_000;
pub const MAX_ODDS: i64 = 1_000_000;

/// Payouts are kept to the cent, halves rounded away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// A participant's balance as implied by their grant and their bets:
/// the grant, less every stake still riding, plus every settled payout.
/// `None` if the sum leaves the representable range.
pub fn derive_balance<'a>(
    participant: &DbParticipant,
    bets: impl IntoIterator<Item = &'a DbBet>,
) -> Option<Decimal> {
    bets.into_iter()
        .filter(|bet| bet.participant == participant.id)
        .try_fold(participant.initial_balance, |balance, bet| {
            match (bet.paid_out, bet.payout_amount) {
                (true, Some(payout)) => balance.checked_add(payout),
                _ => balance.checked_sub(bet.amount),
            }
        })
}

fn checked_balance<'a>(
    participant: &DbParticipant,
    bets: impl IntoIterator<Item = &'a DbBet>,
) -> Result<Decimal, LedgerError> {
    derive_balance(participant, bets).ok_or_else(|| LedgerError::InvalidAmount {
        subject: format!("balance of {}", participant.principal),
        amount: participant.initial_balance,
    })
}

impl GameRecords {
    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.game.admin == principal.as_str()
    }

    pub fn participant_for(&self, principal: &Principal) -> Option<&DbParticipant> {
        self.participants
            .iter()
            .find(|participant| participant.principal == principal.as_str())
    }

    pub fn category(&self, key: &str) -> Option<&DbCategory> {
        self.categories
            .iter()
            .find(|category| record_key(&category.id) == key)
    }

    pub fn category_by_id(&self, id: &Thing) -> Option<&DbCategory> {
        self.categories.iter().find(|category| &category.id == id)
    }

    pub fn nominee_by_id(&self, id: &Thing) -> Option<&DbNominee> {
        self.nominees.iter().find(|nominee| &nominee.id == id)
    }

    /// The nominee `key`, provided it sits in `category`.
    pub fn nominee_in(&self, category: &Thing, key: &str) -> Option<&DbNominee> {
        self.nominees
            .iter()
            .find(|nominee| &nominee.category == category && record_key(&nominee.id) == key)
    }

    pub fn bets_of<'a>(&'a self, participant: &'a Thing) -> impl Iterator<Item = &'a DbBet> + 'a {
        self.bets.iter().filter(move |bet| &bet.participant == participant)
    }
}

fn require_admin(records: &GameRecords, principal: &Principal, action: &str) -> Result<(), LedgerError> {
    if records.is_admin(principal) {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!(
            "only the game admin may {action}"
        )))
    }
}

pub fn plan_new_game(
    principal: &Principal,
    potential: &PotentialGame,
    catalog: &Catalog,
    now: DateTime<Utc>,
) -> Result<(DbGame, Vec<NewCategory>, DbParticipant), LedgerError> {
    let name = potential.name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidRequest("game name is required".into()));
    }
    if potential.initial_balance <= Decimal::ZERO
        || potential.initial_balance > Decimal::from(MAX_INITIAL_BALANCE)
    {
        return Err(LedgerError::InvalidAmount {
            subject: "initial balance".into(),
            amount: potential.initial_balance,
        });
    }
    if potential.end_date < potential.start_date {
        return Err(LedgerError::InvalidRequest(
            "end date must not precede start date".into(),
        ));
    }

    let game = DbGame {
        id: new_record(GAME),
        name: name.to_string(),
        admin: principal.as_str().to_string(),
        initial_balance: potential.initial_balance,
        locked: false,
        join_code: None,
        join_code_expires_at: None,
        start_date: potential.start_date,
        end_date: potential.end_date,
        created_at: now,
    };

    let categories = catalog
        .categories
        .iter()
        .enumerate()
        .map(|(position, category)| {
            let category_id = new_record(CATEGORY);
            NewCategory {
                nominees: category
                    .nominees
                    .iter()
                    .enumerate()
                    .map(|(nominee_position, nominee)| DbNominee {
                        id: new_record(NOMINEE),
                        game: game.id.clone(),
                        category: category_id.clone(),
                        name: nominee.name.clone(),
                        odds: nominee.odds,
                        position: nominee_position as u32,
                    })
                    .collect(),
                category: DbCategory {
                    id: category_id,
                    game: game.id.clone(),
                    name: category.name.clone(),
                    position: position as u32,
                    winner: None,
                },
            }
        })
        .collect();

    let admin = new_participant(&game, principal, now);
    Ok((game, categories, admin))
}

fn new_participant(game: &DbGame, principal: &Principal, now: DateTime<Utc>) -> DbParticipant {
    DbParticipant {
        id: new_record(PARTICIPANT),
        game: game.id.clone(),
        principal: principal.as_str().to_string(),
        initial_balance: game.initial_balance,
        balance: game.initial_balance,
        joined_at: now,
    }
}

pub fn plan_new_category(
    records: &GameRecords,
    principal: &Principal,
    potential: &PotentialCategory,
) -> Result<NewCategory, LedgerError> {
    require_admin(records, principal, "add categories")?;
    if records.game.locked {
        return Err(LedgerError::GameLocked);
    }
    let name = potential.name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidRequest("category name is required".into()));
    }
    if potential.nominees.iter().any(|nominee| nominee.name.trim().is_empty()) {
        return Err(LedgerError::InvalidRequest("every nominee needs a name".into()));
    }
    if let Some(nominee) = potential.nominees.iter().find(|n| n.odds < Decimal::ZERO) {
        return Err(LedgerError::InvalidRequest(format!(
            "odds for {} must not be negative",
            nominee.name
        )));
    }
    if let Some(nominee) = potential.nominees.iter().find(|n| n.odds > Decimal::from(MAX_ODDS)) {
        return Err(LedgerError::InvalidRequest(format!(
            "odds for {} exceed {MAX_ODDS}",
            nominee.name
        )));
    }
    if !potential.nominees.iter().any(|nominee| nominee.odds > Decimal::ZERO) {
        return Err(LedgerError::InvalidRequest(
            "a category needs at least one nominee with positive odds".into(),
        ));
    }

    let position = records
        .categories
        .iter()
        .map(|category| category.position + 1)
        .max()
        .unwrap_or(0);
    let category = DbCategory {
        id: new_record(CATEGORY),
        game: records.game.id.clone(),
        name: name.to_string(),
        position,
        winner: None,
    };
    let nominees = potential
        .nominees
        .iter()
        .enumerate()
        .map(|(position, nominee)| DbNominee {
            id: new_record(NOMINEE),
            game: records.game.id.clone(),
            category: category.id.clone(),
            name: nominee.name.trim().to_string(),
            odds: nominee.odds,
            position: position as u32,
        })
        .collect();

    Ok(NewCategory { category, nominees })
}

/// Six upper-case hex characters drawn from three random bytes.
pub fn generate_join_code<R: Rng>(rng: &mut R) -> String {
    let bytes: [u8; 3] = rng.gen();
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

pub fn normalize_join_code(code: &str) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    (code.len() == JOIN_CODE_LENGTH && code.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(code)
}

pub fn authorize_join_code(records: &GameRecords, principal: &Principal) -> Result<(), LedgerError> {
    require_admin(records, principal, "issue join codes")
}

/// Accept `code` for this game only if it is the current, unexpired code and
/// the roster still has room.
pub fn check_join_code(
    records: &GameRecords,
    code: &str,
    now: DateTime<Utc>,
    capacity: usize,
) -> Result<(), LedgerError> {
    let code = normalize_join_code(code).ok_or(LedgerError::JoinCodeInvalidOrExpired)?;
    let valid = match (&records.game.join_code, records.game.join_code_expires_at) {
        (Some(current), Some(expires_at)) => *current == code && expires_at > now,
        _ => false,
    };
    if !valid {
        return Err(LedgerError::JoinCodeInvalidOrExpired);
    }
    if records.participants.len() >= capacity {
        return Err(LedgerError::GameAtCapacity(capacity));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Existing(DbParticipant),
    New(DbParticipant),
}

pub fn plan_join(
    records: &GameRecords,
    principal: &Principal,
    code: &str,
    now: DateTime<Utc>,
    capacity: usize,
) -> Result<Membership, LedgerError> {
    if let Some(existing) = records.participant_for(principal) {
        return Ok(Membership::Existing(existing.clone()));
    }
    check_join_code(records, code, now, capacity)?;
    Ok(Membership::New(new_participant(&records.game, principal, now)))
}

/// Validate a batch of slips and work out the bets to replace.
///
/// Only categories named in the batch are touched; the participant's other
/// bets stay as they are. The batch is refused as a whole if any slip is
/// invalid or if the new stakes exceed what the participant has available
/// once the replaced stakes are returned.
pub fn plan_bets(
    records: &GameRecords,
    principal: &Principal,
    slips: &[BetSlip],
) -> Result<BetPlan, LedgerError> {
    let participant = records.participant_for(principal).ok_or_else(|| {
        LedgerError::Forbidden("you are not a participant in this game".into())
    })?;
    if records.game.locked {
        return Err(LedgerError::GameLocked);
    }

    let mut seen = HashSet::new();
    for slip in slips {
        if !seen.insert(slip.category_id.as_str()) {
            return Err(LedgerError::DuplicateCategoryInBatch(slip.category_id.clone()));
        }
    }
    if let Some(slip) = slips.iter().find(|slip| slip.amount <= Decimal::ZERO) {
        return Err(LedgerError::InvalidAmount {
            subject: format!("category {}", slip.category_id),
            amount: slip.amount,
        });
    }

    let mut targets = Vec::with_capacity(slips.len());
    for slip in slips {
        let category = records.category(&slip.category_id).ok_or_else(|| {
            LedgerError::InvalidReference(format!(
                "category {} does not belong to this game",
                slip.category_id
            ))
        })?;
        let nominee = records
            .nominee_in(&category.id, &slip.nominee_id)
            .ok_or_else(|| {
                LedgerError::InvalidReference(format!(
                    "nominee {} is not part of category {}",
                    slip.nominee_id, category.name
                ))
            })?;
        if nominee.odds <= Decimal::ZERO {
            return Err(LedgerError::InvalidReference(format!(
                "nominee {} cannot be bet on",
                nominee.name
            )));
        }
        if category.winner.is_some() {
            return Err(LedgerError::AlreadyResolved(category.name.clone()));
        }
        targets.push((category, nominee, slip.amount));
    }

    let named: HashSet<&Thing> = targets.iter().map(|(category, _, _)| &category.id).collect();
    let (replaced, kept): (Vec<&DbBet>, Vec<&DbBet>) = records
        .bets_of(&participant.id)
        .partition(|bet| named.contains(&bet.category));

    let returned = replaced
        .iter()
        .try_fold(Decimal::ZERO, |total, bet| total.checked_add(bet.amount));
    let current = checked_balance(participant, records.bets_of(&participant.id))?;
    let available = returned
        .and_then(|returned| current.checked_add(returned))
        .ok_or_else(|| LedgerError::InvalidAmount {
            subject: format!("stakes of {}", participant.principal),
            amount: current,
        })?;
    if let Some((_, _, amount)) = targets.iter().find(|(_, _, amount)| *amount > available) {
        return Err(LedgerError::InsufficientBalance {
            available,
            requested: *amount,
        });
    }
    // saturate: an unrepresentable total is over any balance anyway
    let requested = targets
        .iter()
        .try_fold(Decimal::ZERO, |total, (_, _, amount)| total.checked_add(*amount))
        .unwrap_or(Decimal::MAX);
    if requested > available {
        return Err(LedgerError::InsufficientBalance {
            available,
            requested,
        });
    }

    let inserted: Vec<DbBet> = targets
        .into_iter()
        .map(|(category, nominee, amount)| DbBet {
            id: new_record(BET),
            game: records.game.id.clone(),
            participant: participant.id.clone(),
            category: category.id.clone(),
            nominee: nominee.id.clone(),
            amount,
            paid_out: false,
            payout_amount: None,
        })
        .collect();

    let balance = checked_balance(participant, kept.into_iter().chain(inserted.iter()))?;
    Ok(BetPlan {
        participant: participant.id.clone(),
        removed: replaced.into_iter().map(|bet| bet.id.clone()).collect(),
        inserted,
        balance,
    })
}

/// Returns `true` when the game still has to be written as locked.
pub fn plan_lock(records: &GameRecords, principal: &Principal) -> Result<bool, LedgerError> {
    require_admin(records, principal, "lock the game")?;
    Ok(!records.game.locked)
}

/// Settle every bet in a category against the declared winner.
pub fn plan_settlement(
    records: &GameRecords,
    principal: &Principal,
    category_key: &str,
    winner_key: &str,
) -> Result<Settlement, LedgerError> {
    require_admin(records, principal, "declare winners")?;
    if !records.game.locked {
        return Err(LedgerError::GameNotLocked);
    }
    let category = records
        .category(category_key)
        .ok_or_else(|| LedgerError::NotFound(format!("category {category_key}")))?;
    if category.winner.is_some() {
        return Err(LedgerError::AlreadyResolved(category.name.clone()));
    }
    let winner = records
        .nominee_in(&category.id, winner_key)
        .ok_or_else(|| LedgerError::InvalidWinner(winner_key.to_string()))?;

    let mut settled: HashMap<&Thing, Decimal> = HashMap::new();
    let mut payouts = Vec::new();
    for bet in records.bets.iter().filter(|bet| bet.category == category.id) {
        let payout_amount = if bet.nominee == winner.id {
            bet.amount
                .checked_mul(winner.odds)
                .map(round_money)
                .and_then(|gross| gross.checked_sub(bet.amount))
                .ok_or_else(|| LedgerError::InvalidAmount {
                    subject: format!("payout on bet {}", record_key(&bet.id)),
                    amount: bet.amount,
                })?
        } else {
            -bet.amount
        };
        settled.insert(&bet.id, payout_amount);
        payouts.push(BetPayout {
            bet: bet.id.clone(),
            payout_amount,
        });
    }

    let balances = records
        .participants
        .iter()
        .filter(|participant| {
            records
                .bets_of(&participant.id)
                .any(|bet| settled.contains_key(&bet.id))
        })
        .map(|participant| -> Result<(Thing, Decimal), LedgerError> {
            let bets: Vec<DbBet> = records
                .bets_of(&participant.id)
                .map(|bet| match settled.get(&bet.id) {
                    Some(payout) => DbBet {
                        paid_out: true,
                        payout_amount: Some(*payout),
                        ..bet.clone()
                    },
                    None => bet.clone(),
                })
                .collect();
            Ok((participant.id.clone(), checked_balance(participant, &bets)?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Settlement {
        category: category.id.clone(),
        winner: winner.id.clone(),
        payouts,
        balances,
    })
}

pub fn authorize_delete(records: &GameRecords, principal: &Principal) -> Result<(), LedgerError> {
    require_admin(records, principal, "delete the game")
}
