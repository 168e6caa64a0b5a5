use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::sql::statements::{BeginStatement, CommitStatement};
use surrealdb::sql::{Id, Thing};
use surrealdb::Surreal;
use tracing::debug;

use crate::config::DatabaseSettings;

pub const GAME: &str = "game";
pub const CATEGORY: &str = "category";
pub const NOMINEE: &str = "nominee";
pub const PARTICIPANT: &str = "participant";
pub const BET: &str = "bet";

const SCHEMA: &str = "
    DEFINE INDEX participant_member ON TABLE participant COLUMNS game, principal UNIQUE;
    DEFINE INDEX bet_slot ON TABLE bet COLUMNS participant, category UNIQUE;
    DEFINE INDEX game_join_code ON TABLE game COLUMNS join_code;
";

pub fn record(table: &str, key: impl Into<String>) -> Thing {
    Thing {
        tb: table.into(),
        id: Id::String(key.into()),
    }
}

pub fn new_record(table: &str) -> Thing {
    Thing {
        tb: table.into(),
        id: Id::rand(),
    }
}

/// The key part of a record id, as handed to clients.
pub fn record_key(thing: &Thing) -> String {
    thing.id.to_raw()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbGame {
    pub id: Thing,
    pub name: String,
    pub admin: String,
    pub initial_balance: Decimal,
    pub locked: bool,
    pub join_code: Option<String>,
    pub join_code_expires_at: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbCategory {
    pub id: Thing,
    pub game: Thing,
    pub name: String,
    pub position: u32,
    pub winner: Option<Thing>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbNominee {
    pub id: Thing,
    pub game: Thing,
    pub category: Thing,
    pub name: String,
    pub odds: Decimal,
    pub position: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbParticipant {
    pub id: Thing,
    pub game: Thing,
    pub principal: String,
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub joined_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DbBet {
    pub id: Thing,
    pub game: Thing,
    pub participant: Thing,
    pub category: Thing,
    pub nominee: Thing,
    pub amount: Decimal,
    pub paid_out: bool,
    pub payout_amount: Option<Decimal>,
}

/// Everything a game owns, loaded together so the ledger can validate
/// against one consistent picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecords {
    pub game: DbGame,
    pub categories: Vec<DbCategory>,
    pub nominees: Vec<DbNominee>,
    pub participants: Vec<DbParticipant>,
    pub bets: Vec<DbBet>,
}

/// Writes for a freshly created category, nominees included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub category: DbCategory,
    pub nominees: Vec<DbNominee>,
}

/// Result of validating a bet batch: the rows to swap and the balance to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetPlan {
    pub participant: Thing,
    pub removed: Vec<Thing>,
    pub inserted: Vec<DbBet>,
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetPayout {
    pub bet: Thing,
    pub payout_amount: Decimal,
}

/// Result of validating a resolution: winner, per-bet payouts and the
/// recomputed balances of every participant holding a bet in the category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub category: Thing,
    pub winner: Thing,
    pub payouts: Vec<BetPayout>,
    pub balances: Vec<(Thing, Decimal)>,
}

pub struct DatabaseConnection {
    connection: Surreal<Any>,
}

impl DatabaseConnection {
    pub async fn new(settings: &DatabaseSettings) -> anyhow::Result<Self> {
        let db = any::connect(settings.address.as_str()).await?;

        if let Some(credentials) = &settings.credentials {
            db.signin(Root {
                username: &credentials.username,
                password: &credentials.password,
            })
            .await?;
        }

        db.use_ns(settings.namespace.as_str())
            .use_db(settings.database.as_str())
            .await?;
        db.query(SCHEMA).await?.check()?;

        Ok(Self { connection: db })
    }

    pub async fn create_game(
        &mut self,
        game: &DbGame,
        categories: &[NewCategory],
        admin: &DbParticipant,
    ) -> anyhow::Result<()> {
        let mut query = self
            .connection
            .query(BeginStatement)
            .query("CREATE $game CONTENT $game_content;")
            .bind(("game", game.id.clone()))
            .bind(("game_content", game));

        for (i, new_category) in categories.iter().enumerate() {
            query = query
                .query(format!("CREATE $category_{i} CONTENT $category_{i}_content;"))
                .bind((format!("category_{i}"), new_category.category.id.clone()))
                .bind((format!("category_{i}_content"), &new_category.category));
            for (j, nominee) in new_category.nominees.iter().enumerate() {
                query = query
                    .query(format!("CREATE $nominee_{i}_{j} CONTENT $nominee_{i}_{j}_content;"))
                    .bind((format!("nominee_{i}_{j}"), nominee.id.clone()))
                    .bind((format!("nominee_{i}_{j}_content"), nominee));
            }
        }

        query
            .query("CREATE $admin CONTENT $admin_content;")
            .bind(("admin", admin.id.clone()))
            .bind(("admin_content", admin))
            .query(CommitStatement)
            .await?
            .check()?;
        debug!(game = %game.id, categories = categories.len(), "game created");
        Ok(())
    }

    pub async fn add_category(&mut self, new_category: &NewCategory) -> anyhow::Result<()> {
        let mut query = self
            .connection
            .query(BeginStatement)
            .query("CREATE $category CONTENT $category_content;")
            .bind(("category", new_category.category.id.clone()))
            .bind(("category_content", &new_category.category));

        for (i, nominee) in new_category.nominees.iter().enumerate() {
            query = query
                .query(format!("CREATE $nominee_{i} CONTENT $nominee_{i}_content;"))
                .bind((format!("nominee_{i}"), nominee.id.clone()))
                .bind((format!("nominee_{i}_content"), nominee));
        }

        query.query(CommitStatement).await?.check()?;
        Ok(())
    }

    pub async fn add_participant(&mut self, participant: &DbParticipant) -> anyhow::Result<()> {
        self.connection
            .query("CREATE $participant CONTENT $content;")
            .bind(("participant", participant.id.clone()))
            .bind(("content", participant))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn set_join_code(
        &mut self,
        game: &Thing,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.connection
            .query("UPDATE $game SET join_code = $code, join_code_expires_at = $expires_at;")
            .bind(("game", game.clone()))
            .bind(("code", code))
            .bind(("expires_at", expires_at))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn lock_game(&mut self, game: &Thing) -> anyhow::Result<()> {
        self.connection
            .query("UPDATE $game SET locked = true;")
            .bind(("game", game.clone()))
            .await?
            .check()?;
        Ok(())
    }

    /// Swap the participant's bets and store the new balance in one transaction.
    pub async fn apply_bet_plan(&mut self, plan: &BetPlan) -> anyhow::Result<()> {
        let mut query = self.connection.query(BeginStatement);

        for (i, bet) in plan.removed.iter().enumerate() {
            query = query
                .query(format!("DELETE $removed_{i};"))
                .bind((format!("removed_{i}"), bet.clone()));
        }
        for (i, bet) in plan.inserted.iter().enumerate() {
            query = query
                .query(format!("CREATE $bet_{i} CONTENT $bet_{i}_content;"))
                .bind((format!("bet_{i}"), bet.id.clone()))
                .bind((format!("bet_{i}_content"), bet));
        }

        query
            .query("UPDATE $participant SET balance = $balance;")
            .bind(("participant", plan.participant.clone()))
            .bind(("balance", plan.balance))
            .query(CommitStatement)
            .await?
            .check()?;
        Ok(())
    }

    /// Record the winner and settle the category. The winner is only written
    /// if none is set yet; otherwise the whole transaction is thrown away.
    pub async fn apply_settlement(&mut self, settlement: &Settlement) -> anyhow::Result<()> {
        let mut query = self
            .connection
            .query(BeginStatement)
            .query(
                "LET $claimed = (UPDATE $category SET winner = $winner \
                 WHERE winner = NONE OR winner = NULL RETURN AFTER);",
            )
            .query("IF array::len($claimed) = 0 { THROW \"category already resolved\" };")
            .bind(("category", settlement.category.clone()))
            .bind(("winner", settlement.winner.clone()));

        for (i, payout) in settlement.payouts.iter().enumerate() {
            query = query
                .query(format!(
                    "UPDATE $bet_{i} SET paid_out = true, payout_amount = $payout_{i};"
                ))
                .bind((format!("bet_{i}"), payout.bet.clone()))
                .bind((format!("payout_{i}"), payout.payout_amount));
        }
        for (i, (participant, balance)) in settlement.balances.iter().enumerate() {
            query = query
                .query(format!("UPDATE $participant_{i} SET balance = $balance_{i};"))
                .bind((format!("participant_{i}"), participant.clone()))
                .bind((format!("balance_{i}"), *balance));
        }

        query.query(CommitStatement).await?.check()?;
        Ok(())
    }

    pub async fn delete_game(&mut self, game: &Thing) -> anyhow::Result<()> {
        self.connection
            .query(BeginStatement)
            .query("DELETE bet WHERE game = $game;")
            .query("DELETE participant WHERE game = $game;")
            .query("DELETE nominee WHERE game = $game;")
            .query("DELETE category WHERE game = $game;")
            .query("DELETE $game;")
            .query(CommitStatement)
            .bind(("game", game.clone()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn load_game(&self, game: &Thing) -> anyhow::Result<Option<GameRecords>> {
        let mut response = self
            .connection
            .query("SELECT * FROM $game;")
            .query("SELECT * FROM category WHERE game = $game ORDER BY position;")
            .query("SELECT * FROM nominee WHERE game = $game ORDER BY position;")
            .query("SELECT * FROM participant WHERE game = $game ORDER BY joined_at;")
            .query("SELECT * FROM bet WHERE game = $game;")
            .bind(("game", game.clone()))
            .await?;

        let game: Option<DbGame> = response.take(0)?;
        let Some(game) = game else {
            return Ok(None);
        };
        Ok(Some(GameRecords {
            game,
            categories: response.take(1)?,
            nominees: response.take(2)?,
            participants: response.take(3)?,
            bets: response.take(4)?,
        }))
    }

    pub async fn find_games_by_join_code(&self, code: &str) -> anyhow::Result<Vec<DbGame>> {
        let mut response = self
            .connection
            .query("SELECT * FROM game WHERE join_code = $code;")
            .bind(("code", code))
            .await?;
        Ok(response.take(0)?)
    }

    /// Games the principal administers or plays in.
    pub async fn games_for_principal(&self, principal: &str) -> anyhow::Result<Vec<Thing>> {
        let mut response = self
            .connection
            .query("SELECT VALUE game FROM participant WHERE principal = $principal;")
            .query("SELECT * FROM game WHERE admin = $principal;")
            .bind(("principal", principal))
            .await?;
        let joined: Vec<Thing> = response.take(0)?;
        let administered: Vec<DbGame> = response.take(1)?;

        let mut games: Vec<Thing> = administered.into_iter().map(|game| game.id).collect();
        for game in joined {
            if !games.contains(&game) {
                games.push(game);
            }
        }
        Ok(games)
    }
}
