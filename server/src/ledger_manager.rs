use anyhow::anyhow;
use chrono::{DateTime, Utc};
use common::{BetSlip, PotentialCategory, PotentialGame};
use rust_decimal::Decimal;
use surrealdb::sql::Thing;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::LedgerSettings;
use crate::database::{record, GameRecords, GAME};
use crate::database_manager::{DatabaseRequest, Responder};
use crate::error::LedgerError;
use crate::identity::Principal;
use crate::ledger::{self, Membership};

pub type LedgerResponder<T> = oneshot::Sender<Result<T, LedgerError>>;

// a freshly drawn join code may collide with another game's live code
const JOIN_CODE_ATTEMPTS: usize = 8;

pub enum LedgerRequest {
    CreateGame {
        principal: Principal,
        game: PotentialGame,
        responder: LedgerResponder<common::Game>,
    },
    ListGames {
        principal: Principal,
        responder: LedgerResponder<Vec<common::GameSummary>>,
    },
    ReadGame {
        principal: Principal,
        game_id: String,
        responder: LedgerResponder<common::Game>,
    },
    AddCategory {
        principal: Principal,
        game_id: String,
        category: PotentialCategory,
        responder: LedgerResponder<common::Game>,
    },
    GenerateJoinCode {
        principal: Principal,
        game_id: String,
        responder: LedgerResponder<(String, DateTime<Utc>)>,
    },
    VerifyJoinCode {
        code: String,
        responder: LedgerResponder<common::GameSummary>,
    },
    JoinGame {
        principal: Principal,
        game_id: String,
        code: String,
        responder: LedgerResponder<common::Participant>,
    },
    PlaceBets {
        principal: Principal,
        game_id: String,
        bets: Vec<BetSlip>,
        responder: LedgerResponder<(Decimal, Vec<common::Bet>)>,
    },
    LockGame {
        principal: Principal,
        game_id: String,
        responder: LedgerResponder<common::Game>,
    },
    ResolveCategory {
        principal: Principal,
        game_id: String,
        category_id: String,
        winner_id: String,
        responder: LedgerResponder<common::Game>,
    },
    DeleteGame {
        principal: Principal,
        game_id: String,
        responder: LedgerResponder<()>,
    },
}

/// Runs ledger operations one at a time, so every read-validate-write cycle
/// sees the state its own writes are based on.
pub struct LedgerManager {
    work_queue: mpsc::Receiver<LedgerRequest>,
    database_requester: mpsc::Sender<DatabaseRequest>,
    catalog: Catalog,
    settings: LedgerSettings,
}

fn reply<T>(responder: LedgerResponder<T>, result: Result<T, LedgerError>) {
    match &result {
        Err(LedgerError::Store(error)) => warn!(%error, "ledger operation failed"),
        Err(error) => debug!(%error, "ledger operation refused"),
        Ok(_) => {}
    }
    // we do not care if the receiver has already disappeared
    responder.send(result).ok();
}

//NOTE: No functions in this impl may crash
impl LedgerManager {
    pub fn new(
        work_queue: mpsc::Receiver<LedgerRequest>,
        database_requester: mpsc::Sender<DatabaseRequest>,
        catalog: Catalog,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            work_queue,
            database_requester,
            catalog,
            settings,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            match request {
                LedgerRequest::CreateGame {
                    principal,
                    game,
                    responder,
                } => reply(responder, self.create_game(&principal, &game).await),
                LedgerRequest::ListGames {
                    principal,
                    responder,
                } => reply(responder, self.list_games(&principal).await),
                LedgerRequest::ReadGame {
                    principal,
                    game_id,
                    responder,
                } => {
                    let result = self.load(&game_id).await.map(|records| records.view(&principal));
                    reply(responder, result)
                }
                LedgerRequest::AddCategory {
                    principal,
                    game_id,
                    category,
                    responder,
                } => reply(responder, self.add_category(&principal, &game_id, &category).await),
                LedgerRequest::GenerateJoinCode {
                    principal,
                    game_id,
                    responder,
                } => reply(responder, self.generate_join_code(&principal, &game_id).await),
                LedgerRequest::VerifyJoinCode { code, responder } => {
                    reply(responder, self.verify_join_code(&code).await)
                }
                LedgerRequest::JoinGame {
                    principal,
                    game_id,
                    code,
                    responder,
                } => reply(responder, self.join_game(&principal, &game_id, &code).await),
                LedgerRequest::PlaceBets {
                    principal,
                    game_id,
                    bets,
                    responder,
                } => reply(responder, self.place_bets(&principal, &game_id, &bets).await),
                LedgerRequest::LockGame {
                    principal,
                    game_id,
                    responder,
                } => reply(responder, self.lock_game(&principal, &game_id).await),
                LedgerRequest::ResolveCategory {
                    principal,
                    game_id,
                    category_id,
                    winner_id,
                    responder,
                } => {
                    let result = self
                        .resolve_category(&principal, &game_id, &category_id, &winner_id)
                        .await;
                    reply(responder, result)
                }
                LedgerRequest::DeleteGame {
                    principal,
                    game_id,
                    responder,
                } => reply(responder, self.delete_game(&principal, &game_id).await),
            }
        }
        debug!("ledger work queue closed");
    }

    async fn ask<T>(
        &self,
        request: impl FnOnce(Responder<T>) -> DatabaseRequest,
    ) -> anyhow::Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.database_requester
            .send(request(resp_tx))
            .await
            .map_err(|_| anyhow!("database manager is gone"))?;
        resp_rx.await?
    }

    async fn fetch(&self, id: &Thing) -> Result<Option<GameRecords>, LedgerError> {
        let id = id.clone();
        Ok(self
            .ask(|responder| DatabaseRequest::LoadGame { id, responder })
            .await?)
    }

    async fn load(&self, game_id: &str) -> Result<GameRecords, LedgerError> {
        self.fetch(&record(GAME, game_id))
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("game {game_id}")))
    }

    async fn create_game(
        &self,
        principal: &Principal,
        potential: &PotentialGame,
    ) -> Result<common::Game, LedgerError> {
        let (game, categories, admin) =
            ledger::plan_new_game(principal, potential, &self.catalog, Utc::now())?;
        let id = game.id.clone();
        self.ask(|responder| DatabaseRequest::CreateGame {
            game,
            categories,
            admin,
            responder,
        })
        .await?;
        info!(game = %id, admin = %principal, "game created");

        let records = self
            .fetch(&id)
            .await?
            .ok_or_else(|| LedgerError::Store(format!("game {id} vanished after creation")))?;
        Ok(records.view(principal))
    }

    async fn list_games(
        &self,
        principal: &Principal,
    ) -> Result<Vec<common::GameSummary>, LedgerError> {
        let principal_key = principal.as_str().to_string();
        let ids = self
            .ask(|responder| DatabaseRequest::GamesForPrincipal {
                principal: principal_key,
                responder,
            })
            .await?;

        let mut games = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(records) = self.fetch(id).await? {
                games.push(records);
            }
        }
        games.sort_by(|a, b| b.game.created_at.cmp(&a.game.created_at));
        Ok(games.iter().map(GameRecords::summary).collect())
    }

    async fn add_category(
        &self,
        principal: &Principal,
        game_id: &str,
        potential: &PotentialCategory,
    ) -> Result<common::Game, LedgerError> {
        let records = self.load(game_id).await?;
        let category = ledger::plan_new_category(&records, principal, potential)?;
        info!(game = %game_id, category = %category.category.name, "category added");
        self.ask(|responder| DatabaseRequest::AddCategory {
            category,
            responder,
        })
        .await?;

        Ok(self.load(game_id).await?.view(principal))
    }

    async fn generate_join_code(
        &self,
        principal: &Principal,
        game_id: &str,
    ) -> Result<(String, DateTime<Utc>), LedgerError> {
        let records = self.load(game_id).await?;
        ledger::authorize_join_code(&records, principal)?;

        let now = Utc::now();
        let mut code = None;
        for _ in 0..JOIN_CODE_ATTEMPTS {
            let candidate = ledger::generate_join_code(&mut rand::thread_rng());
            let lookup = candidate.clone();
            let holders = self
                .ask(|responder| DatabaseRequest::FindGamesByJoinCode {
                    code: lookup,
                    responder,
                })
                .await?;
            let taken = holders.iter().any(|game| {
                game.id != records.game.id
                    && game.join_code_expires_at.is_some_and(|expires_at| expires_at > now)
            });
            if !taken {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or_else(|| LedgerError::Store("could not draw an unused join code".into()))?;

        let expires_at = now + self.settings.join_code_ttl;
        let (game, stored) = (records.game.id.clone(), code.clone());
        self.ask(|responder| DatabaseRequest::SetJoinCode {
            game,
            code: stored,
            expires_at,
            responder,
        })
        .await?;
        info!(game = %game_id, %expires_at, "join code issued");
        Ok((code, expires_at))
    }

    async fn verify_join_code(&self, code: &str) -> Result<common::GameSummary, LedgerError> {
        let code = ledger::normalize_join_code(code).ok_or(LedgerError::JoinCodeInvalidOrExpired)?;
        let lookup = code.clone();
        let candidates = self
            .ask(|responder| DatabaseRequest::FindGamesByJoinCode {
                code: lookup,
                responder,
            })
            .await?;

        let now = Utc::now();
        let game = candidates
            .into_iter()
            .find(|game| game.join_code_expires_at.is_some_and(|expires_at| expires_at > now))
            .ok_or(LedgerError::JoinCodeInvalidOrExpired)?;
        let records = self
            .fetch(&game.id)
            .await?
            .ok_or(LedgerError::JoinCodeInvalidOrExpired)?;
        ledger::check_join_code(&records, &code, now, self.settings.max_participants)?;
        Ok(records.summary())
    }

    async fn join_game(
        &self,
        principal: &Principal,
        game_id: &str,
        code: &str,
    ) -> Result<common::Participant, LedgerError> {
        let records = self.load(game_id).await?;
        let participant = match ledger::plan_join(
            &records,
            principal,
            code,
            Utc::now(),
            self.settings.max_participants,
        )? {
            Membership::Existing(participant) => {
                debug!(game = %game_id, %principal, "already a participant");
                participant
            }
            Membership::New(participant) => {
                let stored = participant.clone();
                self.ask(|responder| DatabaseRequest::AddParticipant {
                    participant: stored,
                    responder,
                })
                .await?;
                info!(game = %game_id, %principal, "participant joined");
                participant
            }
        };
        Ok(records.participant_view(&participant))
    }

    async fn place_bets(
        &self,
        principal: &Principal,
        game_id: &str,
        slips: &[BetSlip],
    ) -> Result<(Decimal, Vec<common::Bet>), LedgerError> {
        let records = self.load(game_id).await?;
        let plan = ledger::plan_bets(&records, principal, slips)?;
        let participant = plan.participant.clone();
        let balance = plan.balance;
        self.ask(|responder| DatabaseRequest::ApplyBetPlan { plan, responder })
            .await?;
        info!(game = %game_id, %principal, slips = slips.len(), %balance, "bets placed");

        let records = self.load(game_id).await?;
        Ok((balance, records.bet_views(&participant)))
    }

    async fn lock_game(
        &self,
        principal: &Principal,
        game_id: &str,
    ) -> Result<common::Game, LedgerError> {
        let mut records = self.load(game_id).await?;
        if ledger::plan_lock(&records, principal)? {
            let game = records.game.id.clone();
            self.ask(|responder| DatabaseRequest::LockGame { game, responder })
                .await?;
            records.game.locked = true;
            info!(game = %game_id, "game locked");
        }
        Ok(records.view(principal))
    }

    async fn resolve_category(
        &self,
        principal: &Principal,
        game_id: &str,
        category_id: &str,
        winner_id: &str,
    ) -> Result<common::Game, LedgerError> {
        let records = self.load(game_id).await?;
        let settlement = ledger::plan_settlement(&records, principal, category_id, winner_id)?;
        let settled = settlement.payouts.len();

        let applied = self
            .ask(|responder| DatabaseRequest::ApplySettlement {
                settlement,
                responder,
            })
            .await;
        if let Err(error) = applied {
            // the store refuses to overwrite a winner; report that as such
            let current = self.load(game_id).await?;
            return match current.category(category_id) {
                Some(category) if category.winner.is_some() => {
                    Err(LedgerError::AlreadyResolved(category.name.clone()))
                }
                _ => Err(error.into()),
            };
        }
        info!(game = %game_id, category = %category_id, winner = %winner_id, settled, "category resolved");

        Ok(self.load(game_id).await?.view(principal))
    }

    async fn delete_game(&self, principal: &Principal, game_id: &str) -> Result<(), LedgerError> {
        let records = self.load(game_id).await?;
        ledger::authorize_delete(&records, principal)?;
        let game = records.game.id.clone();
        self.ask(|responder| DatabaseRequest::DeleteGame { game, responder })
            .await?;
        info!(game = %game_id, "game deleted");
        Ok(())
    }
}
