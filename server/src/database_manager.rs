use chrono::{DateTime, Utc};
use surrealdb::sql::Thing;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::database::{
    BetPlan, DatabaseConnection, DbGame, DbParticipant, GameRecords, NewCategory, Settlement,
};

pub type Responder<T> = oneshot::Sender<anyhow::Result<T>>;

#[derive(Debug)]
pub enum DatabaseRequest {
    LoadGame {
        id: Thing,
        responder: Responder<Option<GameRecords>>,
    },
    FindGamesByJoinCode {
        code: String,
        responder: Responder<Vec<DbGame>>,
    },
    GamesForPrincipal {
        principal: String,
        responder: Responder<Vec<Thing>>,
    },
    CreateGame {
        game: DbGame,
        categories: Vec<NewCategory>,
        admin: DbParticipant,
        responder: Responder<()>,
    },
    AddCategory {
        category: NewCategory,
        responder: Responder<()>,
    },
    AddParticipant {
        participant: DbParticipant,
        responder: Responder<()>,
    },
    SetJoinCode {
        game: Thing,
        code: String,
        expires_at: DateTime<Utc>,
        responder: Responder<()>,
    },
    LockGame {
        game: Thing,
        responder: Responder<()>,
    },
    ApplyBetPlan {
        plan: BetPlan,
        responder: Responder<()>,
    },
    ApplySettlement {
        settlement: Settlement,
        responder: Responder<()>,
    },
    DeleteGame {
        game: Thing,
        responder: Responder<()>,
    },
}

/// Sole owner of the store connection; requests are served one at a time.
pub struct DatabaseManager {
    db_connection: DatabaseConnection,
    work_queue: mpsc::Receiver<DatabaseRequest>,
}

fn respond<T>(responder: Responder<T>, result: anyhow::Result<T>) {
    if let Err(error) = &result {
        warn!(error = %format!("{error:#}"), "database request failed");
    }
    // we do not care if the receiver has already disappeared
    let _ = responder.send(result);
}

impl DatabaseManager {
    pub fn new(
        db_connection: DatabaseConnection,
        work_queue: mpsc::Receiver<DatabaseRequest>,
    ) -> Self {
        Self {
            db_connection,
            work_queue,
        }
    }

    pub async fn manage(&mut self) {
        while let Some(request) = self.work_queue.recv().await {
            match request {
                DatabaseRequest::LoadGame { id, responder } => {
                    respond(responder, self.db_connection.load_game(&id).await);
                }
                DatabaseRequest::FindGamesByJoinCode { code, responder } => {
                    respond(responder, self.db_connection.find_games_by_join_code(&code).await);
                }
                DatabaseRequest::GamesForPrincipal {
                    principal,
                    responder,
                } => {
                    respond(responder, self.db_connection.games_for_principal(&principal).await);
                }
                DatabaseRequest::CreateGame {
                    game,
                    categories,
                    admin,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .create_game(&game, &categories, &admin)
                        .await;
                    respond(responder, resp);
                }
                DatabaseRequest::AddCategory {
                    category,
                    responder,
                } => {
                    respond(responder, self.db_connection.add_category(&category).await);
                }
                DatabaseRequest::AddParticipant {
                    participant,
                    responder,
                } => {
                    respond(responder, self.db_connection.add_participant(&participant).await);
                }
                DatabaseRequest::SetJoinCode {
                    game,
                    code,
                    expires_at,
                    responder,
                } => {
                    let resp = self
                        .db_connection
                        .set_join_code(&game, &code, expires_at)
                        .await;
                    respond(responder, resp);
                }
                DatabaseRequest::LockGame { game, responder } => {
                    respond(responder, self.db_connection.lock_game(&game).await);
                }
                DatabaseRequest::ApplyBetPlan { plan, responder } => {
                    respond(responder, self.db_connection.apply_bet_plan(&plan).await);
                }
                DatabaseRequest::ApplySettlement {
                    settlement,
                    responder,
                } => {
                    respond(responder, self.db_connection.apply_settlement(&settlement).await);
                }
                DatabaseRequest::DeleteGame { game, responder } => {
                    respond(responder, self.db_connection.delete_game(&game).await);
                }
            }
        }
        debug!("database work queue closed");
    }
}
