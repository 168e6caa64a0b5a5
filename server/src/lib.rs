use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::Catalog;
use crate::config::LedgerSettings;
use crate::database::DatabaseConnection;
use crate::database_manager::DatabaseManager;
use crate::ledger_manager::{LedgerManager, LedgerRequest};

pub mod catalog;
pub mod config;
pub mod connection_manager;
pub mod database;
pub mod database_manager;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod ledger_manager;
pub mod view;

const QUEUE_DEPTH: usize = 32;

pub struct Services {
    pub ledger_tx: mpsc::Sender<LedgerRequest>,
    pub db_task: JoinHandle<()>,
    pub ledger_task: JoinHandle<()>,
}

/// Start the database and ledger managers and hand back the queue that feeds them.
pub fn spawn_services(database: DatabaseConnection, catalog: Catalog, settings: LedgerSettings) -> Services {
    let (db_tx, db_rx) = mpsc::channel(QUEUE_DEPTH);
    let mut db_manager = DatabaseManager::new(database, db_rx);

    let db_task = tokio::spawn(async move {
        db_manager.manage().await;
    });

    let (ledger_tx, ledger_rx) = mpsc::channel(QUEUE_DEPTH);
    let mut ledger_manager = LedgerManager::new(ledger_rx, db_tx, catalog, settings);

    let ledger_task = tokio::spawn(async move {
        ledger_manager.manage().await;
    });

    Services {
        ledger_tx,
        db_task,
        ledger_task,
    }
}
