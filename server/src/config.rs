use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::Level;

pub const DEFAULT_MAX_PARTICIPANTS: usize = 100;
pub const DEFAULT_JOIN_CODE_TTL_HOURS: i64 = 24;

#[derive(Parser, Debug)]
#[command(author, version, about = "Awards-night betting pool server")]
pub struct Args {
    /// Address the websocket server listens on
    #[arg(long, default_value = "127.0.0.1:6379")]
    pub listen: SocketAddr,

    /// SurrealDB endpoint, e.g. `ws://127.0.0.1:8000` or `mem://`
    #[arg(long, default_value = "ws://127.0.0.1:8000")]
    pub database: String,

    #[arg(long, default_value = "test")]
    pub namespace: String,

    #[arg(long, default_value = "awards_pool")]
    pub database_name: String,

    #[arg(long)]
    pub db_user: Option<String>,

    #[arg(long)]
    pub db_password: Option<String>,

    /// YAML file mapping bearer tokens to principals
    #[arg(long)]
    pub identities: PathBuf,

    /// JSON predictions file new games are seeded from
    #[arg(long)]
    pub catalog: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_PARTICIPANTS)]
    pub max_participants: usize,

    #[arg(long, default_value_t = DEFAULT_JOIN_CODE_TTL_HOURS)]
    pub join_code_ttl_hours: i64,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub address: String,
    pub namespace: String,
    pub database: String,
    pub credentials: Option<Credentials>,
}

impl DatabaseSettings {
    /// Throwaway embedded store.
    pub fn in_memory() -> Self {
        Self {
            address: "mem://".into(),
            namespace: "test".into(),
            database: "awards_pool".into(),
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub max_participants: usize,
    pub join_code_ttl: chrono::Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            join_code_ttl: chrono::Duration::hours(DEFAULT_JOIN_CODE_TTL_HOURS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub database: DatabaseSettings,
    pub ledger: LedgerSettings,
    pub identities: PathBuf,
    pub catalog: PathBuf,
    pub log_level: Level,
}

pub fn build_config(args: &Args) -> anyhow::Result<Config> {
    if args.max_participants == 0 {
        bail!("max_participants must be at least 1");
    }
    if args.join_code_ttl_hours <= 0 {
        bail!("join_code_ttl_hours must be positive");
    }
    let credentials = match (&args.db_user, &args.db_password) {
        (Some(username), Some(password)) => Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        }),
        (None, None) => None,
        _ => bail!("db_user and db_password must be given together"),
    };
    let log_level = args
        .log_level
        .parse::<Level>()
        .with_context(|| format!("invalid log_level {:?}", args.log_level))?;

    Ok(Config {
        listen: args.listen,
        database: DatabaseSettings {
            address: args.database.clone(),
            namespace: args.namespace.clone(),
            database: args.database_name.clone(),
            credentials,
        },
        ledger: LedgerSettings {
            max_participants: args.max_participants,
            join_code_ttl: chrono::Duration::hours(args.join_code_ttl_hours),
        },
        identities: args.identities.clone(),
        catalog: args.catalog.clone(),
        log_level,
    })
}
