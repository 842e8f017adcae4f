use std::str::FromStr;
use std::time::Duration;
use log::{debug, error, info};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Build, Rocket};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use crate::AppConfig;
use crate::seed::seed_demo_classes;

static MIGRATOR: Migrator = sqlx::migrate!("db/migrations"); // Auto-discovers migrations in `db/migrations/`

pub struct DbPool(pub SqlitePool);

pub async fn open_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal) // use WAL for better concurrency
        .foreign_keys(true)
        // concurrent writers queue on the database lock instead of failing
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub struct DbPoolFairing();
#[rocket::async_trait]
impl Fairing for DbPoolFairing {
    fn info(&self) -> Info {
        Info {
            name: "SQLite Database Pool with Migrations",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // attached after the config check, which manages AppConfig and already logged its failure
        let Some(cfg) = rocket.state::<AppConfig>().cloned() else {
            debug!("Studio configuration not loaded, database pool not opened");
            return Err(rocket);
        };
        info!("Opening database: {}", cfg.database_url);
        let pool = match open_pool(&cfg.database_url).await {
            Ok(pool) => pool,
            Err(err) => {
                error!("Database connection error: {:?}", err);
                return Err(rocket);
            }
        };
        info!("Migrations applied successfully!");

        if cfg.seed_demo_data {
            match seed_demo_classes(&pool).await {
                Ok(0) => {}
                Ok(n) => info!("Seeded {n} demo classes"),
                Err(err) => {
                    error!("Seeding error: {:?}", err);
                    return Err(rocket);
                }
            }
        }

        Ok(rocket.manage(DbPool(pool)))
    }
}
