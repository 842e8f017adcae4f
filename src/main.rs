#[macro_use] extern crate rocket;

use log::{error, info};
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket};
use serde::Deserialize;
use crate::classtime::parse_timezone;
use crate::db::DbPoolFairing;

mod catalog;
mod classtime;
mod db;
mod error;
mod ledger;
mod seed;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Capacity every class gets back when all bookings are cancelled.
    #[serde(default = "default_capacity")]
    pub default_capacity: i64,
    /// Timezone of the civil start times stored in the catalog.
    #[serde(default = "default_reference_timezone")]
    pub reference_timezone: String,
    #[serde(default)]
    pub seed_demo_data: bool,
}
fn default_database_url() -> String {
    "sqlite://fitness.db".to_string()
}
fn default_capacity() -> i64 {
    10
}
fn default_reference_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn check_config() -> AdHoc {
    AdHoc::try_on_ignite("Studio Config", |rocket| async {
        let cfg = match rocket.figment().extract::<AppConfig>() {
            Ok(cfg) => cfg,
            Err(err) => {
                error!("Invalid configuration: {err}");
                return Err(rocket);
            }
        };
        if let Err(err) = parse_timezone(&cfg.reference_timezone) {
            error!("Invalid reference_timezone: {err}");
            return Err(rocket);
        }
        if cfg.default_capacity < 0 {
            error!("Invalid default_capacity: {}", cfg.default_capacity);
            return Err(rocket);
        }
        info!("Reference timezone: {}, default capacity: {}", cfg.reference_timezone, cfg.default_capacity);
        Ok(rocket.manage(cfg))
    })
}

pub(crate) fn build_rocket(figment: Figment) -> Rocket<Build> {
    let rocket = rocket::custom(figment)
        .attach(check_config())
        .attach(DbPoolFairing());
    let rocket = catalog::extend(rocket);
    let rocket = ledger::extend(rocket);
    seed::extend(rocket)
}

#[launch]
fn rocket() -> _ {
    build_rocket(rocket::Config::figment())
}
