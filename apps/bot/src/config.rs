use anyhow::{Context, Result};
use std::env;

use chocoo_core::time::DEFAULT_UTC_OFFSET_HOURS;
use chocoo_core::validation::parse_id_list;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bot_token: String,
    pub admin_tg_ids: Vec<i64>,
    pub webapp_url: Option<String>,
    pub utc_offset_hours: i32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:chocoo.db?mode=rwc".to_string()),
            bot_token: env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?,
            admin_tg_ids: parse_id_list(&env::var("ADMIN_TG_IDS").unwrap_or_default())
                .context("ADMIN_TG_IDS must be a comma-separated list of Telegram ids")?,
            webapp_url: env::var("WEBAPP_URL").ok().filter(|u| !u.trim().is_empty()),
            utc_offset_hours: match env::var("BUSINESS_UTC_OFFSET_HOURS") {
                Ok(v) => v
                    .parse()
                    .context("BUSINESS_UTC_OFFSET_HOURS must be a whole number of hours")?,
                Err(_) => DEFAULT_UTC_OFFSET_HOURS,
            },
        })
    }
}
