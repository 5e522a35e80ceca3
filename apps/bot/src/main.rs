mod commands;
mod config;
mod format;
mod scheduler;

use std::sync::Arc;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use teloxide::{prelude::*, types::WebAppInfo};

use chocoo_core::store::SqliteStore;
use chocoo_core::time::SystemClock;
use chocoo_core::{BookingLifecycle, TimePolicy};

use commands::{handle_callback, handle_command, BotState, Command};
use config::Config;
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;

    // Either binary may start first
    chocoo_core::db::run_migrations(&pool).await?;

    let time = TimePolicy::new(config.utc_offset_hours, Arc::new(SystemClock))
        .context("BUSINESS_UTC_OFFSET_HOURS is out of range")?;
    let store = SqliteStore::new(pool.clone());
    let lifecycle = Arc::new(BookingLifecycle::new(Arc::new(store.clone()), time));
    let admin_tg_ids = Arc::new(config.admin_tg_ids.clone());

    let webapp = match &config.webapp_url {
        Some(url) => Some(WebAppInfo {
            url: url.parse().context("WEBAPP_URL must be a valid URL")?,
        }),
        None => {
            tracing::warn!("WEBAPP_URL not set, /start will have no booking button");
            None
        }
    };

    let bot = Bot::new(&config.bot_token);

    tracing::info!("Chocoo bot starting...");

    let scheduler = Scheduler::new(
        bot.clone(),
        pool.clone(),
        lifecycle.clone(),
        admin_tg_ids.clone(),
    );
    tokio::spawn(scheduler.run());

    let state = BotState {
        pool,
        store,
        lifecycle,
        webapp,
        admin_tg_ids,
    };

    // Handle commands + callback queries (inline buttons)
    let cmd_handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint({
            let state = state.clone();
            move |bot: Bot, msg: Message, cmd: Command| {
                let state = state.clone();
                async move {
                    handle_command(bot, msg, cmd, &state).await?;
                    Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                }
            }
        });

    let callback_handler = Update::filter_callback_query().endpoint({
        let state = state.clone();
        move |bot: Bot, q: CallbackQuery| {
            let state = state.clone();
            async move {
                handle_callback(bot, q, &state).await?;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            }
        }
    });

    let handler = dptree::entry()
        .branch(cmd_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
