//! Background loop: completion, reminders, daily slot generation and the
//! morning summary, all in business time.

use std::sync::Arc;

use chocoo_core::jobs::{self, DailyTrigger};
use chocoo_core::BookingLifecycle;
use teloxide::{prelude::*, types::ChatId};
use tokio::time::{interval, Duration};

const TICK_SECS: u64 = 60;
const AUTO_GENERATE_HOUR: u32 = 7;
const MORNING_SUMMARY_HOUR: u32 = 8;

pub struct Scheduler {
    bot: Bot,
    pool: sqlx::SqlitePool,
    lifecycle: Arc<BookingLifecycle>,
    admin_tg_ids: Arc<Vec<i64>>,
    generation: DailyTrigger,
    summary: DailyTrigger,
}

impl Scheduler {
    pub fn new(
        bot: Bot,
        pool: sqlx::SqlitePool,
        lifecycle: Arc<BookingLifecycle>,
        admin_tg_ids: Arc<Vec<i64>>,
    ) -> Self {
        let now = lifecycle.time().now();
        Self {
            bot,
            pool,
            generation: DailyTrigger::new(jobs::at_hour(AUTO_GENERATE_HOUR)).started_at(now),
            summary: DailyTrigger::new(jobs::at_hour(MORNING_SUMMARY_HOUR)).started_at(now),
            lifecycle,
            admin_tg_ids,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(TICK_SECS));
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        if let Err(e) = self.lifecycle.complete_elapsed().await {
            tracing::error!("Auto-completion failed: {}", e);
        }

        self.send_reminders().await;

        let now = self.lifecycle.time().now();
        if self.generation.is_due(now) {
            match jobs::auto_generate(&self.lifecycle).await {
                Ok(report) => {
                    self.generation.mark_done(now);
                    tracing::info!(
                        "Daily generation: {} slots on {} days",
                        report.slots_created,
                        report.days_generated.len()
                    );
                }
                // Not marked done, so the next tick inside the window retries
                Err(e) => tracing::error!("Daily slot generation failed: {}", e),
            }
        }

        if self.summary.is_due(now) {
            match jobs::morning_summary(&self.lifecycle).await {
                Ok(messages) => {
                    self.summary.mark_done(now);
                    for text in &messages {
                        self.tell_admins(text).await;
                    }
                }
                Err(e) => tracing::error!("Morning summary failed: {}", e),
            }
        }
    }

    async fn send_reminders(&self) {
        let due = match jobs::claim_due_reminders(&self.lifecycle).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Reminder scan failed: {}", e);
                return;
            }
        };
        if due.is_empty() {
            return;
        }

        let address = self.salon_address().await;
        for detail in &due {
            let text = jobs::reminder_text(detail, address.as_deref());
            match self
                .bot
                .send_message(ChatId(detail.client.telegram_id), text)
                .await
            {
                Ok(_) => tracing::info!("📬 Reminder sent for booking {}", detail.id),
                Err(e) => tracing::warn!("Reminder for booking {} not delivered: {}", detail.id, e),
            }
        }
    }

    async fn salon_address(&self) -> Option<String> {
        sqlx::query_scalar::<_, String>("SELECT address FROM salon_info WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read salon address: {}", e);
                None
            })
    }

    async fn tell_admins(&self, text: &str) {
        for &admin in self.admin_tg_ids.iter() {
            if let Err(e) = self.bot.send_message(ChatId(admin), text).await {
                tracing::warn!("Failed to send summary to admin {}: {}", admin, e);
            }
        }
    }
}
