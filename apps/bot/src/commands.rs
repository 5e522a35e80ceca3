use std::sync::Arc;

use chocoo_core::models::{BookingDetail, BookingStatus, ClientProfile};
use chocoo_core::store::SqliteStore;
use chocoo_core::BookingLifecycle;
use chrono::Duration;
use teloxide::{
    prelude::*,
    types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, WebAppInfo},
    utils::command::BotCommands,
};

use crate::format::{self, CallbackAction};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "Открыть запись")]
    Start,
    #[command(description = "Мои записи")]
    MyBookings,
    #[command(description = "Записи на сегодня (для мастера)")]
    Today,
    #[command(description = "Записи на завтра (для мастера)")]
    Tomorrow,
    #[command(description = "Помощь")]
    Help,
}

#[derive(Clone)]
pub struct BotState {
    pub pool: sqlx::SqlitePool,
    pub store: SqliteStore,
    pub lifecycle: Arc<BookingLifecycle>,
    /// Mini App button target; without it /start only greets.
    pub webapp: Option<WebAppInfo>,
    pub admin_tg_ids: Arc<Vec<i64>>,
}

impl BotState {
    fn is_admin(&self, tg_id: i64) -> bool {
        self.admin_tg_ids.contains(&tg_id)
    }

    fn booking_keyboard(&self) -> Option<InlineKeyboardMarkup> {
        self.webapp.clone().map(|info| {
            InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::web_app(
                "💆 Записаться",
                info,
            )]])
        })
    }

    async fn client_by_telegram(&self, tg_id: i64) -> anyhow::Result<Option<ClientProfile>> {
        Ok(sqlx::query_as::<_, ClientProfile>(
            "SELECT id, telegram_id, first_name, username, phone, instagram, consent_given, role
             FROM users WHERE telegram_id = ?",
        )
        .bind(tg_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Sends to every admin; a failed delivery only gets logged.
    async fn tell_admins(&self, bot: &Bot, text: &str) {
        for &admin in self.admin_tg_ids.iter() {
            if let Err(e) = bot.send_message(ChatId(admin), text).await {
                tracing::warn!("Failed to notify admin {}: {}", admin, e);
            }
        }
    }
}

// ── Command handlers ──

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: &BotState,
) -> anyhow::Result<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0);

    match cmd {
        Command::Start => {
            let mut request = bot
                .send_message(
                    msg.chat.id,
                    "✨ <b>Chocoo</b> ✨\n\n\
                     Здравствуйте! 👋\n\
                     Здесь можно записаться на уход за кожей лица.\n\n\
                     Нажмите кнопку ниже, чтобы выбрать услугу и удобное время.",
                )
                .parse_mode(ParseMode::Html);
            if let Some(keyboard) = state.booking_keyboard() {
                request = request.reply_markup(keyboard);
            }
            request.await?;
        }

        Command::MyBookings => {
            let today = state.lifecycle.time().today();
            let upcoming: Vec<BookingDetail> = match state.client_by_telegram(user_id).await? {
                Some(client) => {
                    let mut list: Vec<BookingDetail> = state
                        .store
                        .client_bookings(client.id)
                        .await?
                        .into_iter()
                        .filter(|b| b.status == BookingStatus::Confirmed && b.slot.date >= today)
                        .collect();
                    list.sort_by_key(|b| (b.slot.date, b.slot.start_time));
                    list
                }
                None => Vec::new(),
            };

            if upcoming.is_empty() {
                let mut request =
                    bot.send_message(msg.chat.id, "У вас пока нет активных записей");
                if let Some(keyboard) = state.booking_keyboard() {
                    request = request.reply_markup(keyboard);
                }
                request.await?;
                return Ok(());
            }

            let buttons: Vec<Vec<InlineKeyboardButton>> = upcoming
                .iter()
                .map(|b| {
                    vec![InlineKeyboardButton::callback(
                        format!(
                            "❌ Отменить {} ({})",
                            b.service.name,
                            format::format_date_ru(b.slot.date)
                        ),
                        CallbackAction::Cancel(b.id).data(),
                    )]
                })
                .collect();

            bot.send_message(msg.chat.id, format::my_bookings_text(&upcoming))
                .parse_mode(ParseMode::Html)
                .reply_markup(InlineKeyboardMarkup::new(buttons))
                .await?;
        }

        Command::Today | Command::Tomorrow => {
            if !state.is_admin(user_id) {
                bot.send_message(msg.chat.id, "⛔ Только для мастера").await?;
                return Ok(());
            }

            let (label, offset) = match cmd {
                Command::Today => ("Сегодня", 0),
                _ => ("Завтра", 1),
            };
            let date = state.lifecycle.time().today() + Duration::days(offset);
            send_day_bookings(&bot, msg.chat.id, state, label, date).await?;
        }

        Command::Help => {
            let mut text = "💆 <b>Chocoo — бот для записи</b>\n\n\
                 /start — открыть приложение для записи\n\
                 /mybookings — мои записи\n\
                 /help — помощь"
                .to_string();

            if state.is_admin(user_id) {
                text.push_str(
                    "\n\n<b>🔧 Команды мастера:</b>\n\
                     /today — записи на сегодня\n\
                     /tomorrow — записи на завтра",
                );
            }

            bot.send_message(msg.chat.id, text)
                .parse_mode(ParseMode::Html)
                .await?;
        }
    }

    Ok(())
}

async fn send_day_bookings(
    bot: &Bot,
    chat_id: ChatId,
    state: &BotState,
    label: &str,
    date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let bookings = state
        .store
        .bookings_filtered(Some(date), Some(BookingStatus::Confirmed))
        .await?;

    let mut request = bot
        .send_message(chat_id, format::day_bookings_text(label, date, &bookings))
        .parse_mode(ParseMode::Html);

    if !bookings.is_empty() {
        let buttons: Vec<Vec<InlineKeyboardButton>> = bookings
            .iter()
            .map(|b| {
                vec![InlineKeyboardButton::callback(
                    format!(
                        "❌ {} ({} {})",
                        b.client.display_name(),
                        b.slot.start_time.format("%H:%M"),
                        b.service.name,
                    ),
                    CallbackAction::AdminCancel(b.id).data(),
                )]
            })
            .collect();
        request = request.reply_markup(InlineKeyboardMarkup::new(buttons));
    }

    request.await?;
    Ok(())
}

// ── Callback query handler (inline button clicks) ──

pub async fn handle_callback(bot: Bot, q: CallbackQuery, state: &BotState) -> anyhow::Result<()> {
    let chat_id = q.message.as_ref().map(|m| m.chat().id);
    let user_id = q.from.id.0 as i64;

    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };

    match action {
        CallbackAction::Cancel(booking_id) => {
            let Some(client) = state.client_by_telegram(user_id).await? else {
                bot.answer_callback_query(&q.id)
                    .text("Запись не найдена")
                    .await?;
                return Ok(());
            };

            match state.lifecycle.client_cancel(client.id, booking_id).await {
                Ok(detail) => {
                    bot.answer_callback_query(&q.id)
                        .text("✅ Запись отменена")
                        .await?;
                    if let Some(cid) = chat_id {
                        bot.send_message(
                            cid,
                            format!(
                                "✅ Запись отменена:\n💆 {}\n📅 {} · {}",
                                detail.service.name,
                                format::format_date_ru(detail.slot.date),
                                detail.slot.start_time.format("%H:%M"),
                            ),
                        )
                        .await?;
                    }
                    state
                        .tell_admins(&bot, &format::client_cancelled_text(&detail))
                        .await;
                }
                Err(e) => {
                    tracing::info!("Client {} cancel of {} refused: {}", user_id, booking_id, e);
                    bot.answer_callback_query(&q.id)
                        .text(format::refusal_text(&e))
                        .show_alert(true)
                        .await?;
                }
            }
        }

        CallbackAction::AdminCancel(booking_id) => {
            if !state.is_admin(user_id) {
                bot.answer_callback_query(&q.id).text("⛔").await?;
                return Ok(());
            }

            match state.lifecycle.admin_cancel(booking_id).await {
                Ok(detail) => {
                    bot.answer_callback_query(&q.id)
                        .text("✅ Запись отменена")
                        .await?;

                    // The client may have blocked the bot
                    if let Err(e) = bot
                        .send_message(
                            ChatId(detail.client.telegram_id),
                            format::admin_cancelled_text(&detail),
                        )
                        .await
                    {
                        tracing::warn!(
                            "Failed to tell client {} about cancellation: {}",
                            detail.client.telegram_id,
                            e
                        );
                    }

                    if let Some(cid) = chat_id {
                        bot.send_message(
                            cid,
                            format!("✅ Запись {} отменена", detail.client.display_name()),
                        )
                        .await?;
                    }
                }
                Err(e) => {
                    bot.answer_callback_query(&q.id)
                        .text(format::refusal_text(&e))
                        .await?;
                }
            }
        }
    }

    Ok(())
}
