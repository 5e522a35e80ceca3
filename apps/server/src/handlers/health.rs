use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub store_reachable: bool,
    /// Business-local clock the cancellation and booking windows use.
    pub business_now: String,
    pub business_today: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let store_reachable = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM slots")
        .fetch_one(&state.db)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Health probe could not reach the store: {}", e);
            false
        }
    };

    let time = state.lifecycle.time();
    Json(HealthReport {
        status: if store_reachable { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        store_reachable,
        business_now: time.now().to_rfc3339(),
        business_today: time.today().to_string(),
    })
}
