use sqlx::SqlitePool;

/// Numbered migrations, applied in order and recorded in `_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[("001_init", include_str!("../migrations/001_init.sql"))];

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // WAL lets the bot's scheduler read while the server writes
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?")
                .bind(name)
                .fetch_one(pool)
                .await?;
        if applied {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() && !is_comment_only(trimmed) {
                sqlx::query(trimmed).execute(&mut *tx).await?;
            }
        }
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!("Applied migration: {}", name);
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

fn is_comment_only(statement: &str) -> bool {
    statement
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with("--"))
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_seed_data_present() {
        let pool = test_pool().await;
        let services: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE is_active = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(services > 0);
        let salon: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM salon_info")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(salon, 1);
    }

    #[test]
    fn test_comment_only_statement() {
        assert!(is_comment_only("-- Seed data\n\n-- more"));
        assert!(!is_comment_only("-- header\nCREATE TABLE x (id INTEGER)"));
    }
}
