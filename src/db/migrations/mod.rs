use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Embedded migration scripts, applied in numeric order of their prefix.
const MIGRATIONS: &[(&str, &str)] = &[
    ("002_add_indexes.sql", include_str!("sql/002_add_indexes.sql")),
    ("001_init.sql", include_str!("sql/001_init.sql")),
];

fn order_value(name: &str) -> usize {
    name.split('_')
        .next()
        .and_then(|prefix| prefix.parse::<usize>().ok())
        .unwrap_or(usize::MAX)
}

/// Every script is idempotent, so this runs on each startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut entries = MIGRATIONS.to_vec();
    entries.sort_by_key(|(name, _)| order_value(name));

    for (name, sql) in entries {
        pool.execute(sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}
