//! Embedded migrations for the delivery engine schema.

/// Migrator over the SQL files in `migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
