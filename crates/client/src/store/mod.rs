// Persistence: SQLite client.db with the outbox and cached sessions.

pub mod meta_db;
pub mod sessions;
