use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE users (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE chats (
    id                   TEXT PRIMARY KEY,
    title                TEXT NOT NULL,
    is_public            INTEGER NOT NULL DEFAULT 0,
    owner_id             TEXT NOT NULL REFERENCES users (id),
    created_at           INTEGER NOT NULL,
    updated_at           INTEGER NOT NULL,
    custom_instructions  TEXT NULL
);

CREATE INDEX chats_owner_idx ON chats (owner_id);

CREATE TABLE messages (
    id          TEXT PRIMARY KEY,
    chat_id     TEXT NOT NULL REFERENCES chats (id) ON DELETE CASCADE,
    author_id   TEXT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL DEFAULT '',
    status      TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE INDEX messages_chat_order_idx ON messages (chat_id, created_at);

CREATE TABLE chat_trees (
    id        TEXT PRIMARY KEY,
    owner_id  TEXT NOT NULL REFERENCES users (id),
    data      TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX chat_trees_owner_idx ON chat_trees (owner_id);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE clients (
    client_id         TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL REFERENCES users (id),
    last_mutation_id  INTEGER NOT NULL DEFAULT 0
);
"#;

pub(crate) const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    ensure_migration_table(conn)?;
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply server migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        tracing::info!(version, "applied server migration");
        current_version = *version;
    }

    Ok(())
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

pub fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}
