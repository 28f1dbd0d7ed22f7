// Per-client processed-mutation watermarks.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::store::uuid_column;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRecord {
    pub user_id: Uuid,
    pub last_mutation_id: i64,
}

pub fn find_client(conn: &Connection, client_id: &str) -> rusqlite::Result<Option<ClientRecord>> {
    conn.query_row(
        "SELECT user_id, last_mutation_id FROM clients WHERE client_id = ?1",
        [client_id],
        |row| Ok(ClientRecord { user_id: uuid_column(row, 0)?, last_mutation_id: row.get(1)? }),
    )
    .optional()
}

/// Record that every mutation up to `last_mutation_id` has been processed.
pub fn set_last_mutation_id(
    conn: &Connection,
    client_id: &str,
    user_id: Uuid,
    last_mutation_id: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "
        INSERT INTO clients (client_id, user_id, last_mutation_id) VALUES (?1, ?2, ?3)
        ON CONFLICT (client_id) DO UPDATE SET last_mutation_id = excluded.last_mutation_id
        ",
        params![client_id, user_id.to_string(), last_mutation_id],
    )?;
    Ok(())
}
