use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use liqua_common::types::User;

use super::store::uuid_column;

pub fn insert_user(conn: &Connection, user: &User) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![user.id.to_string(), user.name, user.created_at],
    )?;
    Ok(())
}

pub fn find_user(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<User>> {
    conn.query_row("SELECT id, name, created_at FROM users WHERE id = ?1", [id.to_string()], |row| {
        Ok(User { id: uuid_column(row, 0)?, name: row.get(1)?, created_at: row.get(2)? })
    })
    .optional()
}
