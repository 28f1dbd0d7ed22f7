// Cached sign-in per server, so a restarted client keeps its guest identity.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use liqua_common::protocol::push::GuestSession;
use liqua_common::types::User;

pub struct SessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn load(&self, server_url: &str) -> Result<Option<GuestSession>> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, user_name, user_created_at, token FROM sessions WHERE server_url = ?1",
                params![server_url],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to read cached session")?;

        let Some((user_id, name, created_at, token)) = row else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&user_id).with_context(|| format!("cached session has invalid user id `{user_id}`"))?;
        Ok(Some(GuestSession { user: User { id, name, created_at }, token }))
    }

    pub fn save(&self, server_url: &str, session: &GuestSession, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (server_url, user_id, user_name, user_created_at, token, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (server_url) DO UPDATE SET \
                 user_id = excluded.user_id, user_name = excluded.user_name, \
                 user_created_at = excluded.user_created_at, token = excluded.token, \
                 created_at = excluded.created_at",
                params![
                    server_url,
                    session.user.id.to_string(),
                    session.user.name,
                    session.user.created_at,
                    session.token,
                    now.to_rfc3339(),
                ],
            )
            .context("failed to cache session")?;
        Ok(())
    }

    /// Drop a session the server no longer accepts.
    pub fn forget(&self, server_url: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sessions WHERE server_url = ?1", params![server_url])
            .context("failed to forget cached session")?;
        Ok(rows > 0)
    }
}
