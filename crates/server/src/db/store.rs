// SQLite `Transaction` backend for authoritative mutation runs.

use std::error::Error as StdError;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use liqua_common::chat_tree::ChatTreeNode;
use liqua_common::error::StoreError;
use liqua_common::mutators::Transaction;
use liqua_common::types::{Chat, ChatPatch, ChatTree, Message, MessagePatch, MessageStatus, Role};

const CHAT_COLUMNS: &str = "id, title, is_public, owner_id, created_at, updated_at, custom_instructions";
const MESSAGE_COLUMNS: &str = "id, chat_id, author_id, role, content, status, created_at";

/// Mutation-facing view of a connection. Callers own the surrounding SQL
/// transaction; this type only reads and writes rows.
pub struct SqliteTransaction<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTransaction<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn conversion_error(index: usize, source: impl Into<Box<dyn StdError + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, source.into())
}

pub(crate) fn uuid_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(index)?;
    Uuid::parse_str(&text).map_err(|err| conversion_error(index, err))
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: uuid_column(row, 0)?,
        title: row.get(1)?,
        is_public: row.get(2)?,
        owner_id: uuid_column(row, 3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        custom_instructions: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let author_id = match row.get::<_, Option<String>>(2)? {
        Some(text) => Some(Uuid::parse_str(&text).map_err(|err| conversion_error(2, err))?),
        None => None,
    };
    let role = Role::try_from(row.get::<_, String>(3)?).map_err(|err| conversion_error(3, err))?;
    let status_text: String = row.get(5)?;
    let status = MessageStatus::parse(&status_text)
        .ok_or_else(|| conversion_error(5, format!("unknown message status `{status_text}`")))?;

    Ok(Message {
        id: uuid_column(row, 0)?,
        chat_id: uuid_column(row, 1)?,
        author_id,
        role,
        content: row.get(4)?,
        status,
        created_at: row.get(6)?,
    })
}

fn tree_from_row(row: &Row<'_>) -> rusqlite::Result<ChatTree> {
    let data: String = row.get(2)?;
    let data: Vec<ChatTreeNode> = serde_json::from_str(&data).map_err(|err| conversion_error(2, err))?;
    Ok(ChatTree { id: uuid_column(row, 0)?, owner_id: uuid_column(row, 1)?, data })
}

fn missing(kind: &str, id: Uuid) -> StoreError {
    StoreError::new(format!("{kind} {id} does not exist"))
}

impl Transaction for SqliteTransaction<'_> {
    fn chat(&self, id: Uuid) -> Result<Option<Chat>, StoreError> {
        self.conn
            .query_row(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"), [id.to_string()], chat_from_row)
            .optional()
            .map_err(StoreError::new)
    }

    fn insert_chat(&mut self, chat: &Chat) -> Result<(), StoreError> {
        self.conn
            .execute(
                &format!("INSERT INTO chats ({CHAT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    chat.id.to_string(),
                    chat.title,
                    chat.is_public,
                    chat.owner_id.to_string(),
                    chat.created_at,
                    chat.updated_at,
                    chat.custom_instructions,
                ],
            )
            .map_err(StoreError::new)?;
        Ok(())
    }

    fn update_chat(&mut self, id: Uuid, patch: &ChatPatch) -> Result<(), StoreError> {
        let mut chat = self.chat(id)?.ok_or_else(|| missing("chat", id))?;
        if let Some(title) = &patch.title {
            chat.title.clone_from(title);
        }
        if let Some(is_public) = patch.is_public {
            chat.is_public = is_public;
        }
        if let Some(custom_instructions) = &patch.custom_instructions {
            chat.custom_instructions.clone_from(custom_instructions);
        }
        if let Some(updated_at) = patch.updated_at {
            chat.updated_at = updated_at;
        }

        self.conn
            .execute(
                "UPDATE chats SET title = ?2, is_public = ?3, custom_instructions = ?4, updated_at = ?5 WHERE id = ?1",
                params![id.to_string(), chat.title, chat.is_public, chat.custom_instructions, chat.updated_at],
            )
            .map_err(StoreError::new)?;
        Ok(())
    }

    fn delete_chat(&mut self, id: Uuid) -> Result<(), StoreError> {
        // Messages go with it via ON DELETE CASCADE.
        self.conn.execute("DELETE FROM chats WHERE id = ?1", [id.to_string()]).map_err(StoreError::new)?;
        Ok(())
    }

    fn message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                message_from_row,
            )
            .optional()
            .map_err(StoreError::new)
    }

    fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY created_at, rowid"
            ))
            .map_err(StoreError::new)?;
        let rows = stmt.query_map([chat_id.to_string()], message_from_row).map_err(StoreError::new)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(StoreError::new)
    }

    fn insert_message(&mut self, message: &Message) -> Result<(), StoreError> {
        self.conn
            .execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.author_id.map(|id| id.to_string()),
                    message.role.to_string(),
                    message.content,
                    message.status.as_str(),
                    message.created_at,
                ],
            )
            .map_err(StoreError::new)?;
        Ok(())
    }

    fn update_message(&mut self, id: Uuid, patch: &MessagePatch) -> Result<(), StoreError> {
        let mut message = self.message(id)?.ok_or_else(|| missing("message", id))?;
        if let Some(content) = &patch.content {
            message.content.clone_from(content);
        }
        if let Some(status) = patch.status {
            message.status = status;
        }
        if let Some(created_at) = patch.created_at {
            message.created_at = created_at;
        }

        self.conn
            .execute(
                "UPDATE messages SET content = ?2, status = ?3, created_at = ?4 WHERE id = ?1",
                params![id.to_string(), message.content, message.status.as_str(), message.created_at],
            )
            .map_err(StoreError::new)?;
        Ok(())
    }

    fn append_message_content(
        &mut self,
        id: Uuid,
        chunk: &str,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE messages SET content = content || ?2, status = COALESCE(?3, status) WHERE id = ?1",
                params![id.to_string(), chunk, status.map(MessageStatus::as_str)],
            )
            .map_err(StoreError::new)?;
        if changed == 0 {
            return Err(missing("message", id));
        }
        Ok(())
    }

    fn delete_message(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()]).map_err(StoreError::new)?;
        Ok(())
    }

    fn chat_tree(&self, id: Uuid) -> Result<Option<ChatTree>, StoreError> {
        self.conn
            .query_row("SELECT id, owner_id, data FROM chat_trees WHERE id = ?1", [id.to_string()], tree_from_row)
            .optional()
            .map_err(StoreError::new)
    }

    fn chat_trees_for_owner(&self, owner_id: Uuid) -> Result<Vec<ChatTree>, StoreError> {
        trees_for_owner(self.conn, owner_id).map_err(StoreError::new)
    }

    fn upsert_chat_tree(&mut self, tree: &ChatTree) -> Result<(), StoreError> {
        let data = serde_json::to_string(&tree.data).map_err(StoreError::new)?;
        self.conn
            .execute(
                "
                INSERT INTO chat_trees (id, owner_id, data) VALUES (?1, ?2, ?3)
                ON CONFLICT (id) DO UPDATE SET owner_id = excluded.owner_id, data = excluded.data
                ",
                params![tree.id.to_string(), tree.owner_id.to_string(), data],
            )
            .map_err(StoreError::new)?;
        Ok(())
    }
}

// ── Replica reads ──────────────────────────────────────────────────

fn trees_for_owner(conn: &Connection, owner_id: Uuid) -> rusqlite::Result<Vec<ChatTree>> {
    let mut stmt = conn.prepare_cached("SELECT id, owner_id, data FROM chat_trees WHERE owner_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map([owner_id.to_string()], tree_from_row)?;
    rows.collect()
}

/// Chats the user owns plus chats others have made public.
pub fn visible_chats(conn: &Connection, user_id: Uuid) -> rusqlite::Result<Vec<Chat>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {CHAT_COLUMNS} FROM chats WHERE owner_id = ?1 OR is_public = 1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map([user_id.to_string()], chat_from_row)?;
    rows.collect()
}

/// Messages of every chat in [`visible_chats`].
pub fn visible_messages(conn: &Connection, user_id: Uuid) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare_cached(
        "
        SELECT m.id, m.chat_id, m.author_id, m.role, m.content, m.status, m.created_at
        FROM messages m
        JOIN chats c ON c.id = m.chat_id
        WHERE c.owner_id = ?1 OR c.is_public = 1
        ORDER BY m.chat_id, m.created_at, m.rowid
        ",
    )?;
    let rows = stmt.query_map([user_id.to_string()], message_from_row)?;
    rows.collect()
}

pub fn owned_trees(conn: &Connection, user_id: Uuid) -> rusqlite::Result<Vec<ChatTree>> {
    trees_for_owner(conn, user_id)
}

#[cfg(test)]
mod tests {
    use liqua_common::mutators::{
        execute, ForkArgs, InitArgs, Mutation, MutationContext, PushAssistantMessageChunkArgs, RenameChatArgs,
        SendUserMessageArgs, UpdateMessageArgs,
    };
    use liqua_common::store::MemoryStore;
    use liqua_common::stream::ChunkType;
    use liqua_common::types::User;

    use super::*;
    use crate::db::{users::insert_user, Database};

    fn user() -> User {
        User { id: Uuid::from_u128(7), name: "Guest".into(), created_at: 0 }
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().expect("db");
        db.with_conn(|conn| insert_user(conn, &user())).expect("connection").expect("user");
        db
    }

    fn chunk(chat_id: Uuid, message_id: Uuid, text: &str, chunk_type: ChunkType, at: i64) -> Mutation {
        Mutation::PushAssistantMessageChunk(PushAssistantMessageChunkArgs {
            message_id,
            chat_id,
            chunk: text.into(),
            chunk_type,
            model: "llama3.2".into(),
            timestamp: at,
        })
    }

    fn script(chat: Uuid, forked: Uuid, first: Uuid, reply: Uuid) -> Vec<Mutation> {
        vec![
            Mutation::Init(InitArgs { id: chat, timestamp: 1_000, chat_tree_id: None }),
            Mutation::SendUserMessage(SendUserMessageArgs {
                id: first,
                chat_id: chat,
                content: "hi".into(),
                timestamp: 1_100,
            }),
            chunk(chat, reply, "Hel", ChunkType::First, 1_200),
            chunk(chat, reply, "lo ", ChunkType::Middle, 1_201),
            chunk(chat, reply, "wor", ChunkType::Middle, 1_202),
            chunk(chat, reply, "ld", ChunkType::Last, 1_203),
            Mutation::Rename(RenameChatArgs { chat_id: chat, title: "Greetings".into() }),
            Mutation::Fork(ForkArgs { chat_id: chat, forked_chat_id: forked, message_id: first }),
            Mutation::UpdateMessage(UpdateMessageArgs { id: first, content: "hello".into(), timestamp: 1_100 }),
        ]
    }

    #[test]
    fn sqlite_and_memory_backends_agree() {
        let (chat, forked, first, reply) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let ctx = MutationContext::server(user().id, 10_000).at(1_000);
        let db = seeded();
        let mut memory = MemoryStore::new();

        for mutation in script(chat, forked, first, reply) {
            memory.transact(|tx| execute(tx, &ctx, &mutation)).expect("memory run");
            db.with_conn(|conn| {
                let tx = conn.transaction().expect("begin");
                execute(&mut SqliteTransaction::new(&tx), &ctx, &mutation).expect("sqlite run");
                tx.commit().expect("commit");
            })
            .expect("connection");
        }

        db.with_conn(|conn| {
            let tx = SqliteTransaction::new(conn);
            for id in [chat, forked] {
                assert_eq!(tx.chat(id).expect("chat").as_ref(), memory.get_chat(id));
            }
            assert_eq!(
                tx.messages(chat).expect("messages"),
                memory.chat_messages(chat).into_iter().cloned().collect::<Vec<_>>()
            );

            let forked_contents: Vec<String> =
                tx.messages(forked).expect("messages").into_iter().map(|m| m.content).collect();
            assert_eq!(forked_contents, vec!["hi".to_owned()]);

            let trees = tx.chat_trees_for_owner(user().id).expect("trees");
            assert_eq!(trees.len(), 1);
            assert_eq!(memory.trees().count(), 1);
        })
        .expect("connection");
    }

    #[test]
    fn failed_writes_roll_back_with_their_transaction() {
        let db = seeded();
        let chat = Uuid::new_v4();
        let ctx = MutationContext::server(user().id, 10_000).at(1_000);

        db.with_conn(|conn| {
            let tx = conn.transaction().expect("begin");
            execute(
                &mut SqliteTransaction::new(&tx),
                &ctx,
                &Mutation::Init(InitArgs { id: chat, timestamp: 1_000, chat_tree_id: None }),
            )
            .expect("init");
            drop(tx);

            assert_eq!(SqliteTransaction::new(conn).chat(chat).expect("read"), None);
        })
        .expect("connection");
    }

    #[test]
    fn append_concatenates_in_place_and_reports_missing_rows() {
        let db = seeded();
        let ctx = MutationContext::server(user().id, 10_000).at(1_000);
        let (chat, reply) = (Uuid::new_v4(), Uuid::new_v4());

        db.with_conn(|conn| {
            let mut tx = SqliteTransaction::new(conn);
            execute(&mut tx, &ctx, &Mutation::Init(InitArgs { id: chat, timestamp: 1_000, chat_tree_id: None }))
                .expect("init");
            execute(&mut tx, &ctx, &chunk(chat, reply, "a", ChunkType::First, 1_000)).expect("first");

            tx.append_message_content(reply, "b", None).expect("append");
            tx.append_message_content(reply, "c", Some(MessageStatus::Complete)).expect("append");
            let message = tx.message(reply).expect("read").expect("exists");
            assert_eq!(message.content, "abc");
            assert_eq!(message.status, MessageStatus::Complete);

            assert!(tx.append_message_content(Uuid::new_v4(), "x", None).is_err());
        })
        .expect("connection");
    }

    #[test]
    fn deleting_a_chat_cascades_to_its_messages() {
        let db = seeded();
        let ctx = MutationContext::server(user().id, 10_000).at(1_000);
        let (chat, message) = (Uuid::new_v4(), Uuid::new_v4());

        db.with_conn(|conn| {
            let mut tx = SqliteTransaction::new(conn);
            execute(&mut tx, &ctx, &Mutation::Init(InitArgs { id: chat, timestamp: 1_000, chat_tree_id: None }))
                .expect("init");
            execute(
                &mut tx,
                &ctx,
                &Mutation::SendUserMessage(SendUserMessageArgs {
                    id: message,
                    chat_id: chat,
                    content: "bye".into(),
                    timestamp: 1_000,
                }),
            )
            .expect("send");

            tx.delete_chat(chat).expect("delete");
            assert_eq!(tx.message(message).expect("read"), None);
            assert!(visible_messages(conn, user().id).expect("visible").is_empty());
        })
        .expect("connection");
    }

    #[test]
    fn public_chats_of_other_users_are_visible() {
        let db = seeded();
        let other = User { id: Uuid::from_u128(8), name: "Other".into(), created_at: 0 };
        let (mine, theirs, hidden) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        db.with_conn(|conn| {
            insert_user(conn, &other).expect("other user");
            let mut tx = SqliteTransaction::new(conn);
            for (owner, id, is_public) in [(user().id, mine, false), (other.id, theirs, true), (other.id, hidden, false)]
            {
                tx.insert_chat(&Chat {
                    id,
                    title: "t".into(),
                    is_public,
                    owner_id: owner,
                    created_at: 0,
                    updated_at: 0,
                    custom_instructions: None,
                })
                .expect("insert chat");
            }

            let mut visible: Vec<Uuid> =
                visible_chats(conn, user().id).expect("visible").into_iter().map(|chat| chat.id).collect();
            visible.sort();
            let mut expected = vec![mine, theirs];
            expected.sort();
            assert_eq!(visible, expected);
        })
        .expect("connection");
    }
}
