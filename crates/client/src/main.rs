// liquad: terminal client. Keeps the local replica in sync and chats through
// stdin, one line per user message.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use liqua_client::config::{default_db_path, ClientConfig};
use liqua_client::generation::Responder;
use liqua_client::store::meta_db::MetaDb;
use liqua_client::store::sessions::SessionStore;
use liqua_client::sync::{SyncEngine, DEFAULT_SYNC_INTERVAL};
use liqua_client::transport::{HttpTransport, SyncTransport};
use liqua_common::mutators::{InitArgs, Mutation};
use liqua_common::protocol::push::GuestSession;
use liqua_common::types::now_millis;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = ClientConfig::load();
    let (client_id, minted) = config.ensure_client_id();
    if minted {
        if let Err(error) = config.save() {
            warn!(%error, "could not persist new client id");
        }
    }

    let db = match default_db_path() {
        Some(path) => MetaDb::open(&path)?,
        None => MetaDb::open_in_memory()?,
    };
    let transport = HttpTransport::new(&config.server_url).context("invalid server_url in config")?;
    let session = sign_in(&db, &transport, &config.server_url).await?;
    info!(user = %session.user.name, %client_id, server = %config.server_url, "signed in");

    let engine = Arc::new(SyncEngine::new(db, transport, client_id, &session)?);
    if let Err(error) = engine.pull().await {
        warn!(?error, "initial pull failed, continuing offline");
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let sync_task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(DEFAULT_SYNC_INTERVAL, shutdown_rx).await }
    });

    let mut tree = engine.watch_tree()?;
    tokio::spawn(async move {
        while tree.changed().await.is_ok() {
            let nodes = tree.borrow_and_update().as_ref().map_or(0, |tree| tree.data.len());
            debug!(top_level_nodes = nodes, "chat tree updated");
        }
    });

    let generator = liqua_llm::build_generator(&config.ai.generator_settings())
        .context("failed to configure text generation")?;
    let responder =
        Responder::new(engine.clone(), generator).with_default_instructions(config.ai.custom_instructions.clone());

    let chat_id = Uuid::new_v4();
    engine.mutate(Mutation::Init(InitArgs {
        id: chat_id,
        timestamp: now_millis(),
        chat_tree_id: engine.with_replica(|replica| replica.tree_cell().tree_id())?,
    }))?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let reply = responder.send_and_respond(chat_id, line, &config.ai.model).await?;
                let text = engine.with_replica(|replica| {
                    replica.view().get_message(reply.message_id).map(|message| message.content.clone())
                })?;
                println!("{}", text.unwrap_or_default());
            }
        }
    }

    if shutdown_tx.send(()).is_err() {
        debug!("sync loop already stopped");
    }
    if let Err(error) = sync_task.await {
        warn!(?error, "sync loop task failed");
    }
    if let Err(error) = engine.flush().await {
        warn!(?error, "final push failed; mutations stay queued");
    }
    Ok(())
}

/// Reuse the cached session for this server, or sign in as a new guest.
async fn sign_in(db: &MetaDb, transport: &HttpTransport, server_url: &str) -> Result<GuestSession> {
    let sessions = SessionStore::new(db.connection());
    if let Some(session) = sessions.load(server_url)? {
        return Ok(session);
    }
    let session = transport.sign_in_guest().await.context("guest sign-in failed")?;
    sessions.save(server_url, &session, Utc::now())?;
    Ok(session)
}
