// Local replica: authoritative rows from the last pull, with every mutation
// the server has not processed yet replayed on top.
//
//   mutate ──▶ pending += m ──▶ view = view ⊕ m         (optimistic)
//   pull   ──▶ confirmed = snapshot
//              pending -= ids <= lastMutationId
//              view = confirmed ⊕ pending                (rebase)
//
// Optimistic results are provisional; a rebase throws them away.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::broadcast;
use uuid::Uuid;

use liqua_common::mutators::{execute, Mutation, MutationContext};
use liqua_common::protocol::push::ReplicaSnapshot;
use liqua_common::store::MemoryStore;
use liqua_common::types::{Chat, ChatTree, Message, Millis};

use crate::tree_cell::ChatTreeCell;

const EVENT_CAPACITY: usize = 256;

/// A mutation applied locally but not yet covered by a pulled snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    pub id: i64,
    pub mutation: Mutation,
    /// Local clock when it was first applied; replays reuse it.
    pub applied_at: Millis,
}

/// Change feed emitted whenever the visible state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaEvent {
    ChatUpserted { chat_id: Uuid },
    ChatRenamed { chat_id: Uuid, title: String },
    ChatRemoved { chat_id: Uuid },
    MessagesChanged { chat_id: Uuid },
    TreeChanged { tree_id: Uuid },
    Rebased { last_mutation_id: i64 },
}

pub struct LocalReplica {
    user_id: Uuid,
    confirmed: MemoryStore,
    view: MemoryStore,
    pending: Vec<PendingMutation>,
    last_mutation_id: i64,
    events: broadcast::Sender<ReplicaEvent>,
    tree: ChatTreeCell,
}

impl LocalReplica {
    pub fn new(user_id: Uuid) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            user_id,
            confirmed: MemoryStore::new(),
            view: MemoryStore::new(),
            pending: Vec::new(),
            last_mutation_id: 0,
            events,
            tree: ChatTreeCell::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn last_mutation_id(&self) -> i64 {
        self.last_mutation_id
    }

    pub fn pending_ids(&self) -> Vec<i64> {
        self.pending.iter().map(|pending| pending.id).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    pub fn tree_cell(&self) -> &ChatTreeCell {
        &self.tree
    }

    /// Rows as the user currently sees them.
    pub fn view(&self) -> &MemoryStore {
        &self.view
    }

    pub fn chat(&self, id: Uuid) -> Option<Chat> {
        self.view.get_chat(id).cloned()
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.view.chats().cloned().collect()
    }

    pub fn messages(&self, chat_id: Uuid) -> Vec<Message> {
        self.view.chat_messages(chat_id).into_iter().cloned().collect()
    }

    /// Apply a new mutation optimistically and remember it for replays.
    ///
    /// A failing optimistic run leaves the view untouched; the mutation is
    /// still kept because only the server's verdict counts.
    pub fn apply(&mut self, pending: PendingMutation) -> bool {
        let before = self.view.clone();
        let applied = run_optimistic(&mut self.view, self.user_id, &pending);
        self.pending.push(pending);
        self.publish(&before);
        applied
    }

    /// Replace the confirmed state with a pulled snapshot and replay what is
    /// still unprocessed on top of it.
    pub fn rebase(&mut self, snapshot: ReplicaSnapshot) {
        let before = std::mem::take(&mut self.view);
        self.last_mutation_id = snapshot.last_mutation_id;
        self.confirmed = MemoryStore::from_rows(snapshot.chats, snapshot.messages, snapshot.chat_trees);
        self.pending.retain(|pending| pending.id > snapshot.last_mutation_id);

        let mut view = self.confirmed.clone();
        for pending in &self.pending {
            run_optimistic(&mut view, self.user_id, pending);
        }
        self.view = view;

        tracing::debug!(
            last_mutation_id = self.last_mutation_id,
            pending = self.pending.len(),
            "replica rebased"
        );
        self.publish(&before);
        self.emit(ReplicaEvent::Rebased { last_mutation_id: self.last_mutation_id });
    }

    fn publish(&self, before: &MemoryStore) {
        for event in diff(before, &self.view) {
            self.emit(event);
        }
        self.tree.replace(self.current_tree());
    }

    fn emit(&self, event: ReplicaEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The tree shown to the user: the one already displayed if it still
    /// exists, otherwise the first one they own.
    fn current_tree(&self) -> Option<ChatTree> {
        let shown = self.tree.tree_id().and_then(|id| self.view.get_tree(id));
        shown
            .or_else(|| self.view.trees().find(|tree| tree.owner_id == self.user_id))
            .cloned()
    }
}

fn run_optimistic(view: &mut MemoryStore, user_id: Uuid, pending: &PendingMutation) -> bool {
    let ctx = MutationContext::client(user_id).at(pending.applied_at);
    match view.transact(|tx| execute(tx, &ctx, &pending.mutation)) {
        Ok(_) => true,
        Err(err) => {
            let (namespace, name) = pending.mutation.key();
            tracing::debug!(id = pending.id, namespace, name, error = %err, "optimistic mutation failed");
            false
        }
    }
}

fn diff(before: &MemoryStore, after: &MemoryStore) -> Vec<ReplicaEvent> {
    let mut events = Vec::new();

    for chat in after.chats() {
        match before.get_chat(chat.id) {
            Some(old) if old == chat => {}
            Some(old) if old.title != chat.title => {
                events.push(ReplicaEvent::ChatRenamed { chat_id: chat.id, title: chat.title.clone() });
            }
            _ => events.push(ReplicaEvent::ChatUpserted { chat_id: chat.id }),
        }
    }
    for chat in before.chats() {
        if after.get_chat(chat.id).is_none() {
            events.push(ReplicaEvent::ChatRemoved { chat_id: chat.id });
        }
    }

    let mut touched = BTreeSet::new();
    let old_messages: BTreeMap<Uuid, &Message> = before.all_messages().map(|m| (m.id, m)).collect();
    for message in after.all_messages() {
        if old_messages.get(&message.id) != Some(&message) {
            touched.insert(message.chat_id);
        }
    }
    for message in before.all_messages() {
        if after.get_message(message.id).is_none() {
            touched.insert(message.chat_id);
        }
    }
    events.extend(touched.into_iter().map(|chat_id| ReplicaEvent::MessagesChanged { chat_id }));

    for tree in after.trees() {
        if before.get_tree(tree.id) != Some(tree) {
            events.push(ReplicaEvent::TreeChanged { tree_id: tree.id });
        }
    }
    for tree in before.trees() {
        if after.get_tree(tree.id).is_none() {
            events.push(ReplicaEvent::TreeChanged { tree_id: tree.id });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use liqua_common::mutators::{InitArgs, RenameChatArgs, SendUserMessageArgs};
    use liqua_common::types::MessageStatus;

    use super::*;

    fn init(id: i64, chat_id: Uuid) -> PendingMutation {
        PendingMutation {
            id,
            mutation: Mutation::Init(InitArgs { id: chat_id, timestamp: 1_000, chat_tree_id: None }),
            applied_at: 1_000,
        }
    }

    fn say(id: i64, chat_id: Uuid, content: &str, at: Millis) -> PendingMutation {
        PendingMutation {
            id,
            mutation: Mutation::SendUserMessage(SendUserMessageArgs {
                id: Uuid::new_v4(),
                chat_id,
                content: content.into(),
                timestamp: at,
            }),
            applied_at: at,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ReplicaEvent>) -> Vec<ReplicaEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn optimistic_writes_are_visible_immediately() {
        let user = Uuid::new_v4();
        let chat_id = Uuid::new_v4();
        let mut replica = LocalReplica::new(user);

        assert!(replica.apply(init(1, chat_id)));
        assert!(replica.apply(say(2, chat_id, "hi", 2_000)));

        let messages = replica.messages(chat_id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Complete);
        assert_eq!(replica.pending_ids(), vec![1, 2]);
        assert!(replica.tree_cell().snapshot().references_chat(chat_id));
    }

    #[test]
    fn failed_optimistic_runs_are_still_queued() {
        let mut replica = LocalReplica::new(Uuid::new_v4());
        assert!(!replica.apply(say(1, Uuid::new_v4(), "orphan", 1_000)));
        assert_eq!(replica.pending_ids(), vec![1]);
        assert!(replica.chats().is_empty());
    }

    #[test]
    fn rebase_discards_optimistic_results_for_processed_ids() {
        let user = Uuid::new_v4();
        let chat_id = Uuid::new_v4();
        let mut replica = LocalReplica::new(user);
        replica.apply(init(1, chat_id));
        replica.apply(say(2, chat_id, "local only", 2_000));

        // The server processed both but, say, rejected the message.
        let mut authoritative = LocalReplica::new(user);
        authoritative.apply(init(1, chat_id));
        let snapshot = ReplicaSnapshot {
            last_mutation_id: 2,
            chats: authoritative.chats(),
            messages: Vec::new(),
            chat_trees: authoritative.view().trees().cloned().collect(),
        };

        replica.rebase(snapshot);
        assert!(replica.pending_ids().is_empty());
        assert!(replica.messages(chat_id).is_empty());
        assert_eq!(replica.last_mutation_id(), 2);
    }

    #[test]
    fn rebase_replays_unprocessed_mutations() {
        let user = Uuid::new_v4();
        let chat_id = Uuid::new_v4();
        let mut replica = LocalReplica::new(user);
        replica.apply(init(1, chat_id));
        replica.apply(say(2, chat_id, "still pending", 2_000));

        let mut authoritative = LocalReplica::new(user);
        authoritative.apply(init(1, chat_id));
        replica.rebase(ReplicaSnapshot {
            last_mutation_id: 1,
            chats: authoritative.chats(),
            messages: Vec::new(),
            chat_trees: authoritative.view().trees().cloned().collect(),
        });

        assert_eq!(replica.pending_ids(), vec![2]);
        let messages = replica.messages(chat_id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "still pending");
        assert_eq!(messages[0].created_at, 2_000);
    }

    #[test]
    fn renames_are_announced_on_the_change_feed() {
        let user = Uuid::new_v4();
        let chat_id = Uuid::new_v4();
        let mut replica = LocalReplica::new(user);
        replica.apply(init(1, chat_id));
        let node_ids: Vec<String> = replica.tree_cell().snapshot().nodes().iter().map(|n| n.id.clone()).collect();

        let mut rx = replica.subscribe();
        replica.apply(PendingMutation {
            id: 2,
            mutation: Mutation::Rename(RenameChatArgs { chat_id, title: "Trip plans".into() }),
            applied_at: 3_000,
        });

        let events = drain(&mut rx);
        assert_eq!(events, vec![ReplicaEvent::ChatRenamed { chat_id, title: "Trip plans".into() }]);
        let after: Vec<String> = replica.tree_cell().snapshot().nodes().iter().map(|n| n.id.clone()).collect();
        assert_eq!(after, node_ids);
    }

    #[test]
    fn first_chat_emits_chat_and_tree_events() {
        let chat_id = Uuid::new_v4();
        let mut replica = LocalReplica::new(Uuid::new_v4());
        let mut rx = replica.subscribe();
        replica.apply(init(1, chat_id));

        let events = drain(&mut rx);
        assert!(events.contains(&ReplicaEvent::ChatUpserted { chat_id }));
        assert!(events.iter().any(|event| matches!(event, ReplicaEvent::TreeChanged { .. })));
    }
}
