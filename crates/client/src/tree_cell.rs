// The user's current chat tree as an observable state cell.

use tokio::sync::watch;
use uuid::Uuid;

use liqua_common::chat_tree::ChatTreeSnapshot;
use liqua_common::types::ChatTree;

/// Holds one immutable tree document at a time. Replacing it wakes every
/// subscriber; replacing it with an equal document does not.
#[derive(Debug)]
pub struct ChatTreeCell {
    tx: watch::Sender<Option<ChatTree>>,
}

impl Default for ChatTreeCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTreeCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn get(&self) -> Option<ChatTree> {
        self.tx.borrow().clone()
    }

    pub fn tree_id(&self) -> Option<Uuid> {
        self.tx.borrow().as_ref().map(|tree| tree.id)
    }

    /// The nodes of the current tree, ready for structural queries.
    pub fn snapshot(&self) -> ChatTreeSnapshot {
        self.tx
            .borrow()
            .as_ref()
            .map(|tree| ChatTreeSnapshot::new(tree.data.clone()))
            .unwrap_or_else(|| ChatTreeSnapshot::new(Vec::new()))
    }

    /// Swap in `next`. Returns whether subscribers were notified.
    pub fn replace(&self, next: Option<ChatTree>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ChatTree>> {
        self.tx.subscribe()
    }
}
