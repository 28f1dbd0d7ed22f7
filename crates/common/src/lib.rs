// liqua-common: domain types, chat tree and the mutation runtime shared by
// the Liqua client and server.

pub mod chat_tree;
pub mod error;
pub mod mutators;
pub mod protocol;
pub mod store;
pub mod stream;
pub mod tree;
pub mod types;
