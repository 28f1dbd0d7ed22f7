// liqua-client library entry point: local replica, outbox and sync engine.

pub mod config;
pub mod generation;
pub mod outbox;
pub mod replica;
pub mod store;
pub mod sync;
pub mod transport;
pub mod tree_cell;
