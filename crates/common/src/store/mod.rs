// Transaction backends that need no I/O.

pub mod memory;

pub use memory::MemoryStore;
