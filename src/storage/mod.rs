pub mod adapter;
pub mod memory;
pub mod snapshot;

pub use adapter::{ReadOp, ReadReply, StoreAdapter, WriteOp};
pub use memory::{MemoryStore, StoreImage};
pub use snapshot::{snapshot_loop, SnapshotStore};
