#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod query;
pub mod stats;
pub mod storage;

pub use config::{IndexConfig, ServiceConfig};
pub use core::Hit;
pub use error::{IndexError, Result, StoreError};
pub use index::DimIndex;
pub use query::{Bounds, QueryPlan};
pub use stats::QueryStats;
pub use storage::{MemoryStore, StoreAdapter};
