pub mod error;
pub mod filter;
pub mod local;
pub mod models;
pub mod queue;

mod file_store;
mod memory;
pub use file_store::FileStore;
pub use memory::MemoryStore;

#[cfg(all(target_arch = "wasm32", feature = "web"))]
mod idb;
#[cfg(all(target_arch = "wasm32", feature = "web"))]
pub use idb::IdbStore;

pub use error::{Result, StoreError, ValidationError};
pub use filter::ResidentFilter;
pub use local::{KvStore, LocalStore};
pub use models::{
    check_proposed_aid, Admin, AidRecord, AidType, Child, DamageLevel, Entity, EntityType, Export,
    FinancialSummary, Import, Namespace, RecordId, Resident, Role,
};
pub use queue::{CreateConfirmation, Enqueued, OpKind, PendingOperation, PendingQueue};
