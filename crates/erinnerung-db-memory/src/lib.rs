//! In-memory resource store for Erinnerung.
//!
//! Objects live in a papaya lock-free map so reads never block; writes are
//! serialized so that version checks and the owner relation table stay
//! consistent with the object map.
//!
//! ```ignore
//! use erinnerung_db_memory::InMemoryStore;
//! use erinnerung_storage::ResourceStoreExt;
//!
//! let store = InMemoryStore::new();
//! let created = store.create_as(&endpoint).await?;
//! assert!(created.metadata.uid.is_some());
//! ```

pub mod storage;

pub use erinnerung_storage::{ResourceStore, StorageError, StoredObject};
pub use storage::{InMemoryStore, StoreKey};

/// Creates a shareable in-memory store.
pub fn create_store() -> erinnerung_storage::DynStore {
    std::sync::Arc::new(InMemoryStore::new())
}
