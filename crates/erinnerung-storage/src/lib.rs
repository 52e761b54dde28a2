//! # erinnerung-storage
//!
//! Store abstraction for Erinnerung resources. Backends implement
//! [`ResourceStore`]; [`EventedStore`] wraps any backend and publishes a
//! [`erinnerung_core::events::ResourceEvent`] after each successful write.
//!
//! ```ignore
//! use erinnerung_storage::{ListParams, ResourceStoreExt};
//! use erinnerung_core::Payload;
//!
//! let payloads: Vec<Payload> = store
//!     .list_as(&ListParams::in_namespace("default").with_selector(selector))
//!     .await?;
//! ```

mod error;
pub mod evented;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use evented::EventedStore;
pub use traits::{ResourceStore, ResourceStoreExt};
pub use types::{Deletion, ListParams, StoredObject};

pub type StorageResult<T> = Result<T, StorageError>;

/// Shareable store handle.
pub type DynStore = std::sync::Arc<dyn ResourceStore>;
