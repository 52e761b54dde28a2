//! Watch event plumbing.
//!
//! ```text
//!   store write ──▶ EventBroadcaster ──▶ HookDispatcher ──▶ HookRegistry
//!                   (tokio broadcast)                        ├─ hook (task)
//!                                                            └─ hook (task)
//! ```
//!
//! Each hook runs in its own task with a timeout and panic protection, so a
//! failing hook cannot stall the writer or the other hooks.

pub mod broadcaster;
pub mod hooks;
pub mod registry;
pub mod types;

pub use broadcaster::EventBroadcaster;
pub use hooks::{HookError, ResourceHook};
pub use registry::{HookDispatcher, HookRegistry};
pub use types::{ResourceEvent, ResourceEventType};
