//! # Entities
//!
//! Server-side authoritative scene graph and its client-side mirror.
//!
//! ```text
//!   server logic ──> EntityRegistry ──(operations)──> TransactionBatcher
//!                       │  AsyncProperty / AsyncListProperty
//!                       ▼
//!                  per-user descriptors (/load)
//!
//!   Transaction ──> EntityMirror ──(dirty ids)──> renderer
//! ```

mod id;
mod list;
mod mirror;
mod property;
mod registry;

pub use id::{EntityId, IdAllocator};
pub use list::AsyncListProperty;
pub use mirror::{ApplyOutcome, EntityMirror, MirroredEntity, MirroredList, TransactionReport};
pub use property::{approx_equal, AsyncProperty, Equality};
pub use registry::{Entity, EntityDraft, EntityRegistry, MutationOutcome};
