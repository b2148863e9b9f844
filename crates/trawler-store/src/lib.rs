//! Relational persistence: message rows, user/group records with change
//! history, and group invites.
//!
//! The hot ingress path never talks to this crate directly — it enqueues
//! tasks; the Insert/Entity/Mark workers apply them through [`Store`].

pub mod error;
pub mod memory;
pub mod mysql;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use mysql::MySqlStore;
pub use store::Store;
pub use types::{GroupInviteRecord, GroupRecord, MessageRow, NewMessage, UserRecord};
