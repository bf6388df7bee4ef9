//! Contact storage for idresolve.
//!
//! [`ContactStore`] and [`ContactTransaction`] are the only surface the
//! resolver depends on. Two backends ship: [`InMemoryContactStore`] and,
//! with the `persistent` feature, [`persistent::PersistentContactStore`].

mod memory;
mod table;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryContactStore;
pub use table::{CommitSink, ContactChange, ContactTable, TableSnapshot, TableTransaction};
pub use traits::{ContactStore, ContactTransaction, StorageError};
