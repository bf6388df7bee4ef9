//! # idresolve - identity resolution for contact fragments
//!
//! Customers reach a business through many channels and leave a different
//! email or phone number each time. idresolve links every fragment it sees
//! into one identity: a single oldest **primary** contact with any number of
//! **secondary** contacts pointing at it.
//!
//! ## Core Concepts
//!
//! - **Contact**: one stored record carrying an email and/or phone number
//! - **Fragment**: a validated identify request
//! - **Cluster**: a primary plus every contact linked to it
//! - **ResolvedIdentity**: the consolidated view returned to callers
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use idresolve::{IdentifyBuilder, IdentityResolver, InMemoryContactStore};
//!
//! let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
//!
//! let first = resolver
//!     .resolve(IdentifyBuilder::new().email("doc@hillvalley.edu").phone("1955").request())
//!     .unwrap();
//! assert!(first.is_created());
//!
//! let linked = resolver
//!     .resolve(IdentifyBuilder::new().email("emmett@hillvalley.edu").phone("1955").request())
//!     .unwrap();
//! assert_eq!(linked.identity.primary_id, first.identity.primary_id);
//! assert_eq!(linked.identity.emails, vec!["doc@hillvalley.edu", "emmett@hillvalley.edu"]);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod contact;
pub mod error;
pub mod fragment;
pub mod identity;

// Resolution and storage
pub mod envelope;
pub mod resolver;
pub mod storage;

#[cfg(feature = "transport-grpc")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use contact::{Contact, ContactId, ContactPatch, LinkPrecedence, NewContact};
pub use envelope::{reply, Reply, ReplyStatus};
pub use error::{ExecutionError, IdentityError, IdentityResult, ValidationError};
pub use fragment::{Fragment, IdentifyBuilder, IdentifyRequest, PhoneInput};
pub use identity::{Resolution, ResolutionOutcome, ResolvedIdentity};
pub use resolver::{IdentityResolver, ResolverConfig};
pub use storage::{ContactStore, ContactTransaction, InMemoryContactStore, StorageError};
