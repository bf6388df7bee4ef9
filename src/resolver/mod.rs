//! Identity resolution over a [`ContactStore`].
//!
//! One call to [`IdentityResolver::resolve`] is one store transaction:
//! match, root resolution, cluster expansion, merge, gap-fill and assembly
//! all see the same state and commit together.

mod assemble;
pub mod phases;

pub use assemble::assemble;
pub use phases::{elect_survivor, BrokenLink, Walk};

use std::sync::Arc;

use uuid::Uuid;

use crate::contact::NewContact;
use crate::error::{ExecutionError, IdentityError, IdentityResult};
use crate::fragment::{Fragment, IdentifyRequest};
use crate::identity::{Resolution, ResolutionOutcome};
use crate::storage::ContactStore;

/// Tunables for [`IdentityResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Longest `linked_id` chain followed before a walk is abandoned.
    pub max_link_hops: usize,
    /// Attempts per resolution when the store reports a conflict.
    pub max_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_link_hops: 128,
            max_attempts: 3,
        }
    }
}

impl ResolverConfig {
    pub fn validate(self) -> IdentityResult<Self> {
        if self.max_link_hops == 0 {
            return Err(IdentityError::internal("max_link_hops must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(IdentityError::internal("max_attempts must be at least 1"));
        }
        Ok(self)
    }
}

/// Resolves identity fragments into consolidated identities.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    config: ResolverConfig,
}

impl IdentityResolver {
    /// Create a resolver with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            config: ResolverConfig::default(),
        }
    }

    /// Create a resolver with a validated configuration.
    pub fn with_config(store: Arc<dyn ContactStore>, config: ResolverConfig) -> IdentityResult<Self> {
        Ok(Self {
            store,
            config: config.validate()?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Validate a wire request and resolve it.
    ///
    /// # Errors
    /// - `Validation` when no identifier is supplied; the store is not touched
    /// - `Execution` for store failures or unresolvable linkage
    pub fn resolve(&self, request: IdentifyRequest) -> IdentityResult<Resolution> {
        let fragment = request.into_fragment()?;
        self.resolve_fragment(&fragment)
    }

    /// Resolve an already-validated fragment, retrying on store conflicts.
    pub fn resolve_fragment(&self, fragment: &Fragment) -> IdentityResult<Resolution> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("identify", %request_id);
        let _enter = span.enter();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.resolve_once(fragment) {
                Err(e) if e.is_retryable() => {
                    if attempt >= self.config.max_attempts {
                        tracing::warn!(attempts = attempt, error = %e, "giving up after conflicts");
                        return Err(ExecutionError::RetriesExhausted { attempts: attempt }.into());
                    }
                    tracing::debug!(attempt, error = %e, "retrying after conflict");
                }
                result => return result,
            }
        }
    }

    fn resolve_once(&self, fragment: &Fragment) -> IdentityResult<Resolution> {
        let mut tx = self.store.begin()?;

        let matched = phases::match_fragment(&*tx, fragment)?;
        if matched.is_empty() {
            let contact = tx.insert(NewContact::primary(
                fragment.email().map(str::to_string),
                fragment.phone().map(str::to_string),
            ))?;
            let identity = assemble(contact.id, std::slice::from_ref(&contact))?;
            tx.commit()?;
            tracing::info!(primary = %contact.id, "created primary contact");
            return Ok(Resolution {
                identity,
                outcome: ResolutionOutcome::Created,
            });
        }

        let rooted = phases::resolve_roots(&*tx, &matched, self.config.max_link_hops)?;
        let expanded = phases::expand_cluster(&*tx, &rooted)?;
        let merged = phases::merge_roots(&mut *tx, expanded)?;
        let filled = phases::fill_gaps(&mut *tx, merged, fragment)?;
        let identity = assemble(filled.primary.id, &filled.cluster)?;
        tx.commit()?;

        Ok(Resolution {
            identity,
            outcome: ResolutionOutcome::Existing,
        })
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactId;
    use crate::storage::InMemoryContactStore;
    use crate::IdentifyBuilder;

    fn resolver() -> (Arc<InMemoryContactStore>, IdentityResolver) {
        let store = Arc::new(InMemoryContactStore::new());
        let resolver = IdentityResolver::new(store.clone());
        (store, resolver)
    }

    #[test]
    fn zero_limits_are_rejected() {
        let store: Arc<dyn ContactStore> = Arc::new(InMemoryContactStore::new());
        let cfg = ResolverConfig {
            max_link_hops: 0,
            ..ResolverConfig::default()
        };
        assert!(IdentityResolver::with_config(store.clone(), cfg).is_err());

        let cfg = ResolverConfig {
            max_attempts: 0,
            ..ResolverConfig::default()
        };
        assert!(IdentityResolver::with_config(store, cfg).is_err());
    }

    #[test]
    fn first_sighting_creates_a_primary() {
        let (store, resolver) = resolver();
        let res = resolver
            .resolve(IdentifyBuilder::new().email("doc@hillvalley.edu").phone(123456u64).request())
            .unwrap();

        assert!(res.is_created());
        assert_eq!(res.identity.primary_id, ContactId::new(1));
        assert_eq!(res.identity.emails, vec!["doc@hillvalley.edu"]);
        assert_eq!(res.identity.phone_numbers, vec!["123456"]);
        assert!(res.identity.secondary_ids.is_empty());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn empty_request_never_touches_the_store() {
        let (store, resolver) = resolver();
        let err = resolver.resolve(IdentifyRequest::default()).unwrap_err();
        assert!(err.is_validation());

        let err = resolver
            .resolve(IdentifyBuilder::new().email("").phone("").request())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn repeat_request_is_stable() {
        let (store, resolver) = resolver();
        let req = IdentifyBuilder::new().email("marty@hillvalley.edu").phone("1985").request();
        let first = resolver.resolve(req.clone()).unwrap();
        let second = resolver.resolve(req).unwrap();

        assert!(!second.is_created());
        assert_eq!(first.identity, second.identity);
        assert_eq!(store.len().unwrap(), 1);
    }
}
