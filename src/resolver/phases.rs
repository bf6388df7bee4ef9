//! Resolution phases.
//!
//! Each phase takes the previous phase's snapshot and the open transaction
//! and returns the next snapshot:
//!
//! ```text
//! Matched -> Rooted -> Expanded -> Merged -> Filled
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use crate::contact::{Contact, ContactId, ContactPatch, NewContact};
use crate::error::{ExecutionError, IdentityError, IdentityResult};
use crate::fragment::Fragment;
use crate::storage::{ContactTransaction, StorageError};

/// Contacts sharing an identifier with the fragment.
#[derive(Debug, Clone)]
pub struct Matched {
    pub contacts: Vec<Contact>,
}

impl Matched {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Distinct primaries reached from the matched contacts, ascending.
#[derive(Debug, Clone)]
pub struct Rooted {
    pub roots: Vec<ContactId>,
}

/// Root records and everything linked to them.
#[derive(Debug, Clone)]
pub struct Expanded {
    pub roots: Vec<Contact>,
    pub cluster: Vec<Contact>,
}

/// A single surviving primary and its cluster.
#[derive(Debug, Clone)]
pub struct Merged {
    pub primary: Contact,
    pub cluster: Vec<Contact>,
    /// Former primaries demoted under `primary`, in election order.
    pub demoted: Vec<ContactId>,
}

/// Cluster after the fragment's new values have been recorded.
#[derive(Debug, Clone)]
pub struct Filled {
    pub primary: Contact,
    pub cluster: Vec<Contact>,
    pub inserted: Option<ContactId>,
}

/// Why a link walk was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenLink {
    /// `at` links to an id that does not exist.
    Dangling { at: ContactId, missing: ContactId },
    /// `at` is a secondary without a link.
    Unlinked { at: ContactId },
    /// The walk came back to `at`.
    Cycle { at: ContactId },
    /// No primary within the hop limit.
    TooDeep { hops: usize },
}

/// Result of following `linked_id` from one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Walk {
    Root(ContactId),
    Broken(BrokenLink),
}

/// Fetch every contact matching the fragment's email OR phone.
pub fn match_fragment(
    tx: &dyn ContactTransaction,
    fragment: &Fragment,
) -> Result<Matched, StorageError> {
    let contacts = tx.find_matching(fragment.email(), fragment.phone())?;
    tracing::debug!(matched = contacts.len(), "matched fragment");
    Ok(Matched { contacts })
}

/// Follow links from `start` until a primary is reached.
pub fn walk_to_root(
    tx: &dyn ContactTransaction,
    start: &Contact,
    max_hops: usize,
) -> Result<Walk, StorageError> {
    let mut visited = HashSet::from([start.id]);
    let mut current = start.clone();
    let mut hops = 0usize;

    loop {
        if current.is_primary() {
            return Ok(Walk::Root(current.id));
        }
        let Some(next) = current.linked_id else {
            return Ok(Walk::Broken(BrokenLink::Unlinked { at: current.id }));
        };
        if hops >= max_hops {
            return Ok(Walk::Broken(BrokenLink::TooDeep { hops }));
        }
        hops += 1;
        if !visited.insert(next) {
            return Ok(Walk::Broken(BrokenLink::Cycle { at: next }));
        }
        match tx.find_by_id(next)? {
            Some(contact) => current = contact,
            None => {
                return Ok(Walk::Broken(BrokenLink::Dangling {
                    at: current.id,
                    missing: next,
                }))
            }
        }
    }
}

/// Collect the distinct primaries behind the matched contacts.
///
/// Broken walks are skipped. If none of the matched contacts reaches a
/// primary the linkage is unresolvable.
pub fn resolve_roots(
    tx: &dyn ContactTransaction,
    matched: &Matched,
    max_hops: usize,
) -> IdentityResult<Rooted> {
    let mut roots = BTreeSet::new();
    for contact in &matched.contacts {
        match walk_to_root(tx, contact, max_hops)? {
            Walk::Root(id) => {
                roots.insert(id);
            }
            Walk::Broken(broken) => {
                tracing::warn!(contact = %contact.id, ?broken, "discarding broken link walk");
            }
        }
    }

    if roots.is_empty() {
        return Err(ExecutionError::UnresolvableLinkage {
            contact_ids: matched.contacts.iter().map(|c| c.id).collect(),
        }
        .into());
    }

    let roots: Vec<ContactId> = roots.into_iter().collect();
    tracing::debug!(?roots, "resolved roots");
    Ok(Rooted { roots })
}

fn take_root(cluster: &[Contact], id: ContactId) -> IdentityResult<Contact> {
    cluster
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .ok_or_else(|| ExecutionError::MissingRoot { id }.into())
}

/// Fetch the roots and every contact linked to them.
pub fn expand_cluster(tx: &dyn ContactTransaction, rooted: &Rooted) -> IdentityResult<Expanded> {
    let cluster = tx.find_cluster(&rooted.roots)?;
    let roots = rooted
        .roots
        .iter()
        .map(|id| take_root(&cluster, *id))
        .collect::<IdentityResult<Vec<_>>>()?;
    tracing::debug!(roots = roots.len(), cluster = cluster.len(), "expanded cluster");
    Ok(Expanded { roots, cluster })
}

/// Creation order, ties broken by id.
fn creation_order(a: &Contact, b: &Contact) -> Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
}

/// The primary that survives a merge: earliest `created_at`, then lowest id.
#[must_use]
pub fn elect_survivor(roots: &[Contact]) -> Option<&Contact> {
    roots.iter().min_by(|a, b| creation_order(a, b))
}

/// Collapse several roots into the oldest one.
///
/// Each losing primary is demoted under the survivor and its secondaries
/// are re-pointed at the survivor.
pub fn merge_roots(tx: &mut dyn ContactTransaction, expanded: Expanded) -> IdentityResult<Merged> {
    let Expanded { mut roots, cluster } = expanded;

    if roots.len() == 1 {
        if let Some(primary) = roots.pop() {
            return Ok(Merged {
                primary,
                cluster,
                demoted: Vec::new(),
            });
        }
    }

    let survivor = elect_survivor(&roots)
        .cloned()
        .ok_or_else(|| IdentityError::internal("merge called without roots"))?;
    roots.sort_by(creation_order);

    let patch = ContactPatch::demote_to(survivor.id);
    let mut demoted = Vec::with_capacity(roots.len().saturating_sub(1));
    let mut repointed = 0usize;
    for loser in roots.iter().filter(|r| r.id != survivor.id) {
        tx.update_by_id(loser.id, &patch)?;
        repointed += tx.update_where_linked_id(loser.id, survivor.id)?;
        demoted.push(loser.id);
    }

    let cluster = tx.find_cluster(&[survivor.id])?;
    let primary = take_root(&cluster, survivor.id)?;
    tracing::info!(survivor = %primary.id, ?demoted, repointed, "merged primaries");

    Ok(Merged {
        primary,
        cluster,
        demoted,
    })
}

/// Record the fragment's values the cluster does not hold yet.
///
/// At most one secondary is inserted, carrying every supplied identifier.
pub fn fill_gaps(
    tx: &mut dyn ContactTransaction,
    merged: Merged,
    fragment: &Fragment,
) -> IdentityResult<Filled> {
    let Merged { primary, cluster, .. } = merged;

    let email_missing = fragment
        .email()
        .is_some_and(|e| !cluster.iter().any(|c| c.email.as_deref() == Some(e)));
    let phone_missing = fragment
        .phone()
        .is_some_and(|p| !cluster.iter().any(|c| c.phone_number.as_deref() == Some(p)));

    if !email_missing && !phone_missing {
        return Ok(Filled {
            primary,
            cluster,
            inserted: None,
        });
    }

    let secondary = tx.insert(NewContact::secondary(
        fragment.email().map(str::to_string),
        fragment.phone().map(str::to_string),
        primary.id,
    ))?;
    tracing::info!(primary = %primary.id, secondary = %secondary.id, "recorded new identifiers");

    let cluster = tx.find_cluster(&[primary.id])?;
    Ok(Filled {
        primary,
        cluster,
        inserted: Some(secondary.id),
    })
}
