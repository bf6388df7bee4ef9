//! Consolidated identity views returned by the resolver.

use serde::{Deserialize, Serialize};

use crate::contact::ContactId;

/// Normalized view of one customer cluster.
///
/// `emails` and `phone_numbers` are deduplicated; the primary contact's own
/// value, when it has one, comes first. `secondary_ids` is ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    #[serde(rename = "primaryContactId")]
    pub primary_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    #[serde(rename = "secondaryContactIds")]
    pub secondary_ids: Vec<ContactId>,
}

/// Whether a resolution minted a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Nothing matched; a fresh primary was created.
    Created,
    /// The fragment matched (and possibly extended or merged) an existing identity.
    Existing,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub identity: ResolvedIdentity,
    pub outcome: ResolutionOutcome,
}

impl Resolution {
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.outcome == ResolutionOutcome::Created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_uses_boundary_field_names() {
        let identity = ResolvedIdentity {
            primary_id: ContactId::new(1),
            emails: vec!["lorraine@hillvalley.edu".into(), "mcfly@hillvalley.edu".into()],
            phone_numbers: vec!["123456".into()],
            secondary_ids: vec![ContactId::new(23)],
        };

        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["primaryContactId"], 1);
        assert_eq!(json["emails"][1], "mcfly@hillvalley.edu");
        assert_eq!(json["phoneNumbers"][0], "123456");
        assert_eq!(json["secondaryContactIds"][0], 23);
    }
}
