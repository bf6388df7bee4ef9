//! Response assembly from a resolved cluster.

use crate::contact::{Contact, ContactId};
use crate::error::{ExecutionError, IdentityResult};
use crate::identity::ResolvedIdentity;

fn push_unique(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
}

/// Build the consolidated identity of `primary_id` from its cluster.
///
/// Emails and phone numbers are deduplicated with the primary's own value
/// first and the rest in cluster order. Secondary ids are ascending.
pub fn assemble(primary_id: ContactId, cluster: &[Contact]) -> IdentityResult<ResolvedIdentity> {
    let primary = cluster
        .iter()
        .find(|c| c.id == primary_id)
        .ok_or(ExecutionError::MissingRoot { id: primary_id })?;

    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();
    push_unique(&mut emails, primary.email.as_deref());
    push_unique(&mut phone_numbers, primary.phone_number.as_deref());
    for contact in cluster {
        push_unique(&mut emails, contact.email.as_deref());
        push_unique(&mut phone_numbers, contact.phone_number.as_deref());
    }

    let mut secondary_ids: Vec<ContactId> = cluster
        .iter()
        .filter(|c| c.is_secondary())
        .map(|c| c.id)
        .collect();
    secondary_ids.sort_unstable();

    Ok(ResolvedIdentity {
        primary_id,
        emails,
        phone_numbers,
        secondary_ids,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::contact::NewContact;
    use crate::error::IdentityError;

    fn row(contact: NewContact, id: i64) -> Contact {
        contact.into_contact(ContactId::new(id), Utc::now())
    }

    #[test]
    fn primary_values_lead_and_duplicates_collapse() {
        let p = ContactId::new(4);
        let cluster = vec![
            row(NewContact::secondary(Some("b@x.com".into()), Some("2".into()), p), 2),
            row(NewContact::primary(Some("a@x.com".into()), Some("1".into())), 4),
            row(NewContact::secondary(Some("b@x.com".into()), Some("1".into()), p), 9),
            row(NewContact::secondary(None, Some("3".into()), p), 7),
        ];

        let identity = assemble(p, &cluster).unwrap();
        assert_eq!(identity.emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(identity.phone_numbers, vec!["1", "2", "3"]);
        assert_eq!(
            identity.secondary_ids,
            vec![ContactId::new(2), ContactId::new(7), ContactId::new(9)]
        );
    }

    #[test]
    fn primary_without_email_keeps_cluster_order() {
        let p = ContactId::new(1);
        let cluster = vec![
            row(NewContact::primary(None, Some("100".into())), 1),
            row(NewContact::secondary(Some("z@x.com".into()), None, p), 2),
            row(NewContact::secondary(Some("m@x.com".into()), None, p), 3),
        ];
        let identity = assemble(p, &cluster).unwrap();
        assert_eq!(identity.emails, vec!["z@x.com", "m@x.com"]);
        assert_eq!(identity.phone_numbers, vec!["100"]);
    }

    #[test]
    fn absent_primary_is_an_error() {
        let err = assemble(ContactId::new(1), &[]).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Execution(ExecutionError::MissingRoot { .. })
        ));
    }
}
