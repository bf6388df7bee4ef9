//! Crash recovery tests for the persistent contact store.
//!
//! These tests verify that the storage layer correctly handles:
//! - Restart with merges and gap-fills in the log
//! - Partial writes (simulated crash mid-write)
//! - CRC corruption in the last record
//! - Snapshot compaction
//! - Exclusive directory ownership

#![cfg(feature = "persistent")]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use idresolve::storage::persistent::{open_database, PersistentConfig, PersistentContactStore};
use idresolve::{ContactId, ContactStore, IdentifyBuilder, IdentifyRequest, IdentityResolver};

fn req(email: &str, phone: &str) -> IdentifyRequest {
    IdentifyBuilder::new().email(email).phone(phone).request()
}

fn open(dir: &Path) -> Arc<PersistentContactStore> {
    Arc::new(open_database(dir, None).unwrap())
}

#[test]
fn merged_identity_survives_restart() {
    let dir = tempdir().unwrap();
    let before = {
        let store = open(dir.path());
        let resolver = IdentityResolver::new(store.clone());
        resolver.resolve(req("george@hillvalley.edu", "919191")).unwrap();
        resolver.resolve(req("biffsucks@hillvalley.edu", "717171")).unwrap();
        resolver.resolve(req("george@hillvalley.edu", "717171")).unwrap()
    };

    let store = open(dir.path());
    let resolver = IdentityResolver::new(store.clone());
    let after = resolver.resolve(req("biffsucks@hillvalley.edu", "919191")).unwrap();

    assert_eq!(after.identity, before.identity);
    assert_eq!(store.len().unwrap(), 2);
    let demoted = store.get(ContactId::new(2)).unwrap().unwrap();
    assert_eq!(demoted.linked_id, Some(ContactId::new(1)));
}

#[test]
fn replay_is_stable_across_restarts() {
    let dir = tempdir().unwrap();
    {
        let resolver = IdentityResolver::new(open(dir.path()));
        resolver.resolve(req("a@x.com", "1")).unwrap();
        resolver.resolve(req("a@x.com", "2")).unwrap();
    }

    let first = open(dir.path()).all().unwrap();
    let second = open(dir.path()).all().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[test]
fn torn_wal_tail_recovers_the_intact_prefix() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("contacts.wal");
    {
        let resolver = IdentityResolver::new(open(dir.path()));
        for i in 0..5 {
            resolver
                .resolve(req(&format!("user{i}@x.com"), &format!("{i}{i}{i}")))
                .unwrap();
        }
    }

    // simulate a crash mid-append
    {
        let file = fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
        let size = file.metadata().unwrap().len();
        file.set_len(size * 4 / 5).unwrap();
    }

    let store = open(dir.path());
    let count = store.len().unwrap();
    assert!((1..=4).contains(&count), "recovered count should be between 1 and 4, got {count}");

    // new writes continue after the recovered ids
    let resolver = IdentityResolver::new(store.clone());
    let next = resolver.resolve(req("late@x.com", "999")).unwrap();
    assert_eq!(next.identity.primary_id, ContactId::new(count as i64 + 1));
}

#[test]
fn corrupted_last_record_is_dropped() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("contacts.wal");
    {
        let resolver = IdentityResolver::new(open(dir.path()));
        for i in 0..5 {
            resolver.resolve(req(&format!("user{i}@x.com"), &i.to_string())).unwrap();
        }
    }

    // flip a payload byte of the final record, just ahead of its CRC
    let mut bytes = fs::read(&wal_path).unwrap();
    let at = bytes.len() - 6;
    bytes[at] ^= 0xFF;
    fs::write(&wal_path, bytes).unwrap();

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 4);
    assert!(store.get(ContactId::new(5)).unwrap().is_none());
}

#[test]
fn compaction_folds_the_wal_into_a_snapshot() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        let resolver = IdentityResolver::new(store.clone());
        for i in 0..20 {
            resolver.resolve(req(&format!("user{i}@x.com"), "555")).unwrap();
        }

        let report = store.compact().unwrap();
        assert_eq!(report.contacts, 20);
        assert!(report.wal_size_after < report.wal_size_before);
        assert!(dir.path().join("contacts.snap").exists());

        // changes after the snapshot live only in the WAL
        resolver.resolve(req("after@x.com", "777")).unwrap();
    }

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 21);
    let all = store.all().unwrap();
    assert_eq!(all.iter().filter(|c| c.is_primary()).count(), 2);
}

#[test]
fn small_wal_limit_compacts_automatically() {
    let dir = tempdir().unwrap();
    let config = PersistentConfig {
        max_wal_size: 4 * 1024,
        sync_on_write: false,
    };
    {
        let store = Arc::new(open_database(dir.path(), Some(config.clone())).unwrap());
        let resolver = IdentityResolver::new(store.clone());
        for i in 0..100 {
            resolver.resolve(req(&format!("user{i}@x.com"), &format!("{i}"))).unwrap();
        }
        assert!(store.wal_size().unwrap() <= config.max_wal_size);
    }

    let store = open_database(dir.path(), Some(config)).unwrap();
    assert_eq!(store.len().unwrap(), 100);
}

#[test]
fn second_open_is_refused_while_locked() {
    let dir = tempdir().unwrap();
    let held = open_database(dir.path(), None).unwrap();

    let err = open_database(dir.path(), None).unwrap_err();
    assert!(err.is_internal());
    assert!(err.to_string().contains("locked"), "unexpected error: {err}");

    drop(held);
    assert!(open_database(dir.path(), None).is_ok());
}
