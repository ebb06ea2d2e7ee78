//! Readers finishing or undoing the work of crashed transactions

use crate::common::*;
use std::sync::Barrier;
use std::thread;

#[test]
fn expired_lease_rolls_back_to_prev() {
    let env = TestEnv::new();
    env.put("John", &Person::new("John", 30));
    let owner = env.seed_prepared("John", &Person::new("John", 99), true);

    let john: Person = env.get("John").unwrap();
    assert_eq!(john.age, 30);

    let stored = env.stored("John");
    assert!(stored.is_committed());
    assert_ne!(stored.txn_id, owner);
    assert_eq!(env.verdict(owner), Some(TxnState::Aborted));
}

#[test]
fn committed_status_rolls_forward() {
    let env = TestEnv::new();
    env.put("John", &Person::new("John", 30));
    let owner = env.seed_prepared("John", &Person::new("John", 31), false);
    env.set_verdict(owner, TxnState::Committed);

    let john: Person = env.get("John").unwrap();
    assert_eq!(john.age, 31);

    let stored = env.stored("John");
    assert!(stored.is_committed());
    assert_eq!(stored.txn_id, owner);
    assert_eq!(stored.linked_len, 2);
}

#[test]
fn live_lease_without_status_is_dirty() {
    let env = TestEnv::new();
    env.put("k", "old");
    let owner = env.seed_prepared("k", "new", false);

    match env.get::<String>("k") {
        Err(Error::DirtyRead { key, txn_id }) => {
            assert_eq!(key, "k");
            assert_eq!(txn_id, owner.to_string());
        }
        other => panic!("expected dirty read, got {:?}", other),
    }
    // nothing was decided on the owner's behalf
    assert_eq!(env.verdict(owner), None);
    assert!(env.stored("k").is_prepared());
}

#[test]
fn aborted_status_rolls_back_even_with_live_lease() {
    let env = TestEnv::new();
    env.put("k", "old");
    let owner = env.seed_prepared("k", "new", false);
    env.set_verdict(owner, TxnState::Aborted);

    assert_eq!(env.get::<String>("k").unwrap(), "old");
}

#[test]
fn expired_creator_leaves_tombstone() {
    let env = TestEnv::new();
    env.seed_prepared("k", "never committed", true);

    assert!(env.get::<String>("k").unwrap_err().is_not_found());
    let stored = env.stored("k");
    assert!(stored.is_deleted);
    assert!(stored.is_committed());
}

#[test]
fn recovery_is_idempotent() {
    let env = TestEnv::new();
    env.put("k", "old");
    env.seed_prepared("k", "new", true);

    assert_eq!(env.get::<String>("k").unwrap(), "old");
    let after_first = env.stored("k");
    assert_eq!(env.get::<String>("k").unwrap(), "old");
    assert_eq!(env.stored("k"), after_first);
}

#[test]
fn racing_recoverers_agree() {
    const READERS: usize = 4;
    let env = Arc::new(TestEnv::new());
    env.put("k", "old");

    for _ in 0..50 {
        let owner = env.seed_prepared("k", "dead", true);
        let start = Arc::new(Barrier::new(READERS));
        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let env = Arc::clone(&env);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    env.get::<String>("k")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "old");
        }
        let stored = env.stored("k");
        assert!(stored.is_committed());
        assert_ne!(stored.txn_id, owner);
        assert_eq!(env.verdict(owner), Some(TxnState::Aborted));
    }
}

#[test]
fn timed_out_writer_cannot_commit() {
    let env = TestEnv::with_protocol(
        ProtocolConfig::default().with_lease_time(std::time::Duration::from_millis(20)),
    );
    env.put("k", "old");

    let mut writer = env.begin();
    writer.write(DS, "k", "new").unwrap();
    let writer_id = writer.txn_id();

    // a reader decides the writer is dead before the writer reaches its commit point
    env.set_verdict(writer_id, TxnState::Aborted);
    let err = writer.commit().unwrap_err();
    assert!(matches!(err, Error::AbortedByOther(id) if id == writer_id.to_string()));
    assert_eq!(env.get::<String>("k").unwrap(), "old");
}

#[test]
fn write_after_recovered_key_succeeds() {
    let env = TestEnv::new();
    env.put("k", "old");
    env.seed_prepared("k", "dead", true);

    // blind write probes the key, recovering it on the way
    let mut txn = env.begin();
    txn.write(DS, "k", "fresh").unwrap();
    txn.commit().unwrap();
    assert_eq!(env.get::<String>("k").unwrap(), "fresh");
}
