//! Single-transaction behavior: commit visibility, read-your-writes, deletes

use crate::common::*;

#[test]
fn committed_write_visible_to_later_transaction() {
    let env = TestEnv::new();

    let mut t1 = env.begin();
    t1.write(DS, "John", &Person::new("John", 30)).unwrap();
    t1.commit().unwrap();

    let mut t2 = env.begin();
    let john: Person = t2.read(DS, "John").unwrap();
    assert_eq!(john, Person::new("John", 30));
    t2.commit().unwrap();
}

#[test]
fn read_modify_read_sees_own_write() {
    let env = TestEnv::new();
    env.put("John", &Person::new("John", 30));

    let mut txn = env.begin();
    let mut john: Person = txn.read(DS, "John").unwrap();
    john.age = 31;
    txn.write(DS, "John", &john).unwrap();

    let again: Person = txn.read(DS, "John").unwrap();
    assert_eq!(again.age, 31);

    // backend still holds the committed value until commit
    let stored: Person = serde_json::from_str(&env.stored("John").value).unwrap();
    assert_eq!(stored.age, 30);

    txn.commit().unwrap();
    assert_eq!(env.get::<Person>("John").unwrap().age, 31);
}

#[test]
fn abort_discards_buffered_writes() {
    let env = TestEnv::new();
    env.put("k", "before");

    let mut txn = env.begin();
    txn.write(DS, "k", "after").unwrap();
    txn.write(DS, "new", "value").unwrap();
    txn.abort().unwrap();

    assert_eq!(env.get::<String>("k").unwrap(), "before");
    assert!(env.get::<String>("new").unwrap_err().is_not_found());
    assert!(!env.backend.contains_item("new"));
}

#[test]
fn delete_then_read_is_not_found() {
    let env = TestEnv::new();
    env.put("k", "v");

    let mut txn = env.begin();
    assert_eq!(txn.read::<String>(DS, "k").unwrap(), "v");
    txn.delete(DS, "k").unwrap();
    assert!(txn.read::<String>(DS, "k").unwrap_err().is_not_found());
    txn.commit().unwrap();

    assert!(env.get::<String>("k").unwrap_err().is_not_found());
    let stored = env.stored("k");
    assert!(stored.is_deleted && stored.is_committed());
}

#[test]
fn recreate_after_delete() {
    let env = TestEnv::new();
    env.put("k", "first");

    let mut del = env.begin();
    del.delete(DS, "k").unwrap();
    del.commit().unwrap();

    // the reader caches the tombstone, so the write replaces it in place
    let mut txn = env.begin();
    assert!(txn.read::<String>(DS, "k").unwrap_err().is_not_found());
    txn.write(DS, "k", "second").unwrap();
    txn.commit().unwrap();

    assert_eq!(env.get::<String>("k").unwrap(), "second");
}

#[test]
fn double_delete_in_one_transaction() {
    let env = TestEnv::new();
    env.put("k", "v");

    let mut txn = env.begin();
    txn.delete(DS, "k").unwrap();
    assert!(txn.delete(DS, "k").unwrap_err().is_not_found());
}

#[test]
fn status_record_removed_after_commit() {
    let env = TestEnv::new();
    let mut txn = env.begin();
    txn.write(DS, "k", "v").unwrap();
    let txn_id = txn.txn_id();
    txn.commit().unwrap();

    assert_eq!(txn.status(), TransactionStatus::Committed);
    assert_eq!(env.verdict(txn_id), None);
}

#[test]
fn messagepack_codec_end_to_end() {
    let env = TestEnv::with_protocol(ProtocolConfig::default().with_codec(Codec::MessagePack));
    env.put("John", &Person::new("John", 30));
    env.put("John", &Person::new("John", 31));

    assert_eq!(env.get::<Person>("John").unwrap().age, 31);
    let stored = env.stored("John");
    let prev = stored.prev_item(Codec::MessagePack).unwrap().unwrap();
    let old: Person = Codec::MessagePack.decode(&prev.value).unwrap();
    assert_eq!(old.age, 30);
}
