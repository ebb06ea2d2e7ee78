//! Embedded version chains and their length bound

use crate::common::*;
use concord_concurrency::chain;

fn chain_values(env: &TestEnv, key: &str) -> Vec<String> {
    chain::versions(&env.stored(key), env.protocol.codec)
        .unwrap()
        .into_iter()
        .map(|item| env.protocol.codec.decode::<String>(&item.value).unwrap())
        .collect()
}

#[test]
fn chain_capped_at_two() {
    let env = TestEnv::new();
    for value in ["v1", "v2", "v3", "v4"] {
        env.put("k", value);
    }

    let head = env.stored("k");
    assert_eq!(head.linked_len, 2);
    assert_eq!(chain_values(&env, "k"), vec!["v4", "v3"]);

    let oldest = head.prev_item(env.protocol.codec).unwrap().unwrap();
    assert!(oldest.prev.is_empty());
    assert_eq!(oldest.linked_len, 1);
}

#[test]
fn chain_grows_until_bound() {
    let env = TestEnv::with_protocol(ProtocolConfig::default().with_max_record_length(4));
    for (i, value) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
        env.put("k", *value);
        assert_eq!(env.stored("k").linked_len, (i + 1).min(4));
    }
    assert_eq!(chain_values(&env, "k"), vec!["f", "e", "d", "c"]);
}

#[test]
fn chain_timestamps_increase_toward_head() {
    let env = TestEnv::with_protocol(ProtocolConfig::default().with_max_record_length(4));
    for value in ["a", "b", "c", "d"] {
        env.put("k", value);
    }
    let versions = chain::versions(&env.stored("k"), env.protocol.codec).unwrap();
    for pair in versions.windows(2) {
        assert!(pair[0].t_valid > pair[1].t_valid);
        assert!(pair[1].is_committed());
    }
}

#[test]
fn single_version_chain() {
    let env = TestEnv::with_protocol(ProtocolConfig::default().with_max_record_length(1));
    env.put("k", "a");
    env.put("k", "b");

    let head = env.stored("k");
    assert_eq!(head.linked_len, 1);
    assert!(head.prev.is_empty());
    assert_eq!(env.get::<String>("k").unwrap(), "b");
}

#[test]
fn tombstone_kept_in_chain() {
    let env = TestEnv::with_protocol(ProtocolConfig::default().with_max_record_length(3));
    env.put("k", "a");
    let mut del = env.begin();
    del.delete(DS, "k").unwrap();
    del.commit().unwrap();
    env.put("k", "b");

    let versions = chain::versions(&env.stored("k"), env.protocol.codec).unwrap();
    let deleted: Vec<bool> = versions.iter().map(|v| v.is_deleted).collect();
    assert_eq!(deleted, vec![false, true, false]);
}
