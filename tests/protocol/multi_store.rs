//! Transactions spanning several datastores

use crate::common::*;
use std::time::Duration;

struct Stores {
    users: Arc<MemoryConnector>,
    orders: Arc<MemoryConnector>,
    status: Arc<MemoryConnector>,
    factory: TransactionFactory,
}

fn stores() -> Stores {
    init_tracing();
    let users = Arc::new(MemoryConnector::new());
    let orders = Arc::new(MemoryConnector::new());
    let status = Arc::new(MemoryConnector::new());
    let factory = TransactionFactory::builder(FactoryConfig::default())
        .datastore("users", users.clone())
        .datastore("orders", orders.clone())
        .global_datastore("status", status.clone())
        .time_source(Arc::new(CounterTimeSource::new()))
        .build()
        .unwrap();
    Stores {
        users,
        orders,
        status,
        factory,
    }
}

impl Stores {
    fn begin(&self) -> Transaction {
        let mut txn = self.factory.new_transaction();
        txn.start().unwrap();
        txn
    }
}

#[test]
fn commit_spans_both_stores() {
    let s = stores();
    let mut txn = s.begin();
    txn.write("users", "John", &Person::new("John", 30)).unwrap();
    txn.write("orders", "order-1", "John: 2 books").unwrap();
    assert_eq!(txn.write_set_len("users").unwrap(), 1);
    assert_eq!(txn.write_set_len("orders").unwrap(), 1);
    let txn_id = txn.txn_id();
    txn.commit().unwrap();

    let user = s.users.get_item("John").unwrap().unwrap();
    let order = s.orders.get_item("order-1").unwrap().unwrap();
    assert_eq!(user.txn_id, txn_id);
    assert_eq!(order.txn_id, txn_id);
    assert_eq!(user.t_valid, order.t_valid);
    assert!(user.is_committed() && order.is_committed());
    // status records live only in the global store
    assert_eq!(s.status.get(&txn_id.tsr_key()).unwrap(), None);

    let mut check = s.begin();
    assert_eq!(check.read::<Person>("users", "John").unwrap().age, 30);
    assert_eq!(check.read::<String>("orders", "order-1").unwrap(), "John: 2 books");
}

#[test]
fn abort_discards_both_stores() {
    let s = stores();
    let mut txn = s.begin();
    txn.write("users", "John", &Person::new("John", 30)).unwrap();
    txn.write("orders", "order-1", "pending").unwrap();
    txn.abort().unwrap();

    assert_eq!(txn.status(), TransactionStatus::Aborted);
    assert_eq!(s.users.item_count(), 0);
    assert_eq!(s.orders.item_count(), 0);
    assert!(matches!(txn.commit(), Err(Error::AlreadyAborted)));
}

#[test]
fn conflict_in_one_store_aborts_the_other() {
    let s = stores();
    let mut seed = s.begin();
    seed.write("users", "John", &Person::new("John", 30)).unwrap();
    seed.write("orders", "order-1", "none").unwrap();
    seed.commit().unwrap();

    let mut slow = s.begin();
    let mut john: Person = slow.read("users", "John").unwrap();
    let _: String = slow.read("orders", "order-1").unwrap();

    let mut fast = s.begin();
    fast.write("users", "John", &Person::new("John", 40)).unwrap();
    fast.commit().unwrap();

    john.age += 1;
    slow.write("users", "John", &john).unwrap();
    slow.write("orders", "order-1", "birthday cake").unwrap();
    let err = slow.commit().unwrap_err();
    assert!(err.is_retryable());

    let mut check = s.begin();
    assert_eq!(check.read::<Person>("users", "John").unwrap().age, 40);
    assert_eq!(check.read::<String>("orders", "order-1").unwrap(), "none");
    assert!(s.orders.get_item("order-1").unwrap().unwrap().is_committed());
}

#[test]
fn unknown_datastore_is_rejected() {
    let s = stores();
    let mut txn = s.begin();
    assert!(matches!(
        txn.read::<String>("payments", "k"),
        Err(Error::DatastoreNotFound(name)) if name == "payments"
    ));
    assert!(matches!(
        txn.write("payments", "k", "v"),
        Err(Error::DatastoreNotFound(_))
    ));
    assert!(txn.write_set_len("payments").is_err());
}

#[test]
fn factory_from_toml() {
    init_tracing();
    let config = FactoryConfig::from_toml_str(
        r#"
        time_oracle_source = "LOCAL"
        locker_source = "LOCAL"

        [protocol]
        max_record_length = 3
        lease_time_ms = 250
        codec = "msgpack"
        "#,
    )
    .unwrap();
    assert_eq!(config.protocol.codec, Codec::MessagePack);

    let backend = Arc::new(MemoryConnector::new());
    let factory = TransactionFactory::builder(config)
        .datastore("a", backend.clone())
        .datastore("b", Arc::new(MemoryConnector::new()))
        .global_datastore("a", backend.clone())
        .build()
        .unwrap();
    assert_eq!(factory.datastore_names(), vec!["a", "b"]);

    for age in 1..=4u32 {
        let mut txn = factory.new_transaction();
        txn.start().unwrap();
        txn.write("a", "p", &Person::new("P", age)).unwrap();
        txn.commit().unwrap();
    }
    let head = backend.get_item("p").unwrap().unwrap();
    assert_eq!(head.linked_len, 3);
    let person: Person = Codec::MessagePack.decode(&head.value).unwrap();
    assert_eq!(person.age, 4);
}

#[test]
fn global_config_requires_url() {
    let err = TransactionFactory::builder(FactoryConfig::global(""))
        .datastore("a", Arc::new(MemoryConnector::new()))
        .global_datastore("a", Arc::new(MemoryConnector::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn transactions_share_the_factory_locker() {
    let s = stores();
    let first = s.begin();
    let second = s.begin();

    first.lock("John", "first", Duration::from_secs(5)).unwrap();
    assert!(second.unlock("John", "second").is_err());
    first.unlock("John", "first").unwrap();

    // free again; a short hold expires on its own
    second.lock("John", "second", Duration::from_millis(20)).unwrap();
    first.lock("John", "first", Duration::from_secs(1)).unwrap();
    first.unlock("John", "first").unwrap();
}
