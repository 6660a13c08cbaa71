use std::rc::Rc;

use serde_json::{json, Map, Value};

use hub_kvo::ObservationContext;
use hub_store::{
    AttrKind, FixtureSource, RecordAttribute, RecordType, Status, Store, StoreError,
};

fn task_type() -> RecordType {
    RecordType::new("task")
        .with_attribute(RecordAttribute::new("title", AttrKind::String).with_default(json!("")))
        .with_attribute(RecordAttribute::new("done", AttrKind::Boolean).with_default(json!(false)))
}

fn hash(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

fn store_with_source() -> (Store, Rc<FixtureSource>) {
    let ctx = ObservationContext::new();
    let store = Store::new(&ctx);
    store.register_record_type(task_type());
    let source = Rc::new(FixtureSource::new());
    store.set_data_source(Rc::clone(&source) as Rc<dyn hub_store::DataSource>);
    (store, source)
}

#[test]
fn commit_without_a_source_is_misuse() {
    let ctx = ObservationContext::new();
    let store = Store::new(&ctx);
    store.register_record_type(task_type());
    assert!(matches!(
        store.commit_records(None, None, None),
        Err(StoreError::NoDataSource)
    ));
}

#[test]
fn creates_updates_and_destroys_flow_through_the_source() {
    let (store, source) = store_with_source();

    // One of each dirty flavor.
    let created = store
        .create_record("task", "t-new", hash(&[("title", json!("write"))]))
        .expect("create");

    source.insert_fixture("task", "t-upd", hash(&[("id", json!("t-upd"))]));
    let loaded = store
        .load_records(
            "task",
            vec![
                hash(&[("id", json!("t-upd")), ("title", json!("old"))]),
                hash(&[("id", json!("t-del")), ("title", json!("doomed"))]),
            ],
        )
        .expect("load");
    source.insert_fixture("task", "t-del", hash(&[("id", json!("t-del"))]));

    let updated = store.record(loaded[0]).expect("record");
    updated.write_attribute("title", json!("new title"));
    store.destroy_store_key(loaded[1]);

    let committed = store.commit_records(None, None, None).expect("commit");
    assert_eq!(committed.len(), 3);

    assert_eq!(store.read_status(created.store_key()), Status::READY_CLEAN);
    assert_eq!(store.read_status(loaded[0]), Status::READY_CLEAN);
    assert_eq!(store.read_status(loaded[1]), Status::DESTROYED_CLEAN);

    assert_eq!(
        source
            .fixture("task", "t-new")
            .expect("created fixture")
            .get("title"),
        Some(&json!("write"))
    );
    assert_eq!(
        source
            .fixture("task", "t-upd")
            .expect("updated fixture")
            .get("title"),
        Some(&json!("new title"))
    );
    assert!(source.fixture("task", "t-del").is_none());
}

#[test]
fn clean_records_are_not_committed() {
    let (store, source) = store_with_source();
    store
        .load_records("task", vec![hash(&[("id", json!("t1"))])])
        .expect("load");
    let committed = store.commit_records(None, None, None).expect("commit");
    assert!(committed.is_empty());
    assert!(source.is_empty());
}

#[test]
fn source_failures_park_the_record_in_error_status() {
    let (store, _source) = store_with_source();

    // Dirty, but the source has never heard of it: the update is refused.
    let loaded = store
        .load_records("task", vec![hash(&[("id", json!("t-miss"))])])
        .expect("load");
    store.record(loaded[0]).expect("record").write_attribute("title", json!("x"));

    let created = store
        .create_record("task", "t-ok", hash(&[]))
        .expect("create");

    let committed = store.commit_records(None, None, None).expect("commit");
    assert_eq!(committed, vec![created.store_key()], "partial success reports survivors");
    assert_eq!(store.read_status(loaded[0]), Status::ERROR);
    assert_eq!(store.read_status(created.store_key()), Status::READY_CLEAN);
}

#[test]
fn commit_can_be_narrowed_to_store_keys() {
    let (store, _source) = store_with_source();
    let one = store.create_record("task", "one", hash(&[])).expect("create");
    let two = store.create_record("task", "two", hash(&[])).expect("create");

    let committed = store
        .commit_records(None, None, Some(&[one.store_key()]))
        .expect("commit");
    assert_eq!(committed, vec![one.store_key()]);
    assert_eq!(store.read_status(one.store_key()), Status::READY_CLEAN);
    assert_eq!(store.read_status(two.store_key()), Status::READY_NEW);
}

#[test]
fn commit_can_be_narrowed_by_type_and_id() {
    let (store, _source) = store_with_source();
    let one = store.create_record("task", "one", hash(&[])).expect("create");
    let two = store.create_record("task", "two", hash(&[])).expect("create");

    let committed = store
        .commit_records(Some(&["task"]), Some(&["two"]), None)
        .expect("commit");
    assert_eq!(committed, vec![two.store_key()]);
    assert_eq!(store.read_status(one.store_key()), Status::READY_NEW);

    let rest = store
        .commit_records(Some(&["task"]), None, None)
        .expect("commit");
    assert_eq!(rest, vec![one.store_key()]);
}

#[test]
fn double_create_against_the_source_is_refused() {
    let (store, source) = store_with_source();
    source.insert_fixture("task", "taken", hash(&[("id", json!("taken"))]));
    store
        .create_record("task", "taken", hash(&[]))
        .expect("create locally");

    let committed = store.commit_records(None, None, None).expect("commit");
    assert!(committed.is_empty());
    let sk = store.store_key_for("task", "taken").expect("key");
    assert_eq!(store.read_status(sk), Status::ERROR);
}

#[test]
fn nested_commit_then_root_commit_round_trip() {
    let (store, source) = store_with_source();
    let child = store.create_editing_context();
    child
        .create_record("task", "deep", hash(&[("title", json!("from context"))]))
        .expect("create in context");
    child.commit_changes().expect("merge into root");

    let committed = store.commit_records(None, None, None).expect("commit");
    assert_eq!(committed.len(), 1);
    assert_eq!(
        source
            .fixture("task", "deep")
            .expect("fixture")
            .get("title"),
        Some(&json!("from context"))
    );
    let record = store.find("task", "deep").expect("type").expect("record");
    assert_eq!(record.status(), Status::READY_CLEAN);
}
