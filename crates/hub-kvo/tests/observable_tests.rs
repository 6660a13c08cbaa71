use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{json, Value};

use hub_kvo::{
    ComputedProperty, KvoError, ObservableObject, ObservationContext, Observer, PropValue,
};

fn counter() -> (Rc<Cell<usize>>, impl Fn(&hub_kvo::Notification<'_>) + 'static) {
    let count = Rc::new(Cell::new(0usize));
    let clone = Rc::clone(&count);
    (count, move |_note: &hub_kvo::Notification<'_>| {
        clone.set(clone.get() + 1);
    })
}

fn full_name_object(ctx: &ObservationContext) -> (ObservableObject, Rc<Cell<usize>>) {
    let object = ObservableObject::new(ctx);
    let computes = Rc::new(Cell::new(0usize));
    let computes_clone = Rc::clone(&computes);
    object.define_property(
        "fullName",
        ComputedProperty::new(move |obj, _key, value| {
            assert!(value.is_none(), "fullName is read-only in this fixture");
            computes_clone.set(computes_clone.get() + 1);
            let first = obj.get("first").as_str().unwrap_or("<none>").to_owned();
            let last = obj.get("last").as_str().unwrap_or("<none>").to_owned();
            Some(PropValue::from(format!("{first} {last}")))
        })
        .cacheable()
        .depends_on(["first", "last"]),
    );
    (object, computes)
}

#[test]
fn computed_property_caches_until_dependent_changes() {
    let ctx = ObservationContext::new();
    let (object, computes) = full_name_object(&ctx);

    object.set("first", "A");
    assert_eq!(object.get("fullName").as_str(), Some("A <none>"));
    assert_eq!(computes.get(), 1);

    // Second read must hit the cache.
    assert_eq!(object.get("fullName").as_str(), Some("A <none>"));
    assert_eq!(computes.get(), 1);

    object.set("last", "B");
    assert_eq!(object.get("fullName").as_str(), Some("A B"));
    assert_eq!(computes.get(), 2, "dependent change must recompute exactly once");
}

#[test]
fn dependent_cache_is_cleared_before_observers_fire() {
    let ctx = ObservationContext::new();
    let (object, computes) = full_name_object(&ctx);
    assert_eq!(object.get("fullName").as_str(), Some("<none> <none>"));
    assert_eq!(computes.get(), 1);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let observer = Observer::new("test", "full_name_changed", move |note| {
        // Reading inside the callback must observe the fresh value, which
        // requires the stale cache slot to be gone already.
        seen_clone
            .borrow_mut()
            .push(note.object.get("fullName").as_str().unwrap_or("").to_owned());
    });
    object
        .add_observer("fullName", &observer)
        .expect("plain key registration");

    object.set("first", "A");
    assert_eq!(*seen.borrow(), ["A <none>"]);
    assert_eq!(computes.get(), 2);
}

#[test]
fn grouped_writes_notify_once_with_final_value() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let calls = Rc::new(Cell::new(0usize));
    let observed = Rc::new(RefCell::new(Value::Null));
    let calls_clone = Rc::clone(&calls);
    let observed_clone = Rc::clone(&observed);
    let observer = Observer::new("test", "value_changed", move |note| {
        calls_clone.set(calls_clone.get() + 1);
        *observed_clone.borrow_mut() = note
            .object
            .get("value")
            .into_json()
            .unwrap_or(Value::Null);
    });
    object.add_observer("value", &observer).expect("register");

    object.begin_property_changes();
    object.set("value", 1i64);
    object.set("value", 2i64);
    object.set("value", 3i64);
    object.end_property_changes();

    assert_eq!(calls.get(), 1, "grouped writes coalesce to one notification");
    assert_eq!(*observed.borrow(), json!(3));
}

#[test]
fn coalescence_is_per_distinct_key() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let (count_a, handler_a) = counter();
    let (count_b, handler_b) = counter();
    object
        .add_observer("a", &Observer::new("test", "a_changed", handler_a))
        .expect("register a");
    object
        .add_observer("b", &Observer::new("test", "b_changed", handler_b))
        .expect("register b");

    object.begin_property_changes();
    object.set("a", 1i64);
    object.set("b", 1i64);
    object.set("a", 2i64);
    object.set("b", 2i64);
    object.end_property_changes();

    assert_eq!(count_a.get(), 1);
    assert_eq!(count_b.get(), 1);
}

#[test]
fn set_if_changed_with_equal_value_is_silent() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    object.set("k", "x");
    let before = object.revision();

    let (count, handler) = counter();
    object
        .add_observer("k", &Observer::new("test", "k_changed", handler))
        .expect("register");

    object.set_if_changed("k", "x");
    assert_eq!(count.get(), 0);
    assert_eq!(object.revision(), before, "no-op write must not advance the revision");

    object.set_if_changed("k", "y");
    assert_eq!(count.get(), 1);
    assert!(object.revision() > before);
}

#[test]
fn revision_is_strictly_monotonic() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let mut last = object.revision();
    for round in 0..5i64 {
        object.set("n", round);
        assert!(object.revision() > last);
        last = object.revision();
    }
    object.notify_property_change("n");
    assert!(object.revision() > last);
}

#[test]
fn observer_context_is_delivered_and_overwritten() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let handler = move |note: &hub_kvo::Notification<'_>| {
        seen_clone.borrow_mut().push(note.context.cloned());
    };
    object
        .add_observer(
            "k",
            &Observer::new("test", "k_changed", handler.clone()).with_context(json!("first")),
        )
        .expect("register");
    // Same (target, method) pair: last writer wins on context.
    object
        .add_observer(
            "k",
            &Observer::new("test", "k_changed", handler).with_context(json!("second")),
        )
        .expect("re-register");

    object.set("k", 1i64);
    assert_eq!(*seen.borrow(), [Some(json!("second"))]);
}

#[test]
fn removing_an_observer_during_fanout_is_tolerated() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let (count_b, handler_b) = counter();
    let object_clone = object.clone();
    let remover = Observer::new("test", "remover", move |_note| {
        object_clone
            .remove_observer("k", "test", "victim")
            .expect("removal during fan-out");
    });
    let victim = Observer::new("test", "victim", handler_b);
    object.add_observer("k", &remover).expect("register remover");
    object.add_observer("k", &victim).expect("register victim");

    // First pass iterates a snapshot: the victim may still fire here.
    object.set("k", 1i64);
    let after_first = count_b.get();
    assert!(after_first <= 1);

    object.set("k", 2i64);
    assert_eq!(count_b.get(), after_first, "removed observer must stay silent");
}

#[test]
fn star_observers_hear_every_key_once_per_pass() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let keys = Rc::new(RefCell::new(Vec::new()));
    let keys_clone = Rc::clone(&keys);
    let observer = Observer::new("test", "any_change", move |note| {
        keys_clone.borrow_mut().push(note.key.to_owned());
    });
    object.add_observer("*", &observer).expect("register star");

    object.set("x", 1i64);
    assert_eq!(keys.borrow().len(), 1);

    object.begin_property_changes();
    object.set("x", 2i64);
    object.set("y", 1i64);
    object.end_property_changes();
    // One coalesced pass: the member is revision-deduplicated.
    assert_eq!(keys.borrow().len(), 2);
}

#[test]
fn all_properties_did_change_reaches_observed_keys() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    object.set("a", 1i64);
    let (count, handler) = counter();
    object
        .add_observer("a", &Observer::new("test", "a_changed", handler))
        .expect("register");

    object.all_properties_did_change();
    assert_eq!(count.get(), 1);
}

#[test]
fn manual_notification_keys_stay_silent_until_notified() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    object.set_automatic_notification("quiet", false);
    assert!(!object.automatically_notifies_observers_for("quiet"));

    let (count, handler) = counter();
    object
        .add_observer("quiet", &Observer::new("test", "quiet_changed", handler))
        .expect("register");

    object.set("quiet", 1i64);
    assert_eq!(count.get(), 0);
    assert_eq!(object.get("quiet").as_i64(), Some(1));

    object.notify_property_change("quiet");
    assert_eq!(count.get(), 1);
}

#[test]
fn local_observer_covering_several_keys_fires_once_per_pass() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let (count, handler) = counter();
    object.add_local_observer(&["a", "b", "c"], "combined", handler);

    object.begin_property_changes();
    object.set("a", 1i64);
    object.set("b", 2i64);
    object.set("c", 3i64);
    object.end_property_changes();
    assert_eq!(count.get(), 1, "shared registration dedups across its keys");

    object.set("a", 9i64);
    assert_eq!(count.get(), 2);

    object.remove_local_observer("combined");
    object.set("b", 9i64);
    assert_eq!(count.get(), 2);
}

#[test]
fn did_change_for_tracks_revision_then_value() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    object.set("k", 1i64);

    assert!(object.did_change_for("token", &["k"]), "first probe sees a change");
    assert!(!object.did_change_for("token", &["k"]));

    // Revision advances but the value is identical: no change reported.
    object.notify_property_change("k");
    assert!(!object.did_change_for("token", &["k"]));

    object.set("k", 2i64);
    assert!(object.did_change_for("token", &["k"]));

    // Independent tokens do not share state.
    assert!(object.did_change_for("other", &["k"]));
}

#[test]
fn path_reads_and_writes_traverse_the_graph() {
    let ctx = ObservationContext::new();
    let child = ObservableObject::new(&ctx);
    child.set("name", "x");
    let parent = ObservableObject::new(&ctx);
    parent.set("child", child.clone());

    assert_eq!(
        parent.get_path("child.name").and_then(|v| v.as_str().map(str::to_owned)),
        Some("x".to_owned())
    );
    assert!(parent.get_path("child.missing.deep").is_none());

    parent.set_path("child.name", "y").expect("resolvable path");
    assert_eq!(child.get("name").as_str(), Some("y"));

    let (count, handler) = counter();
    child
        .add_observer("name", &Observer::new("test", "name_changed", handler))
        .expect("register");
    parent
        .set_path_if_changed("child.name", "y")
        .expect("resolvable path");
    assert_eq!(count.get(), 0, "unchanged path write is silent");

    let err = parent.set_path("child.missing.deep", 1i64).expect_err("broken path");
    assert!(matches!(err, KvoError::PathNotResolvable { .. }));
}

#[test]
fn numeric_and_boolean_helpers() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);

    assert_eq!(object.increment_property("n", 1).as_i64(), Some(1));
    assert_eq!(object.increment_property("n", 4).as_i64(), Some(5));
    assert_eq!(object.decrement_property("n", 2).as_i64(), Some(3));

    assert_eq!(object.toggle_property("flag").as_bool(), Some(true));
    assert_eq!(object.toggle_property("flag").as_bool(), Some(false));

    object.set("a", 1i64);
    object.set("b", 2i64);
    let values = object.get_each(&["a", "b", "missing"]);
    assert_eq!(values[0].as_i64(), Some(1));
    assert_eq!(values[1].as_i64(), Some(2));
    assert!(values[2].is_null());
}

#[test]
fn volatile_descriptor_is_never_memoized() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let computes = Rc::new(Cell::new(0usize));
    let computes_clone = Rc::clone(&computes);
    object.define_property(
        "now",
        ComputedProperty::new(move |_obj, _key, _value| {
            computes_clone.set(computes_clone.get() + 1);
            Some(PropValue::from(7i64))
        })
        .cacheable()
        .volatile(),
    );

    object.get("now");
    object.get("now");
    assert_eq!(computes.get(), 2, "volatile wins over cacheable");

    // Writes always reach a volatile body, even with an equal value.
    object.set("now", 7i64);
    object.set("now", 7i64);
    assert_eq!(computes.get(), 4);
}

#[test]
fn has_observer_for_reflects_every_kind_of_registration() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    assert!(!object.has_observer_for("k"));

    let observer = Observer::new("test", "k_changed", |_note| {});
    object.add_observer("k", &observer).expect("register");
    assert!(object.has_observer_for("k"));

    object.remove_observer("k", "test", "k_changed").expect("remove");
    assert!(!object.has_observer_for("k"));

    object.add_local_observer(&["k"], "local", |_note| {});
    assert!(object.has_observer_for("k"));
    object.remove_local_observer("local");
    assert!(!object.has_observer_for("k"));
}

#[test]
fn computed_writer_short_circuits_on_last_set_value() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let writes = Rc::new(Cell::new(0usize));
    let writes_clone = Rc::clone(&writes);
    object.define_property(
        "score",
        ComputedProperty::new(move |obj, _key, value| match value {
            Some(v) => {
                writes_clone.set(writes_clone.get() + 1);
                obj.set("raw", v.clone());
                Some(v.clone())
            }
            None => Some(obj.get("raw")),
        })
        .cacheable(),
    );

    object.set("score", 10i64);
    object.set("score", 10i64);
    assert_eq!(writes.get(), 1, "equal value must not reach the descriptor body");

    object.set("score", 11i64);
    assert_eq!(writes.get(), 2);
    assert_eq!(object.get("score").as_i64(), Some(11));
}
