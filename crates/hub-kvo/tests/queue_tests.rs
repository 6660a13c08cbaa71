use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hub_kvo::{KvoError, ObservableObject, ObservationContext, Observer};

fn counting_observer(label: &str) -> (Rc<Cell<usize>>, Observer) {
    let count = Rc::new(Cell::new(0usize));
    let clone = Rc::clone(&count);
    let observer = Observer::new("test", label, move |_note| {
        clone.set(clone.get() + 1);
    });
    (count, observer)
}

#[test]
fn path_observer_defers_until_root_registers() {
    let ctx = ObservationContext::new();
    let (count, observer) = counting_observer("profile_name");
    ctx.add_observer("app.profile.name", &observer)
        .expect("deferred registration");

    let root = ObservableObject::new(&ctx);
    let profile = ObservableObject::new(&ctx);
    root.set("profile", profile.clone());

    // Nothing fires while the registration is parked.
    profile.set("name", "n0");
    assert_eq!(count.get(), 0);

    ctx.register_root("app", &root);
    // Installation is silent; only subsequent changes fire.
    assert_eq!(count.get(), 0);

    profile.set("name", "n1");
    assert_eq!(count.get(), 1);
}

#[test]
fn pending_registrations_are_deduplicated() {
    let ctx = ObservationContext::new();
    let (count, observer) = counting_observer("profile_name");
    ctx.add_observer("app.profile.name", &observer)
        .expect("first registration");
    ctx.add_observer("app.profile.name", &observer)
        .expect("duplicate registration");

    let root = ObservableObject::new(&ctx);
    let profile = ObservableObject::new(&ctx);
    root.set("profile", profile.clone());
    ctx.register_root("app", &root);

    profile.set("name", "n1");
    assert_eq!(count.get(), 1, "the duplicate tuple must not install twice");
}

#[test]
fn pending_registration_can_be_cancelled() {
    let ctx = ObservationContext::new();
    let (count, observer) = counting_observer("profile_name");
    ctx.add_observer("app.profile.name", &observer)
        .expect("deferred registration");
    ctx.remove_observer("app.profile.name", "test", "profile_name")
        .expect("cancel while pending");

    let root = ObservableObject::new(&ctx);
    let profile = ObservableObject::new(&ctx);
    root.set("profile", profile.clone());
    ctx.register_root("app", &root);

    profile.set("name", "n1");
    assert_eq!(count.get(), 0);
}

#[test]
fn installed_path_observer_can_be_removed_through_the_context() {
    let ctx = ObservationContext::new();
    let root = ObservableObject::new(&ctx);
    let profile = ObservableObject::new(&ctx);
    root.set("profile", profile.clone());
    ctx.register_root("app", &root);

    let (count, observer) = counting_observer("profile_name");
    ctx.add_observer("app.profile.name", &observer)
        .expect("installed registration");
    profile.set("name", "n1");
    assert_eq!(count.get(), 1);

    ctx.remove_observer("app.profile.name", "test", "profile_name")
        .expect("remove installed");
    profile.set("name", "n2");
    assert_eq!(count.get(), 1);
}

#[test]
fn unknown_root_and_malformed_paths_error() {
    let ctx = ObservationContext::new();
    let observer = Observer::new("test", "m", |_note| {});
    let err = ctx.add_observer("solo", &observer).expect_err("rootless path");
    assert!(matches!(err, KvoError::MalformedPath(_)));

    let err = ctx
        .remove_observer("ghost.key", "test", "m")
        .expect_err("nothing registered or pending");
    assert!(matches!(err, KvoError::UnknownRoot(_)));
}

#[test]
fn suspension_coalesces_until_resume() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let (count, observer) = counting_observer("value");
    object.add_observer("value", &observer).expect("register");

    ctx.suspend_observing();
    object.set("value", 1i64);
    object.set("value", 2i64);
    assert_eq!(count.get(), 0, "suspended contexts defer notification");

    ctx.resume_observing();
    assert_eq!(count.get(), 1, "resume drains one coalesced pass");
    assert_eq!(object.get("value").as_i64(), Some(2));
}

#[test]
fn suspension_nests() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let (count, observer) = counting_observer("value");
    object.add_observer("value", &observer).expect("register");

    ctx.suspend_observing();
    ctx.suspend_observing();
    object.set("value", 1i64);

    ctx.resume_observing();
    assert_eq!(count.get(), 0, "still suspended at depth one");
    assert!(ctx.is_suspended());

    ctx.resume_observing();
    assert_eq!(count.get(), 1);
    assert!(!ctx.is_suspended());

    // Unbalanced resumes are ignored.
    ctx.resume_observing();
    assert!(!ctx.is_suspended());
}

#[test]
fn suspension_spans_several_objects() {
    let ctx = ObservationContext::new();
    let first = ObservableObject::new(&ctx);
    let second = ObservableObject::new(&ctx);
    let (count_a, observer_a) = counting_observer("a");
    let (count_b, observer_b) = counting_observer("b");
    first.add_observer("a", &observer_a).expect("register");
    second.add_observer("b", &observer_b).expect("register");

    ctx.suspend_observing();
    first.set("a", 1i64);
    second.set("b", 1i64);
    second.set("b", 2i64);
    ctx.resume_observing();

    assert_eq!(count_a.get(), 1);
    assert_eq!(count_b.get(), 1);
}

#[test]
fn changes_recorded_by_observers_during_resume_are_flushed() {
    let ctx = ObservationContext::new();
    let object = ObservableObject::new(&ctx);
    let echoes = Rc::new(RefCell::new(Vec::new()));
    let echoes_clone = Rc::clone(&echoes);
    let observer = Observer::new("test", "value", move |note| {
        echoes_clone.borrow_mut().push(note.object.get("value"));
        if note.object.get("echo").is_null() {
            note.object.set("echo", "done");
        }
    });
    object.add_observer("value", &observer).expect("register");

    ctx.suspend_observing();
    object.set("value", 1i64);
    ctx.resume_observing();

    assert_eq!(echoes.borrow().len(), 1);
    assert_eq!(object.get("echo").as_str(), Some("done"));
}
