//! Chained (path) observation.
//!
//! A dotted path such as `a.b.c` is observed by a linked chain of
//! [`ChainLink`] nodes, one per segment. Each node watches its segment on
//! its current source object; when the segment's value swings to a
//! different object the node re-registers downstream links on the new
//! intermediate, and when a segment is missing or not an object the chain
//! pauses at that node until the value materializes. The terminal node
//! caches the currently-observed value and invokes the master observer only
//! when it actually changes.

use std::cell::RefCell;
use std::rc::Rc;

use crate::object::{ObservableObject, WeakObservable};
use crate::observer::{Notification, Observer};
use crate::value::PropValue;

pub(crate) struct ChainRegistration {
    pub(crate) path: String,
    pub(crate) target: String,
    pub(crate) method: String,
    pub(crate) head: Rc<ChainLink>,
}

/// One segment of an observed path.
pub(crate) struct ChainLink {
    segment: String,
    source: RefCell<Option<WeakObservable>>,
    next: RefCell<Option<Rc<ChainLink>>>,
    /// Present on the terminal link only.
    master: RefCell<Option<Observer>>,
    /// Terminal cache of the currently-observed value.
    last_value: RefCell<PropValue>,
}

impl ChainLink {
    /// Builds the linked chain for `segments`, handing the master observer
    /// to the terminal link. Returns `None` for an empty segment list.
    pub(crate) fn build(segments: &[String], observer: Observer) -> Option<Rc<ChainLink>> {
        let mut node: Option<Rc<ChainLink>> = None;
        for segment in segments.iter().rev() {
            let is_terminal = node.is_none();
            node = Some(Rc::new(ChainLink {
                segment: segment.clone(),
                source: RefCell::new(None),
                next: RefCell::new(node.take()),
                master: RefCell::new(is_terminal.then(|| observer.clone())),
                last_value: RefCell::new(PropValue::null()),
            }));
        }
        node
    }

    /// Wires the chain onto `source` without firing the master observer:
    /// registration must observe changes, not current state.
    pub(crate) fn prime(self: &Rc<Self>, source: Option<ObservableObject>) {
        self.swing(source, false);
    }

    /// The observed segment changed on the current source object. Re-reads
    /// the value and propagates downstream; the terminal link fires the
    /// master observer when the observed value differs from its cache.
    pub(crate) fn source_key_did_change(self: &Rc<Self>) {
        let source = self.source.borrow().clone().and_then(|w| w.upgrade());
        self.swing(source, true);
    }

    fn swing(self: &Rc<Self>, new_source: Option<ObservableObject>, notify: bool) {
        let current = self.source.borrow().clone().and_then(|w| w.upgrade());
        let same = match (&current, &new_source) {
            (Some(a), Some(b)) => a.object_id() == b.object_id(),
            (None, None) => true,
            _ => false,
        };
        if !same {
            tracing::trace!(segment = %self.segment, "rewiring chain link");
            if let Some(old) = current {
                old.unregister_chain(&self.segment, self);
            }
            *self.source.borrow_mut() = new_source.as_ref().map(ObservableObject::downgrade);
            if let Some(new) = &new_source {
                new.register_chain(&self.segment, Rc::clone(self));
            }
        }

        let value = match &new_source {
            Some(source) => source.get(&self.segment),
            None => PropValue::null(),
        };

        let next = self.next.borrow().clone();
        match next {
            Some(next) => next.swing(value.as_object().cloned(), notify),
            None => {
                if *self.last_value.borrow() == value {
                    return;
                }
                *self.last_value.borrow_mut() = value;
                if !notify {
                    return;
                }
                let Some(source) = &new_source else {
                    // The chain broke; there is no terminal object to hand
                    // to the observer. The cache update above still makes
                    // the next materialization count as a change.
                    return;
                };
                let master = self.master.borrow().clone();
                if let Some(observer) = master {
                    let handler = observer.handler();
                    handler(&Notification {
                        object: source,
                        key: &self.segment,
                        context: observer.context_value(),
                        revision: source.revision(),
                    });
                }
            }
        }
    }

    /// Removes every KVO hookup this chain installed, down to the terminal.
    pub(crate) fn destroy(self: &Rc<Self>) {
        let current = self.source.borrow_mut().take().and_then(|w| w.upgrade());
        if let Some(old) = current {
            old.unregister_chain(&self.segment, self);
        }
        *self.master.borrow_mut() = None;
        if let Some(next) = self.next.borrow_mut().take() {
            next.destroy();
        }
    }
}
