//! Computed-property descriptors.

use std::rc::Rc;

use crate::object::ObservableObject;
use crate::value::PropValue;

/// The body of a computed property.
///
/// Called with `value: None` on read and `Some(value)` on write. The return
/// value is the canonical value of the property: on read it is what `get`
/// returns (and caches, when cacheable); on write it is what the cache is
/// refreshed with. Returning `None` means "no value" and clears the cache
/// slot.
pub type PropertyFn =
    Rc<dyn Fn(&ObservableObject, &str, Option<&PropValue>) -> Option<PropValue>>;

/// Descriptor for a function exposed as a property.
#[derive(Clone)]
pub struct ComputedProperty {
    func: PropertyFn,
    cacheable: bool,
    volatile: bool,
    dependent_keys: Vec<String>,
}

impl ComputedProperty {
    pub fn new(
        func: impl Fn(&ObservableObject, &str, Option<&PropValue>) -> Option<PropValue> + 'static,
    ) -> Self {
        Self {
            func: Rc::new(func),
            cacheable: false,
            volatile: false,
            dependent_keys: Vec::new(),
        }
    }

    /// Memoize reads until the key (or a key it depends on) changes.
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// The property may return a different value on every read, and writes
    /// must always reach the body. Volatile wins over cacheable: a volatile
    /// descriptor is never memoized and skips last-set short-circuiting.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Declares the keys this property is computed from. Registered as
    /// dependent keys when the descriptor is installed on an object.
    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependent_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable && !self.volatile
    }

    pub fn is_volatile(&self) -> bool {
        self.volatile
    }

    pub fn dependent_keys(&self) -> &[String] {
        &self.dependent_keys
    }

    pub(crate) fn call(
        &self,
        object: &ObservableObject,
        key: &str,
        value: Option<&PropValue>,
    ) -> Option<PropValue> {
        (self.func)(object, key, value)
    }
}

impl std::fmt::Debug for ComputedProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedProperty")
            .field("cacheable", &self.cacheable)
            .field("volatile", &self.volatile)
            .field("dependent_keys", &self.dependent_keys)
            .finish()
    }
}
