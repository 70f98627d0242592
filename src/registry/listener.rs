use crate::KV;

/// Receives membership changes for a watched prefix.
///
/// Registered through [`crate::Registry::monitor`]. The current membership is
/// delivered as `on_add` calls before `monitor` returns; afterwards each
/// store-side change arrives as exactly one callback. Callbacks run on watch
/// tasks: keep them short and never block on the registry from inside one.
pub trait UpdateListener: Send + Sync {
    /// A key appeared under the prefix, or its value changed.
    fn on_add(&self, kv: KV);

    /// A key disappeared; `kv.value` carries the last value observed for it.
    fn on_delete(&self, kv: KV);
}

/// Adapts a pair of closures into an [`UpdateListener`].
pub struct FnListener<A, D> {
    add: A,
    delete: D,
}

impl<A, D> FnListener<A, D>
where
    A: Fn(KV) + Send + Sync,
    D: Fn(KV) + Send + Sync,
{
    pub fn new(add: A, delete: D) -> Self {
        Self { add, delete }
    }
}

impl<A, D> UpdateListener for FnListener<A, D>
where
    A: Fn(KV) + Send + Sync,
    D: Fn(KV) + Send + Sync,
{
    fn on_add(&self, kv: KV) {
        (self.add)(kv)
    }

    fn on_delete(&self, kv: KV) {
        (self.delete)(kv)
    }
}
