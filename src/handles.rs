//! Named parameter handles for runtime injection into compiled graphs.
//!
//! Leaf nodes register the cells they own while the compiler walks the
//! tree; combinators merge child registries on the way up. After compile,
//! a clone of the registry travels to the dispatch thread and every
//! operation on it is lock-free or O(1), so note events can poke live
//! parameters while the render thread reads them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dsp::envelope::EnvelopeHandle;

/// A shared f64 parameter cell.
///
/// Stored as raw bits in an `AtomicU64` so the render thread reads it
/// without locking while the dispatch thread (or a chorus re-evaluation)
/// writes it.
#[derive(Clone, Debug)]
pub struct ConstCell {
    bits: Arc<AtomicU64>,
}

impl ConstCell {
    pub fn new(value: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(value.to_bits())),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

/// A live handle registered under a patch-declared name.
#[derive(Clone, Debug)]
pub enum ParamHandle {
    Const(ConstCell),
    Envelope(EnvelopeHandle),
}

/// Name → handle-list mapping produced by compilation.
///
/// Multiple tree nodes may share a logical name (duplicated library
/// subtrees, unison copies), so a collision appends rather than replaces.
#[derive(Clone, Debug, Default)]
pub struct HandleRegistry {
    entries: HashMap<String, Vec<ParamHandle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under `name`, appending on collision.
    pub fn register(&mut self, name: &str, handle: ParamHandle) {
        self.entries.entry(name.to_string()).or_default().push(handle);
    }

    /// Absorb another registry, appending its lists to matching names.
    pub fn merge(&mut self, other: HandleRegistry) {
        for (name, mut handles) in other.entries {
            self.entries.entry(name).or_default().append(&mut handles);
        }
    }

    /// Handles registered under `name`, in registration order.
    pub fn get(&self, name: &str) -> &[ParamHandle] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Set every const cell registered under `name`. Returns how many
    /// cells were written.
    pub fn set_consts(&self, name: &str, value: f64) -> usize {
        let mut written = 0;
        for handle in self.get(name) {
            if let ParamHandle::Const(cell) = handle {
                cell.set(value);
                written += 1;
            }
        }
        written
    }

    /// The first const cell registered under `name`, if any.
    pub fn const_cell(&self, name: &str) -> Option<ConstCell> {
        self.get(name).iter().find_map(|handle| match handle {
            ParamHandle::Const(cell) => Some(cell.clone()),
            ParamHandle::Envelope(_) => None,
        })
    }

    /// Every envelope handle in the registry, across all names.
    pub fn envelopes(&self) -> impl Iterator<Item = &EnvelopeHandle> {
        self.entries.values().flatten().filter_map(|handle| match handle {
            ParamHandle::Envelope(env) => Some(env),
            ParamHandle::Const(_) => None,
        })
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_round_trips_value() {
        let cell = ConstCell::new(440.0);
        assert_eq!(cell.get(), 440.0);
        cell.set(220.5);
        assert_eq!(cell.get(), 220.5);
    }

    #[test]
    fn clones_share_storage() {
        let a = ConstCell::new(1.0);
        let b = a.clone();
        b.set(7.0);
        assert_eq!(a.get(), 7.0, "Clones should see each other's writes");
    }

    #[test]
    fn collision_appends() {
        let mut reg = HandleRegistry::new();
        reg.register("freq", ParamHandle::Const(ConstCell::new(1.0)));
        reg.register("freq", ParamHandle::Const(ConstCell::new(2.0)));
        assert_eq!(reg.get("freq").len(), 2, "Same name should hold both handles");
    }

    #[test]
    fn merge_appends_lists() {
        let mut a = HandleRegistry::new();
        a.register("freq", ParamHandle::Const(ConstCell::new(1.0)));
        let mut b = HandleRegistry::new();
        b.register("freq", ParamHandle::Const(ConstCell::new(2.0)));
        b.register("cutoff", ParamHandle::Const(ConstCell::new(800.0)));

        a.merge(b);
        assert_eq!(a.get("freq").len(), 2);
        assert_eq!(a.get("cutoff").len(), 1);
    }

    #[test]
    fn set_consts_writes_all_cells() {
        let mut reg = HandleRegistry::new();
        let c1 = ConstCell::new(0.0);
        let c2 = ConstCell::new(0.0);
        reg.register("vel", ParamHandle::Const(c1.clone()));
        reg.register("vel", ParamHandle::Const(c2.clone()));

        let written = reg.set_consts("vel", 0.5);
        assert_eq!(written, 2);
        assert_eq!(c1.get(), 0.5);
        assert_eq!(c2.get(), 0.5);
    }

    #[test]
    fn missing_name_is_empty() {
        let reg = HandleRegistry::new();
        assert!(reg.get("nope").is_empty());
        assert_eq!(reg.set_consts("nope", 1.0), 0);
        assert!(reg.const_cell("nope").is_none());
    }
}
