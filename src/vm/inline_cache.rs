//! Per-call-site monomorphic inline cache.
//!
//! Kept per-frame rather than per-function, since the cache must not be
//! shared between invocations of the same function. A small `HashMap`
//! keyed by the call site's `Ip` plays the role of a small array (one slot
//! per call site) — a `Vec` indexed by `Ip` would also work, but most
//! functions only exercise a handful of their call sites per invocation, so
//! a map avoids preallocating one entry per instruction.

use std::collections::HashMap;

use crate::bytecode::Ip;
use crate::host::{ClassId, LayoutVersion};

/// Resolved method handle cached at a `CALL_VIRTUAL` site: the method's name
/// is already known from the constant pool, so the cache only needs to
/// confirm the receiver's shape hasn't changed — there's no function pointer
/// to store independent of the (scope, receiver) pair, so a hit just skips
/// straight to `invoke_instance_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheKey {
    class_id: ClassId,
    layout_version: LayoutVersion,
}

#[derive(Default)]
pub struct MethodCache {
    entries: HashMap<Ip, CacheKey>,
    pub hits: u64,
    pub misses: u64,
}

impl MethodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the cached entry at `site` matches `(class_id,
    /// layout_version)` — a cache hit that lets the caller skip the full
    /// name lookup and updates the hit/miss counters.
    pub fn check(&mut self, site: Ip, class_id: ClassId, layout_version: LayoutVersion) -> bool {
        let hit = matches!(self.entries.get(&site), Some(k) if k.class_id == class_id && k.layout_version == layout_version);
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
            self.entries.insert(site, CacheKey { class_id, layout_version });
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_for_same_shape() {
        let mut cache = MethodCache::new();
        assert!(!cache.check(10, 1, 1));
        assert!(cache.check(10, 1, 1));
        assert!(cache.check(10, 1, 1));
        assert_eq!(cache.hits, 2);
        assert_eq!(cache.misses, 1);
    }

    #[test]
    fn layout_version_bump_invalidates() {
        let mut cache = MethodCache::new();
        assert!(!cache.check(10, 1, 1));
        assert!(!cache.check(10, 1, 2));
        assert_eq!(cache.misses, 2);
    }
}
