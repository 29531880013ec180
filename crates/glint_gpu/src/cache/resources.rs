//! GPU resource cache
//!
//! Owns every cacheable GPU object. Resources live in an arena and are
//! tracked on exactly one of two LRU lists: non-purgeable while
//! external [`ResourceRef`]s exist, purgeable once they are all
//! dropped. Purgeable resources are evicted least-recently-used first
//! under memory pressure, or reclaimed through their recycle key so
//! same-shaped scratch objects pool across frames.
//!
//! The transition from non-purgeable to purgeable is lazy: dropping the
//! last external ref does nothing until the next purge or lookup pass
//! walks the lists, so ref drops stay free of list maintenance.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::backend::{GpuBackend, ResourceDescriptor, ResourceHandle};
use crate::key::{BytesKey, UniqueKey};

slotmap::new_key_type! {
    /// Stable arena key for a cached resource
    pub struct ResourceId;
}

/// Default budget for GPU memory held by the cache
pub const DEFAULT_MAX_BYTES: usize = 96 * (1 << 20); // 96MB

/// External handle to a cached resource.
///
/// Holding one keeps the resource non-purgeable; the cache notices the
/// handle count lazily on its next purge or lookup pass.
#[derive(Clone)]
pub struct ResourceRef {
    id: ResourceId,
    handle: ResourceHandle,
    token: Arc<()>,
}

impl ResourceRef {
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }
}

impl std::fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRef")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListKind {
    NonPurgeable,
    Purgeable,
}

struct Entry {
    handle: ResourceHandle,
    descriptor: ResourceDescriptor,
    bytes: usize,
    recycle_key: Option<BytesKey>,
    unique_key: Option<UniqueKey>,
    last_used: Instant,
    /// Cloned into every external ref; strong count minus one is the
    /// number of live external holders
    token: Arc<()>,
    list: ListKind,
}

impl Entry {
    fn external_refs(&self) -> usize {
        Arc::strong_count(&self.token) - 1
    }
}

/// Configuration for [`ResourceCache`]
#[derive(Clone, Copy, Debug)]
pub struct ResourceCacheOptions {
    pub max_bytes: usize,
}

impl Default for ResourceCacheOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// LRU cache of GPU resources with recycle-key pooling and
/// content-identity lookup
pub struct ResourceCache {
    arena: SlotMap<ResourceId, Entry>,
    /// Most-recently-used first
    nonpurgeable: VecDeque<ResourceId>,
    /// Most-recently-used first; eviction pops from the back
    purgeable: VecDeque<ResourceId>,
    recycle_map: FxHashMap<BytesKey, Vec<ResourceId>>,
    unique_map: FxHashMap<u32, ResourceId>,
    max_bytes: usize,
    total_bytes: usize,
    purgeable_bytes: usize,
}

impl ResourceCache {
    pub fn new(options: ResourceCacheOptions) -> Self {
        Self {
            arena: SlotMap::with_key(),
            nonpurgeable: VecDeque::new(),
            purgeable: VecDeque::new(),
            recycle_map: FxHashMap::default(),
            unique_map: FxHashMap::default(),
            max_bytes: options.max_bytes,
            total_bytes: 0,
            purgeable_bytes: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonpurgeable.is_empty() && self.purgeable.is_empty()
    }

    /// Bytes held by all cached resources, purgeable or not
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Bytes held by the purgeable subset only
    pub fn purgeable_bytes(&self) -> usize {
        self.purgeable_bytes
    }

    pub fn cache_limit(&self) -> usize {
        self.max_bytes
    }

    /// Registers a freshly allocated backend object. The returned ref
    /// is the first external reference; the resource starts
    /// non-purgeable.
    pub fn add_resource(
        &mut self,
        backend: &mut dyn GpuBackend,
        handle: ResourceHandle,
        descriptor: ResourceDescriptor,
        recycle_key: Option<BytesKey>,
    ) -> ResourceRef {
        let bytes = descriptor.byte_size();
        let token = Arc::new(());
        let id = self.arena.insert(Entry {
            handle,
            descriptor,
            bytes,
            recycle_key: recycle_key.clone(),
            unique_key: None,
            last_used: Instant::now(),
            token: token.clone(),
            list: ListKind::NonPurgeable,
        });
        if let Some(key) = recycle_key {
            self.recycle_map.entry(key).or_default().push(id);
        }
        self.total_bytes += bytes;
        self.nonpurgeable.push_front(id);
        let reference = ResourceRef { id, handle, token };
        if self.total_bytes > self.max_bytes {
            self.purge_until_memory_to(backend, self.max_bytes, false);
        }
        reference
    }

    /// Most-recently-used purgeable resource with a matching recycle
    /// key, promoted back to non-purgeable. A second call without an
    /// intervening release finds nothing.
    pub fn find_recyclable(&mut self, recycle_key: &BytesKey) -> Option<ResourceRef> {
        self.process_unreferenced();
        let id = self
            .purgeable
            .iter()
            .copied()
            .find(|id| self.arena[*id].recycle_key.as_ref() == Some(recycle_key))?;
        tracing::trace!(?id, "recycled cached resource");
        Some(self.promote(id))
    }

    /// Content-addressable lookup. A keyed resource whose external refs
    /// are all gone is dropped from the identity index instead of being
    /// found, though it may still pool via its recycle key.
    pub fn get_resource(&mut self, unique_key: &UniqueKey) -> Option<ResourceRef> {
        let id = *self.unique_map.get(&unique_key.domain())?;
        if self.arena[id].external_refs() == 0 {
            self.unique_map.remove(&unique_key.domain());
            self.arena[id].unique_key = None;
            return None;
        }
        Some(self.promote(id))
    }

    pub fn has_resource(&mut self, unique_key: &UniqueKey) -> bool {
        self.get_resource(unique_key).is_some()
    }

    /// Index `resource` under `unique_key`; a previous holder of the
    /// key loses it
    pub fn assign_unique_key(&mut self, resource: &ResourceRef, unique_key: UniqueKey) {
        if let Some(prev) = self.unique_map.get(&unique_key.domain()).copied() {
            if prev != resource.id {
                self.arena[prev].unique_key = None;
            }
        }
        let entry = &mut self.arena[resource.id];
        if let Some(old) = entry.unique_key.take() {
            self.unique_map.remove(&old.domain());
        }
        entry.unique_key = Some(unique_key);
        self.unique_map.insert(unique_key.domain(), resource.id);
    }

    /// Changes the byte budget; lowering it purges purgeable resources
    /// LRU-first until the new limit is met or none remain
    pub fn set_cache_limit(&mut self, backend: &mut dyn GpuBackend, max_bytes: usize) {
        if self.max_bytes == max_bytes {
            return;
        }
        self.max_bytes = max_bytes;
        self.purge_until_memory_to(backend, max_bytes, false);
    }

    /// Purges purgeable resources not used since `since`, LRU-first
    pub fn purge_not_used_since(
        &mut self,
        backend: &mut dyn GpuBackend,
        since: Instant,
        recyclable_only: bool,
    ) {
        self.purge_by_lru(backend, recyclable_only, |entry, _| entry.last_used >= since);
    }

    /// Purges purgeable resources LRU-first until `total_bytes` drops
    /// to `bytes_limit`; returns whether the limit was reached. The
    /// cache legitimately stays over the limit while everything left is
    /// externally referenced.
    pub fn purge_until_memory_to(
        &mut self,
        backend: &mut dyn GpuBackend,
        bytes_limit: usize,
        recyclable_only: bool,
    ) -> bool {
        self.purge_by_lru(backend, recyclable_only, |_, projected_total| {
            projected_total <= bytes_limit
        });
        self.total_bytes <= bytes_limit
    }

    /// Empties the cache. `release_gpu` is false during context
    /// teardown where backend calls may already be invalid.
    pub fn release_all(&mut self, backend: &mut dyn GpuBackend, release_gpu: bool) {
        if release_gpu {
            for (_, entry) in self.arena.iter() {
                backend.release_resource(entry.handle);
            }
        }
        self.arena.clear();
        self.nonpurgeable.clear();
        self.purgeable.clear();
        self.recycle_map.clear();
        self.unique_map.clear();
        self.total_bytes = 0;
        self.purgeable_bytes = 0;
    }

    /// Moves resources whose external refs are all gone onto the
    /// purgeable list. Called at the start of every purge or recycle
    /// pass rather than on ref drop.
    pub fn process_unreferenced(&mut self) {
        let mut moved: Vec<ResourceId> = Vec::new();
        self.nonpurgeable.retain(|id| {
            if self.arena[*id].external_refs() == 0 {
                moved.push(*id);
                false
            } else {
                true
            }
        });
        for id in moved {
            let entry = &mut self.arena[id];
            debug_assert_eq!(entry.list, ListKind::NonPurgeable);
            entry.list = ListKind::Purgeable;
            entry.last_used = Instant::now();
            self.purgeable_bytes += entry.bytes;
            self.purgeable.push_front(id);
        }
    }

    fn promote(&mut self, id: ResourceId) -> ResourceRef {
        let entry = &mut self.arena[id];
        entry.last_used = Instant::now();
        match entry.list {
            ListKind::Purgeable => {
                entry.list = ListKind::NonPurgeable;
                self.purgeable_bytes -= entry.bytes;
                self.purgeable.retain(|other| *other != id);
                self.nonpurgeable.push_front(id);
            }
            ListKind::NonPurgeable => {
                // Refresh MRU position.
                self.nonpurgeable.retain(|other| *other != id);
                self.nonpurgeable.push_front(id);
            }
        }
        let entry = &self.arena[id];
        ResourceRef {
            id,
            handle: entry.handle,
            token: entry.token.clone(),
        }
    }

    fn purge_by_lru(
        &mut self,
        backend: &mut dyn GpuBackend,
        recyclable_only: bool,
        satisfied: impl Fn(&Entry, usize) -> bool,
    ) {
        self.process_unreferenced();
        let mut projected_total = self.total_bytes;
        let mut to_purge: Vec<ResourceId> = Vec::new();
        for id in self.purgeable.iter().rev().copied() {
            let entry = &self.arena[id];
            if satisfied(entry, projected_total) {
                break;
            }
            if recyclable_only && entry.recycle_key.is_none() {
                continue;
            }
            projected_total -= entry.bytes;
            to_purge.push(id);
        }
        for id in to_purge {
            let entry = &self.arena[id];
            debug_assert_eq!(entry.list, ListKind::Purgeable);
            self.purgeable_bytes -= entry.bytes;
            self.purgeable.retain(|other| *other != id);
            self.remove_resource(backend, id);
        }
    }

    fn remove_resource(&mut self, backend: &mut dyn GpuBackend, id: ResourceId) {
        let Some(entry) = self.arena.remove(id) else {
            debug_assert!(false, "purged resource missing from arena");
            return;
        };
        if let Some(key) = entry.unique_key {
            self.unique_map.remove(&key.domain());
        }
        if let Some(key) = &entry.recycle_key {
            if let Some(list) = self.recycle_map.get_mut(key) {
                list.retain(|other| *other != id);
                if list.is_empty() {
                    self.recycle_map.remove(key);
                }
            }
        }
        self.total_bytes -= entry.bytes;
        tracing::debug!(
            handle = ?entry.handle,
            descriptor = ?entry.descriptor,
            bytes = entry.bytes,
            "evicting GPU resource"
        );
        backend.release_resource(entry.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferDescriptor, BufferKind, RecordingBackend};

    fn buffer_desc(size: usize) -> ResourceDescriptor {
        ResourceDescriptor::Buffer(BufferDescriptor {
            kind: BufferKind::Vertex,
            size,
        })
    }

    fn add(
        cache: &mut ResourceCache,
        backend: &mut RecordingBackend,
        size: usize,
        recyclable: bool,
    ) -> ResourceRef {
        let desc = buffer_desc(size);
        let handle = backend.allocate_resource(&desc).unwrap();
        let key = recyclable.then(|| desc.recycle_key());
        cache.add_resource(backend, handle, desc, key)
    }

    #[test]
    fn recycle_after_release_returns_same_resource() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let desc = buffer_desc(1024);
        let first = add(&mut cache, &mut backend, 1024, true);
        let first_handle = first.handle();
        drop(first);

        let found = cache.find_recyclable(&desc.recycle_key()).unwrap();
        assert_eq!(found.handle(), first_handle);

        // Still referenced by `found`, so a second lookup finds nothing.
        assert!(cache.find_recyclable(&desc.recycle_key()).is_none());
    }

    #[test]
    fn zero_limit_purges_only_purgeable() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let kept = add(&mut cache, &mut backend, 1000, true);
        let dropped = add(&mut cache, &mut backend, 3000, true);
        drop(dropped);

        cache.set_cache_limit(&mut backend, 0);
        assert_eq!(cache.total_bytes(), 1000);
        assert_eq!(cache.purgeable_bytes(), 0);
        assert!(!cache.is_empty());
        drop(kept);
    }

    #[test]
    fn unique_key_lookup_requires_external_refs() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let key = UniqueKey::next();
        let resource = add(&mut cache, &mut backend, 512, true);
        cache.assign_unique_key(&resource, key);

        assert!(cache.has_resource(&key));
        drop(resource);
        // All external refs gone: the identity index drops the entry.
        assert!(cache.get_resource(&key).is_none());
        // But the shape-based pool can still reclaim it.
        assert!(cache.find_recyclable(&buffer_desc(512).recycle_key()).is_some());
    }

    #[test]
    fn unique_key_reassignment_steals_from_previous_holder() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let key = UniqueKey::next();
        let old = add(&mut cache, &mut backend, 100, false);
        let new = add(&mut cache, &mut backend, 100, false);
        cache.assign_unique_key(&old, key);
        cache.assign_unique_key(&new, key);

        let found = cache.get_resource(&key).unwrap();
        assert_eq!(found.handle(), new.handle());
    }

    #[test]
    fn lru_eviction_order_is_oldest_first() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let a = add(&mut cache, &mut backend, 100, true);
        let b = add(&mut cache, &mut backend, 200, true);
        let a_handle = a.handle();
        drop(a);
        cache.process_unreferenced();
        drop(b);
        cache.process_unreferenced();

        // a became purgeable first, so it goes first.
        cache.purge_until_memory_to(&mut backend, 200, false);
        assert_eq!(cache.total_bytes(), 200);
        assert!(backend
            .events
            .iter()
            .any(|e| matches!(e, crate::backend::BackendEvent::ReleaseResource(h) if *h == a_handle)));
    }

    #[test]
    fn recyclable_only_purge_skips_plain_resources() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let plain = add(&mut cache, &mut backend, 100, false);
        let pooled = add(&mut cache, &mut backend, 100, true);
        drop(plain);
        drop(pooled);

        cache.purge_until_memory_to(&mut backend, 0, true);
        // The non-recyclable purgeable resource is left alone.
        assert_eq!(cache.total_bytes(), 100);
        assert_eq!(cache.purgeable_bytes(), 100);
    }

    #[test]
    fn over_budget_add_triggers_immediate_eviction() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions { max_bytes: 4096 });
        let scratch = add(&mut cache, &mut backend, 4096, true);
        drop(scratch);
        // Adding past the budget purges the idle scratch buffer.
        let _live = add(&mut cache, &mut backend, 4096, true);
        assert_eq!(cache.total_bytes(), 4096);
    }

    #[test]
    fn release_all_without_gpu_calls_skips_backend() {
        let mut backend = RecordingBackend::new();
        let mut cache = ResourceCache::new(ResourceCacheOptions::default());
        let _r = add(&mut cache, &mut backend, 64, true);
        let before = backend.events.len();
        cache.release_all(&mut backend, false);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(backend.events.len(), before);
    }
}
