//! GPU texture cache with budget-driven eviction
//!
//! Tracks every live [`TextureHandle`](crate::TextureHandle), the running total
//! of bytes they hold on the GPU, and a soft byte ceiling. When an allocation
//! pushes the total over the ceiling, the coldest textures (lowest "last used"
//! stamp) are freed first. When the GPU itself refuses an allocation the
//! ceiling is halved, textures are evicted, and the allocation is retried.
//!
//! The cache lives on the render thread alongside its GPU context; state is
//! kept behind `Rc`/`RefCell`.

use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, warn};

use crate::backend::{AllocationError, TextureBackend, TextureId};
use crate::config::CacheConfig;

/// Key of a handle's slot in the cache registry
pub(crate) type SlotKey = u64;

/// Residency record for one handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) texture: Option<TextureId>,
    pub(crate) bytes: usize,
    pub(crate) last_used: u64,
}

/// Statistics about texture cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCacheStats {
    /// Number of live handles (allocated or not)
    pub handle_count: usize,

    /// Number of handles currently holding a GPU texture
    pub texture_count: usize,

    /// Bytes held by allocated textures
    pub bytes_allocated: usize,

    /// Current soft ceiling (bytes)
    pub ceiling: usize,

    /// Ceiling below which the budget never shrinks (bytes)
    pub floor: usize,

    /// Successful GPU allocations
    pub allocations: u64,

    /// GPU allocations refused by the backend
    pub allocation_failures: u64,

    /// Number of eviction passes run
    pub eviction_passes: u64,

    /// Number of textures freed by eviction
    pub evictions: u64,
}

impl TextureCacheStats {
    /// Fraction of the ceiling currently in use (may exceed 1.0)
    pub fn utilization(&self) -> f64 {
        if self.ceiling == 0 {
            0.0
        } else {
            self.bytes_allocated as f64 / self.ceiling as f64
        }
    }
}

/// Internal cache state
struct CacheState {
    /// Registered handles, keyed in creation order
    slots: BTreeMap<SlotKey, Slot>,

    next_key: SlotKey,

    /// Logical clock for "last used" stamps
    clock: u64,

    bytes_allocated: usize,

    ceiling: usize,

    /// Ceiling restored by `reset_ceiling`
    initial_ceiling: usize,

    floor: usize,

    allocations: u64,
    allocation_failures: u64,
    eviction_passes: u64,
    evictions: u64,
}

impl CacheState {
    fn new(ceiling: usize, floor: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            next_key: 1,
            clock: 0,
            bytes_allocated: 0,
            ceiling,
            initial_ceiling: ceiling,
            floor,
            allocations: 0,
            allocation_failures: 0,
            eviction_passes: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Reset a slot to unallocated, returning the texture it held
    fn release_slot(&mut self, key: SlotKey) -> Option<TextureId> {
        let slot = self.slots.get_mut(&key)?;
        let texture = slot.texture.take()?;
        self.bytes_allocated = self.bytes_allocated.saturating_sub(slot.bytes);
        slot.bytes = 0;
        slot.last_used = 0;
        Some(texture)
    }

    /// Keys of the textures that fall past the ceiling when resident textures
    /// are walked from most to least recently used
    fn eviction_victims(&self) -> Vec<SlotKey> {
        let mut resident: Vec<(SlotKey, u64, usize)> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.texture.is_some())
            .map(|(key, slot)| (*key, slot.last_used, slot.bytes))
            .collect();
        resident.sort_by(|a, b| b.1.cmp(&a.1));

        let mut accumulated = 0usize;
        resident
            .into_iter()
            .filter_map(|(key, _, bytes)| {
                accumulated = accumulated.saturating_add(bytes);
                (accumulated > self.ceiling).then_some(key)
            })
            .collect()
    }

    fn stats(&self) -> TextureCacheStats {
        TextureCacheStats {
            handle_count: self.slots.len(),
            texture_count: self.slots.values().filter(|s| s.texture.is_some()).count(),
            bytes_allocated: self.bytes_allocated,
            ceiling: self.ceiling,
            floor: self.floor,
            allocations: self.allocations,
            allocation_failures: self.allocation_failures,
            eviction_passes: self.eviction_passes,
            evictions: self.evictions,
        }
    }
}

struct CacheInner<B> {
    state: RefCell<CacheState>,
    backend: RefCell<B>,
}

/// Process-wide texture budget keeper
///
/// Cloning a `TextureCache` yields another reference to the same cache; one
/// instance is created per GPU context and injected into every tile and
/// handle that uses it.
///
/// # Example
///
/// ```
/// use rasterview_cache::{AllocationError, TextureBackend, TextureCache, TextureHandle, TextureId};
///
/// #[derive(Default)]
/// struct Device { next: u32 }
///
/// impl TextureBackend for Device {
///     fn create_texture(&mut self, _bytes: usize) -> Result<TextureId, AllocationError> {
///         self.next += 1;
///         Ok(TextureId::new(self.next).unwrap())
///     }
///     fn delete_texture(&mut self, _id: TextureId) {}
///     fn bind_texture(&mut self, _id: TextureId) {}
/// }
///
/// let cache = TextureCache::with_ceiling(Device::default(), 1_000_000);
/// let handle = TextureHandle::new(&cache);
/// assert!(handle.allocate(400_000));
/// assert_eq!(cache.bytes_allocated(), 400_000);
/// ```
pub struct TextureCache<B: TextureBackend> {
    inner: Rc<CacheInner<B>>,
}

impl<B: TextureBackend> Clone for TextureCache<B> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<B: TextureBackend> TextureCache<B> {
    /// Create a cache using the budget and floor from `config`
    pub fn new(backend: B, config: &CacheConfig) -> Self {
        Self::with_limits(backend, config.texture_budget, config.texture_floor)
    }

    /// Create a cache with the given ceiling and the default floor
    pub fn with_ceiling(backend: B, ceiling: usize) -> Self {
        Self::with_limits(backend, ceiling, CacheConfig::DEFAULT_TEXTURE_FLOOR)
    }

    /// Create a cache with an explicit ceiling and floor
    ///
    /// # Arguments
    ///
    /// * `backend` - Device the textures are created on
    /// * `ceiling` - Soft budget in bytes; eviction keeps the resident total at or below it
    /// * `floor` - Lowest value the ceiling may shrink to under device pressure
    pub fn with_limits(backend: B, ceiling: usize, floor: usize) -> Self {
        Self {
            inner: Rc::new(CacheInner {
                state: RefCell::new(CacheState::new(ceiling, floor)),
                backend: RefCell::new(backend),
            }),
        }
    }

    /// Run `f` with exclusive access to the backend
    ///
    /// Handles must not be allocated, freed or dropped from inside `f`; those
    /// operations need the backend themselves.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        let mut backend = self.inner.backend.borrow_mut();
        f(&mut *backend)
    }

    /// Whether `other` refers to the same cache
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> RefMut<'_, CacheState> {
        self.inner.state.borrow_mut()
    }

    pub(crate) fn register(&self) -> SlotKey {
        let mut state = self.state();
        let key = state.next_key;
        state.next_key += 1;
        state.slots.insert(key, Slot::default());
        key
    }

    pub(crate) fn unregister(&self, key: SlotKey) {
        let texture = {
            let mut state = self.state();
            let texture = state.release_slot(key);
            state.slots.remove(&key);
            texture
        };
        if let Some(id) = texture {
            self.inner.backend.borrow_mut().delete_texture(id);
        }
    }

    pub(crate) fn slot(&self, key: SlotKey) -> Slot {
        self.inner.state.borrow().slots.get(&key).copied().unwrap_or_default()
    }

    /// Allocate `bytes` of texture storage for the slot, freeing what it held
    ///
    /// Returns whether the slot ended up allocated. A refused allocation halves
    /// the ceiling, evicts and retries until the ceiling would drop below the
    /// floor.
    pub(crate) fn allocate(&self, key: SlotKey, bytes: usize) -> bool {
        self.free(key);
        if bytes == 0 {
            return false;
        }

        loop {
            let result = self.inner.backend.borrow_mut().create_texture(bytes);
            match result {
                Ok(id) => {
                    let over_budget = {
                        let mut state = self.state();
                        let stamp = state.tick();
                        let Some(slot) = state.slots.get_mut(&key) else {
                            drop(state);
                            self.inner.backend.borrow_mut().delete_texture(id);
                            return false;
                        };
                        slot.texture = Some(id);
                        slot.bytes = bytes;
                        slot.last_used = stamp;
                        state.bytes_allocated += bytes;
                        state.allocations += 1;
                        debug!(
                            "allocated {} ({} bytes, stamp {}), {} / {} bytes resident",
                            id, bytes, stamp, state.bytes_allocated, state.ceiling
                        );
                        state.bytes_allocated > state.ceiling
                    };
                    if over_budget {
                        self.evict_if_over_budget();
                    }
                    return self.slot(key).texture.is_some();
                }
                Err(AllocationError::OutOfMemory { .. }) => {
                    {
                        let mut state = self.state();
                        state.allocation_failures += 1;
                        let halved = state.ceiling / 2;
                        if halved < state.floor {
                            warn!(
                                "texture allocation of {} bytes failed with ceiling at {} bytes; \
                                 floor of {} bytes reached",
                                bytes, state.ceiling, state.floor
                            );
                            return false;
                        }
                        debug!(
                            "texture allocation of {} bytes failed, ceiling {} -> {} bytes",
                            bytes, state.ceiling, halved
                        );
                        state.ceiling = halved;
                    }
                    self.evict_if_over_budget();
                }
                Err(err) => {
                    self.state().allocation_failures += 1;
                    warn!("texture allocation rejected: {}", err);
                    return false;
                }
            }
        }
    }

    pub(crate) fn free(&self, key: SlotKey) {
        let texture = self.state().release_slot(key);
        if let Some(id) = texture {
            self.inner.backend.borrow_mut().delete_texture(id);
        }
    }

    pub(crate) fn bind(&self, key: SlotKey) {
        let texture = {
            let mut state = self.state();
            let texture = state.slots.get(&key).and_then(|slot| slot.texture);
            if texture.is_some() {
                let stamp = state.tick();
                if let Some(slot) = state.slots.get_mut(&key) {
                    slot.last_used = stamp;
                }
            }
            texture
        };
        if let Some(id) = texture {
            self.inner.backend.borrow_mut().bind_texture(id);
        }
    }

    /// Free the coldest textures until the resident total fits the ceiling
    ///
    /// Resident textures are ordered by "last used" stamp, most recent first;
    /// every texture from the point where the running sum exceeds the ceiling
    /// onward is freed.
    ///
    /// # Returns
    ///
    /// The number of textures freed.
    pub fn evict_if_over_budget(&self) -> usize {
        let victims: Vec<TextureId> = {
            let mut state = self.state();
            state.eviction_passes += 1;
            let keys = state.eviction_victims();
            let victims: Vec<TextureId> =
                keys.into_iter().filter_map(|key| state.release_slot(key)).collect();
            state.evictions += victims.len() as u64;
            if !victims.is_empty() {
                debug!(
                    "evicted {} textures, {} / {} bytes resident",
                    victims.len(),
                    state.bytes_allocated,
                    state.ceiling
                );
            }
            victims
        };

        let mut backend = self.inner.backend.borrow_mut();
        for id in &victims {
            backend.delete_texture(*id);
        }
        victims.len()
    }

    /// Free every tracked texture; handles stay registered but unallocated
    pub fn clear(&self) {
        let victims: Vec<TextureId> = {
            let mut state = self.state();
            let keys: Vec<SlotKey> = state.slots.keys().copied().collect();
            keys.into_iter().filter_map(|key| state.release_slot(key)).collect()
        };
        let mut backend = self.inner.backend.borrow_mut();
        for id in victims {
            backend.delete_texture(id);
        }
    }

    /// Current soft ceiling in bytes
    pub fn ceiling(&self) -> usize {
        self.inner.state.borrow().ceiling
    }

    /// Replace the ceiling and evict down to it
    ///
    /// Values below the floor are raised to the floor.
    pub fn set_ceiling(&self, ceiling: usize) {
        {
            let mut state = self.state();
            state.ceiling = ceiling.max(state.floor);
        }
        self.evict_if_over_budget();
    }

    /// Restore the ceiling the cache was created with
    pub fn reset_ceiling(&self) {
        let mut state = self.state();
        state.ceiling = state.initial_ceiling;
    }

    /// Ceiling below which the budget never shrinks (bytes)
    pub fn floor(&self) -> usize {
        self.inner.state.borrow().floor
    }

    /// Bytes held by allocated textures
    pub fn bytes_allocated(&self) -> usize {
        self.inner.state.borrow().bytes_allocated
    }

    /// Number of handles currently holding a texture
    pub fn texture_count(&self) -> usize {
        self.inner.state.borrow().slots.values().filter(|s| s.texture.is_some()).count()
    }

    /// Number of live handles
    pub fn handle_count(&self) -> usize {
        self.inner.state.borrow().slots.len()
    }

    /// Current value of the logical "last used" clock
    pub fn clock(&self) -> u64 {
        self.inner.state.borrow().clock
    }

    /// Get current cache statistics
    pub fn stats(&self) -> TextureCacheStats {
        self.inner.state.borrow().stats()
    }
}
