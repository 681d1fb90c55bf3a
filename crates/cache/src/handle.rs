//! Reference-counted texture handles
//!
//! A [`TextureHandle`] owns at most one GPU texture and the byte accounting
//! that goes with it. Clones share the same texture; the texture is released
//! and the handle unregistered from its cache when the last clone is dropped.

use std::fmt;
use std::rc::Rc;

use crate::backend::{TextureBackend, TextureId};
use crate::gpu::{SlotKey, TextureCache};

struct HandleInner<B: TextureBackend> {
    cache: TextureCache<B>,
    key: SlotKey,
}

impl<B: TextureBackend> Drop for HandleInner<B> {
    fn drop(&mut self) {
        self.cache.unregister(self.key);
    }
}

/// Shared handle to one (possibly unallocated) GPU texture
pub struct TextureHandle<B: TextureBackend> {
    inner: Rc<HandleInner<B>>,
}

impl<B: TextureBackend> TextureHandle<B> {
    /// Create an unallocated handle tracked by `cache`
    pub fn new(cache: &TextureCache<B>) -> Self {
        let key = cache.register();
        Self { inner: Rc::new(HandleInner { cache: cache.clone(), key }) }
    }

    /// Allocate `bytes` of texture storage, freeing any texture held before
    ///
    /// GPU refusal is absorbed by the cache (shrink, evict, retry).
    ///
    /// # Arguments
    ///
    /// * `bytes` - Size accounted against the cache budget; must be non-zero
    ///
    /// # Returns
    ///
    /// - `true` - the handle holds a fresh texture
    /// - `false` - the handle is left unallocated, which callers treat as
    ///   "texture not ready"
    pub fn allocate(&self, bytes: usize) -> bool {
        self.inner.cache.allocate(self.inner.key, bytes)
    }

    /// Release the texture, if any. Calling this repeatedly is harmless.
    pub fn free(&self) {
        self.inner.cache.free(self.inner.key);
    }

    /// Mark the texture as just used and bind it; no-op when unallocated
    pub fn bind(&self) {
        self.inner.cache.bind(self.inner.key);
    }

    /// Whether the handle currently holds a texture
    pub fn is_allocated(&self) -> bool {
        self.texture_id().is_some()
    }

    /// The held texture, or `None` when unallocated
    pub fn texture_id(&self) -> Option<TextureId> {
        self.inner.cache.slot(self.inner.key).texture
    }

    /// Bytes accounted to this handle (0 when unallocated)
    pub fn byte_size(&self) -> usize {
        self.inner.cache.slot(self.inner.key).bytes
    }

    /// Logical "last used" stamp (0 when unallocated)
    pub fn last_used(&self) -> u64 {
        self.inner.cache.slot(self.inner.key).last_used
    }

    /// Number of clones sharing this texture
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Whether both handles share the same texture
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The cache this handle is accounted in
    pub fn cache(&self) -> &TextureCache<B> {
        &self.inner.cache
    }
}

impl<B: TextureBackend> Clone for TextureHandle<B> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<B: TextureBackend> fmt::Debug for TextureHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.cache.slot(self.inner.key);
        f.debug_struct("TextureHandle")
            .field("texture", &slot.texture)
            .field("bytes", &slot.bytes)
            .field("last_used", &slot.last_used)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
