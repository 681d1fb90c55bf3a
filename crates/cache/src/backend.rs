//! GPU texture backend abstraction
//!
//! The cache never talks to a graphics API directly. Everything it needs from
//! the GPU (creating texture storage, deleting it, binding it) goes through
//! [`TextureBackend`], so the same accounting runs against OpenGL, a headless
//! backend, or a test double.

use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

/// Identifier of a texture object owned by a [`TextureBackend`]
///
/// Backends reserve `0` for "no texture", so an unallocated handle is
/// represented as `Option<TextureId>::None` rather than a zero id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(NonZeroU32);

impl TextureId {
    /// Wrap a raw backend id, returning `None` for the reserved id `0`
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// The raw backend id
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Reasons a backend may refuse to create texture storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// The device has no room for the texture. Recoverable: the cache shrinks
    /// its budget, evicts, and retries.
    #[error("out of texture memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The request can never succeed (zero bytes, or larger than the device
    /// limits)
    #[error("invalid texture allocation of {requested} bytes")]
    InvalidSize { requested: usize },
}

/// Texture storage operations required by [`TextureCache`](crate::TextureCache)
pub trait TextureBackend {
    /// Create texture storage of `bytes` bytes
    fn create_texture(&mut self, bytes: usize) -> Result<TextureId, AllocationError>;

    /// Release a texture created by [`create_texture`](Self::create_texture)
    fn delete_texture(&mut self, id: TextureId);

    /// Make `id` the currently bound texture
    fn bind_texture(&mut self, id: TextureId);
}

impl<B: TextureBackend + ?Sized> TextureBackend for Box<B> {
    fn create_texture(&mut self, bytes: usize) -> Result<TextureId, AllocationError> {
        (**self).create_texture(bytes)
    }

    fn delete_texture(&mut self, id: TextureId) {
        (**self).delete_texture(id)
    }

    fn bind_texture(&mut self, id: TextureId) {
        (**self).bind_texture(id)
    }
}
