//! Raster View Cache Library
//!
//! GPU texture residency for tiled raster display: reference-counted texture
//! handles, a byte budget shared by every on-screen tile, and eviction of the
//! least recently used textures when the budget is exceeded.

pub mod backend;
pub mod config;
pub mod gpu;
pub mod handle;

pub use backend::{AllocationError, TextureBackend, TextureId};
pub use config::{CacheConfig, ConfigError};
pub use gpu::{TextureCache, TextureCacheStats};
pub use handle::TextureHandle;
