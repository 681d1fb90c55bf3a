//! Raster View Render Library
//!
//! Tiled raster display: fixed-size tiles with up to four power-of-two
//! texture levels, level selection from the on-screen pixel density,
//! synthesis of coarse levels from resident fine ones, optional GPU filter
//! chains, and the tiled image that partitions a raster and drives updates.

pub mod filter;
pub mod geometry;
pub mod gpu;
pub mod image;
pub mod tile;

pub use filter::{
    FilterChain, FilterDescriptor, FilterKernel, FilterKind, FilterPass, FilterableTile,
    ImageFilter, PixelKernel, DEFAULT_INITIALIZATION_ITERATIONS,
};
pub use geometry::{Extent, PixelFormat, PixelRect, Point, Projection, TextureFilter, ViewTransform};
pub use gpu::{
    ContextGuard, ContextId, ContextSwitch, GpuBackend, HeadlessGpu, TexturedQuad, UploadError,
};
pub use image::{ImageLayout, LayoutError, RasterImage, RasterSource, TileUpdate, TiledImage};
pub use tile::{decimate, reduction_factor, Tile, TileSurface, LEVEL_COUNT, TILE_SIZE};

pub use rasterview_cache::{CacheConfig, TextureCache, TextureHandle, TextureId};
