//! Tiled raster images
//!
//! [`TiledImage`] partitions a raster into fixed-size tiles, works out which
//! tiles a view needs and at what level, fills missing levels (synthesis
//! first, source extraction otherwise) and draws the result.
//!
//! Extraction of source pixels runs on the rayon pool in batches of one tile
//! per worker; everything that touches the GPU stays on the calling (render)
//! thread.

use log::{debug, trace};
use rasterview_cache::{CacheConfig, TextureCache};
use rayon::prelude::*;
use thiserror::Error;

use crate::filter::{FilterDescriptor, FilterKernel, FilterableTile};
use crate::geometry::{Extent, PixelFormat, PixelRect, Point, Projection, TextureFilter};
use crate::gpu::{ContextGuard, ContextId, GpuBackend};
use crate::tile::{reduction_factor, Tile, TileSurface, TILE_SIZE};

/// Errors from setting up or feeding a tiled image
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("image size {width}x{height} is empty")]
    EmptyImage { width: u32, height: u32 },

    #[error("tile size {width}x{height} is empty")]
    EmptyTile { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("source is {actual:?}, image is {expected:?}")]
    SourceSize { expected: Extent, actual: Extent },

    #[error("source format {actual:?} does not match image format {expected:?}")]
    SourceFormat { expected: PixelFormat, actual: PixelFormat },
}

/// How an image is cut into tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub image_size: Extent,
    pub tile_size: Extent,
    pub format: PixelFormat,
    pub alpha: u8,
}

impl ImageLayout {
    /// Layout with 512x512 tiles and full opacity
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            image_size: Extent::new(width, height),
            tile_size: Extent::new(TILE_SIZE, TILE_SIZE),
            format,
            alpha: 255,
        }
    }

    /// Layout using the tile size from `config`
    pub fn from_config(width: u32, height: u32, format: PixelFormat, config: &CacheConfig) -> Self {
        Self::new(width, height, format).with_tile_size(config.tile_width, config.tile_height)
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_size = Extent::new(width, height);
        self
    }

    pub fn with_alpha(mut self, alpha: u8) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.image_size.is_empty() {
            return Err(LayoutError::EmptyImage {
                width: self.image_size.width,
                height: self.image_size.height,
            });
        }
        if self.tile_size.is_empty() {
            return Err(LayoutError::EmptyTile {
                width: self.tile_size.width,
                height: self.tile_size.height,
            });
        }
        Ok(())
    }

    /// Number of tile columns
    pub fn columns(&self) -> u32 {
        self.image_size.width.div_ceil(self.tile_size.width.max(1))
    }

    /// Number of tile rows
    pub fn rows(&self) -> u32 {
        self.image_size.height.div_ceil(self.tile_size.height.max(1))
    }

    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    /// Image pixel at which the tile at (`column`, `row`) starts
    pub fn tile_origin(&self, column: u32, row: u32) -> (u32, u32) {
        (column * self.tile_size.width, row * self.tile_size.height)
    }

    /// Part of the tile at (`column`, `row`) covered by image data
    ///
    /// Interior tiles are full; the last column and row get the remainder.
    pub fn tile_geometry(&self, column: u32, row: u32) -> Extent {
        let (x, y) = self.tile_origin(column, row);
        Extent::new(
            self.tile_size.width.min(self.image_size.width - x),
            self.tile_size.height.min(self.image_size.height - y),
        )
    }

    /// Whether an image needs alpha blending to draw
    pub fn needs_blending(&self) -> bool {
        self.format.has_alpha() || self.alpha != 255
    }
}

/// Row-addressable source pixels
///
/// Rows are read from worker threads during extraction.
pub trait RasterSource: Sync {
    fn extent(&self) -> Extent;

    fn format(&self) -> PixelFormat;

    /// Pixel row `y`, `width * channels` bytes
    fn row(&self, y: u32) -> &[u8];
}

/// A raster held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    extent: Extent,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl RasterImage {
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Result<Self, LayoutError> {
        let extent = Extent::new(width, height);
        let expected = extent.area() * format.channels();
        if pixels.len() != expected {
            return Err(LayoutError::DataLength { expected, actual: pixels.len() });
        }
        Ok(Self { extent, format, pixels })
    }

    /// Raster whose pixels are produced by `pixel(x, y)`
    pub fn from_fn(
        width: u32,
        height: u32,
        format: PixelFormat,
        mut pixel: impl FnMut(u32, u32) -> Vec<u8>,
    ) -> Result<Self, LayoutError> {
        let mut pixels = Vec::with_capacity(Extent::new(width, height).area() * format.channels());
        for y in 0..height {
            for x in 0..width {
                pixels.extend(pixel(x, y).into_iter().take(format.channels()));
            }
        }
        Self::new(width, height, format, pixels)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl RasterSource for RasterImage {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn row(&self, y: u32) -> &[u8] {
        let row_bytes = self.extent.width as usize * self.format.channels();
        let start = y as usize * row_bytes;
        &self.pixels[start..start + row_bytes]
    }
}

/// A tile that needs a texture level filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileUpdate {
    /// Index into [`TiledImage::tiles`]
    pub tile: usize,
    pub level: usize,
}

/// A raster displayed as a grid of tiles
pub struct TiledImage<T: TileSurface> {
    cache: TextureCache<T::Backend>,
    layout: ImageLayout,
    tiles: Vec<T>,
    context: Option<ContextId>,
    /// Image point the last frame was centred on
    draw_center: Point,
}

impl<G: GpuBackend> TiledImage<Tile<G>> {
    /// Image made of plain tiles
    pub fn with_plain_tiles(cache: &TextureCache<G>, layout: ImageLayout) -> Result<Self, LayoutError> {
        Self::new(cache, layout, Tile::new)
    }
}

impl<T: TileSurface> TiledImage<T> {
    /// Build an image and its tiles; `make_tile` creates each unconfigured tile
    pub fn new(
        cache: &TextureCache<T::Backend>,
        layout: ImageLayout,
        make_tile: impl FnMut(&TextureCache<T::Backend>) -> T,
    ) -> Result<Self, LayoutError> {
        let mut image = Self {
            cache: cache.clone(),
            layout,
            tiles: Vec::new(),
            context: None,
            draw_center: Point::default(),
        };
        image.create_tiles(layout, make_tile)?;
        Ok(image)
    }

    /// Replace all tiles with a fresh partition of `layout`, row-major
    pub fn create_tiles(
        &mut self,
        layout: ImageLayout,
        mut make_tile: impl FnMut(&TextureCache<T::Backend>) -> T,
    ) -> Result<(), LayoutError> {
        layout.validate()?;

        self.tiles.clear();
        self.tiles.reserve(layout.tile_count());
        for row in 0..layout.rows() {
            for column in 0..layout.columns() {
                let (x, y) = layout.tile_origin(column, row);
                let mut tile = make_tile(&self.cache);
                tile.configure(
                    layout.format,
                    layout.tile_size,
                    layout.tile_geometry(column, row),
                    Point::new(x as f64, y as f64),
                    layout.alpha,
                );
                self.tiles.push(tile);
            }
        }
        self.layout = layout;
        self.draw_center = Point::new(
            layout.image_size.width as f64 / 2.0,
            layout.image_size.height as f64 / 2.0,
        );

        debug!(
            "created {}x{} tiles for a {}x{} image",
            layout.columns(),
            layout.rows(),
            layout.image_size.width,
            layout.image_size.height
        );
        Ok(())
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn cache(&self) -> &TextureCache<T::Backend> {
        &self.cache
    }

    pub fn tiles(&self) -> &[T] {
        &self.tiles
    }

    pub fn tiles_mut(&mut self) -> &mut [T] {
        &mut self.tiles
    }

    /// Make `context` current while updating and drawing
    pub fn set_context(&mut self, context: Option<ContextId>) {
        self.context = context;
    }

    /// Centre of the last drawn view, in image pixels
    ///
    /// Starts at the image centre; [`select_nearby_tile`](Self::select_nearby_tile)
    /// measures distances from here.
    pub fn draw_center(&self) -> Point {
        self.draw_center
    }

    pub fn set_draw_center(&mut self, center: Point) {
        self.draw_center = center;
    }

    /// Indices of the tiles intersecting `visible` (image pixels, inclusive)
    pub fn tiles_to_draw(&self, visible: PixelRect) -> Vec<usize> {
        self.tiles_intersecting(visible)
    }

    /// Indices of the tiles a read of `rect` (image pixels, inclusive) touches
    pub fn tiles_to_read(&self, rect: PixelRect) -> Vec<usize> {
        self.tiles_intersecting(rect)
    }

    fn tiles_intersecting(&self, rect: PixelRect) -> Vec<usize> {
        let rect = rect.intersect(&PixelRect::covering(self.layout.image_size));
        if rect.is_empty() {
            return Vec::new();
        }

        let tile_w = self.layout.tile_size.width as i64;
        let tile_h = self.layout.tile_size.height as i64;
        let columns = self.layout.columns() as usize;

        let mut indices = Vec::new();
        for row in rect.top / tile_h..=rect.bottom / tile_h {
            for column in rect.left / tile_w..=rect.right / tile_w {
                indices.push(row as usize * columns + column as usize);
            }
        }
        indices
    }

    /// Image pixels covered by tile `index`
    fn tile_rect(&self, index: usize) -> PixelRect {
        let columns = self.layout.columns().max(1) as usize;
        let column = (index % columns) as u32;
        let row = (index / columns) as u32;
        let (x, y) = self.layout.tile_origin(column, row);
        let geometry = self.layout.tile_geometry(column, row);
        PixelRect::new(
            x as i64,
            y as i64,
            x as i64 + geometry.width as i64 - 1,
            y as i64 + geometry.height as i64 - 1,
        )
    }

    /// Tiles among `indices` whose level for `projection` is not resident
    pub fn tiles_to_update(&self, indices: &[usize], projection: &dyn Projection) -> Vec<TileUpdate> {
        indices
            .iter()
            .filter_map(|&tile| {
                let surface = self.tiles.get(tile)?;
                let level = surface.texture_index(projection);
                (!surface.is_texture_ready(level)).then_some(TileUpdate { tile, level })
            })
            .collect()
    }

    /// Fill the requested texture levels
    ///
    /// Levels that can be synthesized from a resident finer level are. The
    /// rest are cut out of `source` in batches of one tile per rayon worker,
    /// each batch uploaded before the next is extracted. A level that does
    /// not fit in the cache stays missing.
    ///
    /// # Arguments
    ///
    /// * `source` - Raster matching the image size and format
    /// * `updates` - Tile levels to fill, usually from [`tiles_to_update`](Self::tiles_to_update)
    ///
    /// # Returns
    ///
    /// How many of `updates` are resident once every upload is done. Levels
    /// evicted by later uploads of the same call are not counted.
    pub fn update_tiles<S>(&mut self, source: &S, updates: &[TileUpdate]) -> Result<usize, LayoutError>
    where
        S: RasterSource + ?Sized,
    {
        self.check_source(source)?;

        let mut pending = Vec::new();
        for update in updates {
            let Some(tile) = self.tiles.get_mut(update.tile) else {
                continue;
            };
            if !tile.compute_texture(update.level) {
                pending.push(*update);
            }
        }

        let layout = self.layout;
        let batch = rayon::current_num_threads().max(1);
        for chunk in pending.chunks(batch) {
            let extracted: Vec<Vec<u8>> = chunk
                .par_iter()
                .map(|update| extract_tile(source, &layout, update.tile, update.level))
                .collect();

            for (update, pixels) in chunk.iter().zip(extracted) {
                self.tiles[update.tile].setup_texture(update.level, &pixels);
            }
        }

        let ready = updates
            .iter()
            .filter(|update| self.tiles.get(update.tile).is_some_and(|tile| tile.is_texture_ready(update.level)))
            .count();
        trace!("{} of {} tile levels ready", ready, updates.len());
        Ok(ready)
    }

    /// Tile without full resolution closest to the draw centre
    ///
    /// Distance is measured between tile centres and the draw centre in the
    /// Manhattan metric; the lowest index wins ties.
    ///
    /// # Returns
    ///
    /// - `Some(index)` - the tile to load next
    /// - `None` - every tile already holds level 0
    pub fn select_nearby_tile(&self) -> Option<usize> {
        let half_w = self.layout.tile_size.width as f64 / 2.0;
        let half_h = self.layout.tile_size.height as f64 / 2.0;
        let center = self.draw_center;

        let mut nearest: Option<(usize, f64)> = None;
        for (index, tile) in self.tiles.iter().enumerate() {
            if tile.is_texture_ready(0) {
                continue;
            }
            let pos = tile.pos();
            let distance = (pos.x + half_w - center.x).abs() + (pos.y + half_h - center.y).abs();
            if nearest.map_or(true, |(_, best)| distance < best) {
                nearest = Some((index, distance));
            }
        }
        nearest.map(|(index, _)| index)
    }

    /// Load full resolution for the tile nearest the draw centre
    ///
    /// Meant to be called while idle so panning finds tiles ready.
    ///
    /// # Returns
    ///
    /// `true` when a tile was selected and now holds level 0; `false` when
    /// every tile is already loaded or the selected one did not fit.
    pub fn generate_full_res_texture<S>(&mut self, source: &S) -> Result<bool, LayoutError>
    where
        S: RasterSource + ?Sized,
    {
        self.check_source(source)?;
        let Some(tile) = self.select_nearby_tile() else {
            return Ok(false);
        };
        trace!("prefetching full resolution for tile {}", tile);
        let ready = self.update_tiles(source, &[TileUpdate { tile, level: 0 }])?;
        Ok(ready == 1)
    }

    /// Load full resolution for every tile, e.g. before export
    ///
    /// # Returns
    ///
    /// How many of the missing tiles are resident afterwards; fewer than
    /// requested when the budget cannot hold them all.
    pub fn generate_all_full_res_textures<S>(&mut self, source: &S) -> Result<usize, LayoutError>
    where
        S: RasterSource + ?Sized,
    {
        let updates: Vec<TileUpdate> = (0..self.tiles.len())
            .filter(|&tile| !self.tiles[tile].is_texture_ready(0))
            .map(|tile| TileUpdate { tile, level: 0 })
            .collect();
        self.update_tiles(source, &updates)
    }

    /// Update and draw the tiles visible in `visible`
    ///
    /// Makes the image's context current for the duration, if one is set,
    /// and records the centre of `visible` as the draw centre.
    ///
    /// # Arguments
    ///
    /// * `source` - Raster the missing levels are cut from
    /// * `projection` - Image to screen mapping, which picks each tile's level
    /// * `visible` - Visible image pixels, inclusive
    /// * `filter` - Sampling filter for the quads
    ///
    /// # Returns
    ///
    /// How many tiles were drawn. Tiles whose level could not be made
    /// resident are skipped for this frame.
    pub fn draw<S>(
        &mut self,
        source: &S,
        projection: &dyn Projection,
        visible: PixelRect,
        filter: TextureFilter,
    ) -> Result<usize, LayoutError>
    where
        S: RasterSource + ?Sized,
    {
        let _guard = self.context.map(|context| ContextGuard::new(&self.cache, context));

        let clipped = visible.intersect(&PixelRect::covering(self.layout.image_size));
        if !clipped.is_empty() {
            self.draw_center = Point::new(
                (clipped.left + clipped.right + 1) as f64 / 2.0,
                (clipped.top + clipped.bottom + 1) as f64 / 2.0,
            );
        }

        let indices = self.tiles_to_draw(visible);
        let updates = self.tiles_to_update(&indices, projection);
        self.update_tiles(source, &updates)?;

        let blending = self.layout.needs_blending();
        self.cache.with_backend(|gpu| gpu.set_blending(blending));

        let mut drawn = 0;
        for index in indices {
            if self.tiles[index].draw(projection, filter) {
                drawn += 1;
            }
        }
        Ok(drawn)
    }

    /// Change the opacity of every tile
    pub fn set_alpha(&mut self, alpha: u8) {
        self.layout.alpha = alpha;
        for tile in &mut self.tiles {
            tile.set_alpha(alpha);
        }
    }

    /// Release every tile texture, keeping the tiles
    pub fn free_textures(&mut self) {
        for tile in &mut self.tiles {
            tile.free_textures();
        }
    }

    fn check_source<S: RasterSource + ?Sized>(&self, source: &S) -> Result<(), LayoutError> {
        if source.extent() != self.layout.image_size {
            return Err(LayoutError::SourceSize { expected: self.layout.image_size, actual: source.extent() });
        }
        if source.format() != self.layout.format {
            return Err(LayoutError::SourceFormat { expected: self.layout.format, actual: source.format() });
        }
        Ok(())
    }
}

impl<G: GpuBackend> TiledImage<FilterableTile<G>> {
    /// Add a filter to every tile and run it
    ///
    /// Tiles without full resolution are loaded from `source` so the filter
    /// has input everywhere. Feedback filters then run their warm-up passes
    /// with the freeze flag lifted.
    ///
    /// # Arguments
    ///
    /// * `source` - Raster used to load missing tiles
    /// * `descriptor` - The filter to enable
    /// * `make_kernel` - Called once per tile for that tile's kernel
    ///
    /// # Returns
    ///
    /// `true` when the filter was newly enabled; `false` when it already was
    /// or cannot run on tiles.
    pub fn enable_filter<S, K>(
        &mut self,
        source: &S,
        descriptor: FilterDescriptor,
        mut make_kernel: impl FnMut() -> K,
    ) -> Result<bool, LayoutError>
    where
        S: RasterSource + ?Sized,
        K: FilterKernel<G> + 'static,
    {
        self.check_source(source)?;
        if self.is_filter_enabled(&descriptor) {
            return Ok(false);
        }

        let mut created = false;
        for tile in &mut self.tiles {
            if !tile.has_filter(&descriptor) {
                created |= tile.create_filter(descriptor.clone(), make_kernel()).is_some();
            }
        }
        if !created {
            return Ok(false);
        }

        self.initialize_filter(source, &descriptor)?;
        debug!("enabled filter '{}' on {} tiles", descriptor.name, self.tiles.len());
        Ok(true)
    }

    /// Make `descriptors` the enabled filters
    ///
    /// Filters not in the list are disabled; listed ones that are missing are
    /// enabled in order, with kernels from `make_kernel`.
    pub fn enable_filters<S>(
        &mut self,
        source: &S,
        descriptors: &[FilterDescriptor],
        mut make_kernel: impl FnMut(&FilterDescriptor) -> Box<dyn FilterKernel<G>>,
    ) -> Result<(), LayoutError>
    where
        S: RasterSource + ?Sized,
        G: 'static,
    {
        self.check_source(source)?;
        for current in self.filters() {
            if !descriptors.contains(&current) {
                self.disable_filter(&current);
            }
        }
        for descriptor in descriptors {
            self.enable_filter(source, descriptor.clone(), || make_kernel(descriptor))?;
        }
        Ok(())
    }

    /// Remove a filter from every tile; returns whether any tile had it
    pub fn disable_filter(&mut self, descriptor: &FilterDescriptor) -> bool {
        let mut removed = false;
        for tile in &mut self.tiles {
            removed |= tile.has_filter(descriptor);
            tile.destroy_filter(descriptor);
        }
        removed
    }

    /// Drop a filter's accumulated state and run it again from scratch
    ///
    /// # Returns
    ///
    /// `false` if the filter is not enabled.
    pub fn reset_filter<S>(&mut self, source: &S, descriptor: &FilterDescriptor) -> Result<bool, LayoutError>
    where
        S: RasterSource + ?Sized,
    {
        self.check_source(source)?;
        if !self.is_filter_enabled(descriptor) {
            return Ok(false);
        }
        for tile in &mut self.tiles {
            tile.reset_filter(descriptor);
        }
        self.initialize_filter(source, descriptor)?;
        Ok(true)
    }

    pub fn freeze_filter(&mut self, descriptor: &FilterDescriptor, frozen: bool) {
        for tile in &mut self.tiles {
            tile.freeze_filter(descriptor, frozen);
        }
    }

    /// Whether every tile carries the filter
    pub fn is_filter_enabled(&self, descriptor: &FilterDescriptor) -> bool {
        !self.tiles.is_empty() && self.tiles.iter().all(|tile| tile.has_filter(descriptor))
    }

    /// Enabled filters in application order
    pub fn filters(&self) -> Vec<FilterDescriptor> {
        self.tiles.first().map(|tile| tile.filters()).unwrap_or_default()
    }

    /// Read back the drawn (filtered) pixels of `rect` across tiles
    ///
    /// # Arguments
    ///
    /// * `rect` - Image pixels, inclusive; clipped to the image
    ///
    /// # Returns
    ///
    /// - `Some(pixels)` - rows of the clipped rect, top to bottom, in the image format
    /// - `None` - a tile under `rect` has nothing resident to read
    pub fn read_tiles(&self, rect: PixelRect) -> Option<Vec<u8>> {
        let rect = rect.intersect(&PixelRect::covering(self.layout.image_size));
        if rect.is_empty() {
            return Some(Vec::new());
        }

        let channels = self.layout.format.channels();
        let row_bytes = rect.width() as usize * channels;
        let mut out = vec![0; row_bytes * rect.height() as usize];
        for index in self.tiles_to_read(rect) {
            let (part, pixels) = self.read_tile(index, rect)?;
            if part.is_empty() {
                continue;
            }
            let span = part.width() as usize * channels;
            for (row, line) in pixels.chunks_exact(span).enumerate() {
                let y = (part.top - rect.top) as usize + row;
                let start = y * row_bytes + (part.left - rect.left) as usize * channels;
                out[start..start + span].copy_from_slice(line);
            }
        }
        Some(out)
    }

    /// Read the part of `rect` that tile `index` covers
    ///
    /// Returns that part in image pixels with its row-major pixels.
    fn read_tile(&self, index: usize, rect: PixelRect) -> Option<(PixelRect, Vec<u8>)> {
        let tile = self.tiles.get(index)?;
        let bounds = self.tile_rect(index);
        let part = rect.intersect(&bounds);
        if part.is_empty() {
            return Some((part, Vec::new()));
        }
        let local = PixelRect::new(
            part.left - bounds.left,
            part.top - bounds.top,
            part.right - bounds.left,
            part.bottom - bounds.top,
        );
        let pixels = tile.read_filter_buffer(local)?;
        Some((part, pixels))
    }

    fn initialize_filter<S>(&mut self, source: &S, descriptor: &FilterDescriptor) -> Result<(), LayoutError>
    where
        S: RasterSource + ?Sized,
    {
        let mut missing = Vec::new();
        for (index, tile) in self.tiles.iter_mut().enumerate() {
            if tile.is_texture_ready(0) {
                tile.apply_filters();
            } else {
                missing.push(TileUpdate { tile: index, level: 0 });
            }
        }
        // freshly uploaded tiles run their chain on setup
        self.update_tiles(source, &missing)?;

        let iterations = descriptor.warm_up_iterations();
        if iterations == 0 {
            return Ok(());
        }
        trace!("warming up filter '{}' for {} passes", descriptor.name, iterations);
        for tile in &mut self.tiles {
            let frozen = tile.filter_freeze_flag(descriptor);
            tile.freeze_filter(descriptor, false);
            for _ in 0..iterations {
                tile.apply_filters();
            }
            tile.freeze_filter(descriptor, frozen);
        }
        Ok(())
    }
}

/// Cut level `level` of tile `tile` out of `source`
///
/// Every `2^level`-th pixel of the tile's geometry is sampled; texels beyond
/// the geometry of an edge tile are left zero.
fn extract_tile<S>(source: &S, layout: &ImageLayout, tile: usize, level: usize) -> Vec<u8>
where
    S: RasterSource + ?Sized,
{
    let columns = layout.columns() as usize;
    let column = (tile % columns) as u32;
    let row = (tile / columns) as u32;
    let (x0, y0) = layout.tile_origin(column, row);
    let geometry = layout.tile_geometry(column, row);
    let extent = layout.tile_size.shrink(level as u32);
    let factor = reduction_factor(level);
    let channels = layout.format.channels();

    let row_bytes = extent.width as usize * channels;
    let mut pixels = vec![0; extent.area() * channels];
    for (y, out) in pixels.chunks_exact_mut(row_bytes).enumerate() {
        let sy = y as u32 * factor;
        if sy >= geometry.height {
            break;
        }
        let line = source.row(y0 + sy);
        for x in 0..extent.width {
            let sx = x * factor;
            if sx >= geometry.width {
                break;
            }
            let from = (x0 + sx) as usize * channels;
            let to = x as usize * channels;
            out[to..to + channels].copy_from_slice(&line[from..from + channels]);
        }
    }
    pixels
}
