//! Raster tiles with multi-resolution textures
//!
//! A [`Tile`] is one fixed-size patch of a larger raster. It owns up to four
//! texture levels: level 0 is full resolution and level `n` covers
//! `texSize / 2^n` texels. Levels are filled lazily, either from source
//! pixels or by decimating a finer level that is already resident, and may be
//! evicted by the texture cache at any time.

use log::{debug, trace, warn};
use rasterview_cache::{TextureCache, TextureHandle};

use crate::geometry::{Extent, PixelFormat, Point, Projection, TextureFilter};
use crate::gpu::{GpuBackend, TexturedQuad};

/// Nominal tile edge in pixels (512x512)
pub const TILE_SIZE: u32 = 512;

/// Number of texture levels per tile
pub const LEVEL_COUNT: usize = 4;

/// Source pixels at or below this on-screen size call for a coarser level
const MIN_SCREEN_PIXEL_SIZE: f64 = 0.5;

/// Downsampling factor of texture level `index` relative to level 0
pub fn reduction_factor(index: usize) -> u32 {
    1 << index
}

/// Point-sample `pixels` down by `factor` in both axes
///
/// Every `factor`-th pixel of every `factor`-th row is copied; no averaging
/// takes place.
///
/// # Arguments
///
/// * `pixels` - Row-major source pixels
/// * `extent` - Source dimensions in pixels
/// * `channels` - Bytes per pixel
/// * `factor` - Reduction in each axis; 0 is treated as 1
///
/// # Returns
///
/// - `Some(pixels)` - `max(1, width / factor)` by `max(1, height / factor)` pixels
/// - `None` - `pixels` holds fewer than `extent.area() * channels` bytes, or
///   the source is empty
pub fn decimate(pixels: &[u8], extent: Extent, channels: usize, factor: u32) -> Option<Vec<u8>> {
    if extent.is_empty() || channels == 0 || pixels.len() < extent.area() * channels {
        return None;
    }

    let factor = factor.max(1) as usize;
    let out_width = (extent.width as usize / factor).max(1);
    let out_height = (extent.height as usize / factor).max(1);
    let row_bytes = extent.width as usize * channels;

    let mut out = Vec::with_capacity(out_width * out_height * channels);
    for y in 0..out_height {
        let row = &pixels[y * factor * row_bytes..];
        for x in 0..out_width {
            let start = x * factor * channels;
            out.extend_from_slice(&row[start..start + channels]);
        }
    }
    Some(out)
}

/// Capabilities shared by every kind of tile a [`TiledImage`](crate::TiledImage) holds
pub trait TileSurface {
    type Backend: GpuBackend;

    /// The cache the tile's textures are accounted in
    fn cache(&self) -> &TextureCache<Self::Backend>;

    /// Set format, texture size, geometry size, position and alpha in one go
    fn configure(
        &mut self,
        format: PixelFormat,
        tex_size: Extent,
        geom_size: Extent,
        pos: Point,
        alpha: u8,
    );

    fn set_alpha(&mut self, alpha: u8);

    fn pos(&self) -> Point;

    fn geom_size(&self) -> Extent;

    fn tex_size(&self) -> Extent;

    fn is_texture_ready(&self, index: usize) -> bool;

    /// Texture level appropriate for the current projection
    fn texture_index(&self, projection: &dyn Projection) -> usize;

    /// Upload `pixels` as texture level `index`
    fn setup_texture(&mut self, index: usize, pixels: &[u8]) -> bool;

    /// Produce level `index` from resident data without touching the source
    fn compute_texture(&mut self, index: usize) -> bool;

    /// Draw the tile; returns whether anything was drawn
    fn draw(&mut self, projection: &dyn Projection, filter: TextureFilter) -> bool;

    /// Release every texture the tile owns
    fn free_textures(&mut self);
}

/// One patch of a tiled raster
pub struct Tile<G: GpuBackend> {
    cache: TextureCache<G>,
    format: PixelFormat,
    tex_size: Extent,
    geom_size: Extent,
    pos: Point,
    /// Custom placement; `None` means the axis-aligned geometry rectangle
    corners: Option<[Point; 4]>,
    alpha: u8,
    levels: [TextureHandle<G>; LEVEL_COUNT],
}

impl<G: GpuBackend> Tile<G> {
    /// Create a 512x512 luminance tile at the origin with no textures
    pub fn new(cache: &TextureCache<G>) -> Self {
        Self {
            cache: cache.clone(),
            format: PixelFormat::default(),
            tex_size: Extent::new(TILE_SIZE, TILE_SIZE),
            geom_size: Extent::new(TILE_SIZE, TILE_SIZE),
            pos: Point::default(),
            corners: None,
            alpha: 255,
            levels: std::array::from_fn(|_| TextureHandle::new(cache)),
        }
    }

    /// Set the pixel format; resident textures are dropped when it changes
    pub fn set_tex_format(&mut self, format: PixelFormat) {
        if self.format != format {
            self.free_textures();
            self.format = format;
        }
    }

    /// Set the texture size; resident textures are dropped when it changes
    ///
    /// The geometry size is clamped to the new texture size.
    pub fn set_tex_size(&mut self, width: u32, height: u32) {
        let size = Extent::new(width, height);
        if self.tex_size != size {
            self.free_textures();
            self.tex_size = size;
            self.set_geom_size(self.geom_size.width, self.geom_size.height);
        }
    }

    /// Set the part of the texture covered by image data
    ///
    /// Edge tiles cover less than their texture; the rest is never sampled.
    /// Each axis is clamped to the texture size so texture coordinates stay
    /// within `0.0..=1.0`.
    pub fn set_geom_size(&mut self, width: u32, height: u32) {
        self.geom_size =
            Extent::new(width.min(self.tex_size.width), height.min(self.tex_size.height));
    }

    pub fn set_pos(&mut self, x: f64, y: f64) {
        self.pos = Point::new(x, y);
    }

    pub fn set_alpha(&mut self, alpha: u8) {
        self.alpha = alpha;
    }

    /// Place the tile with explicit corners (relative to its position)
    ///
    /// Corners are given in the order matching texture coordinates
    /// `(0,0)`, `(s,0)`, `(s,t)`, `(0,t)`, so swapping them flips the image.
    pub fn set_corners(&mut self, corners: [Point; 4]) {
        self.corners = Some(corners);
    }

    /// Go back to the axis-aligned geometry rectangle
    pub fn reset_corners(&mut self) {
        self.corners = None;
    }

    /// Corners relative to the tile position
    pub fn corners(&self) -> [Point; 4] {
        self.corners.unwrap_or_else(|| {
            let w = self.geom_size.width as f64;
            let h = self.geom_size.height as f64;
            [Point::new(0.0, 0.0), Point::new(w, 0.0), Point::new(w, h), Point::new(0.0, h)]
        })
    }

    /// Corners in image space
    pub fn vertices(&self) -> [Point; 4] {
        self.corners().map(|corner| corner.offset(self.pos.x, self.pos.y))
    }

    pub fn tex_format(&self) -> PixelFormat {
        self.format
    }

    pub fn tex_size(&self) -> Extent {
        self.tex_size
    }

    pub fn geom_size(&self) -> Extent {
        self.geom_size
    }

    pub fn pos(&self) -> Point {
        self.pos
    }

    pub fn alpha(&self) -> u8 {
        self.alpha
    }

    pub fn cache(&self) -> &TextureCache<G> {
        &self.cache
    }

    /// Texture handle of a level
    pub fn level(&self, index: usize) -> Option<&TextureHandle<G>> {
        self.levels.get(index)
    }

    /// Texel dimensions of level `index`
    pub fn level_extent(&self, index: usize) -> Extent {
        self.tex_size.shrink(index as u32)
    }

    /// Bytes of pixel data for level `index`
    pub fn level_bytes(&self, index: usize) -> usize {
        self.level_extent(index).area() * self.format.channels()
    }

    pub fn is_texture_ready(&self, index: usize) -> bool {
        self.levels.get(index).is_some_and(|level| level.is_allocated())
    }

    /// On-screen size of one source pixel under `projection`
    ///
    /// Derived from the projected area of the tile's quad; 0.0 when either the
    /// projection or the geometry is degenerate.
    pub fn screen_pixel_size(&self, projection: &dyn Projection) -> f64 {
        let geom_area = self.geom_size.area() as f64;
        if geom_area == 0.0 {
            return 0.0;
        }

        let screen = self.vertices().map(|vertex| projection.project(vertex));
        let twice_area: f64 = (0..4)
            .map(|i| {
                let a = screen[i];
                let b = screen[(i + 1) % 4];
                a.x * b.y - b.x * a.y
            })
            .sum();
        let screen_area = twice_area.abs() / 2.0;
        if !screen_area.is_finite() || screen_area == 0.0 {
            return 0.0;
        }

        (screen_area / geom_area).sqrt()
    }

    /// Coarsest level that does not under-sample the display
    ///
    /// # Returns
    ///
    /// A level in `0..LEVEL_COUNT`; 0 for a degenerate projection or geometry.
    pub fn texture_index(&self, projection: &dyn Projection) -> usize {
        let mut pixel_size = self.screen_pixel_size(projection);
        if pixel_size <= 0.0 {
            return 0;
        }

        let mut index = 0;
        while pixel_size < MIN_SCREEN_PIXEL_SIZE && index < LEVEL_COUNT - 1 {
            pixel_size *= 2.0;
            index += 1;
        }
        index
    }

    /// Upload `pixels` as level `index`
    ///
    /// A level that is already resident is left alone.
    ///
    /// # Arguments
    ///
    /// * `index` - Texture level, 0 being full resolution
    /// * `pixels` - At least [`level_bytes(index)`](Self::level_bytes) bytes in the tile format
    ///
    /// # Returns
    ///
    /// Whether the level is ready afterwards. `false` means the buffer was too
    /// short, the cache could not make room or the device refused the upload;
    /// the caller should try again later.
    pub fn setup_texture(&mut self, index: usize, pixels: &[u8]) -> bool {
        let Some(handle) = self.levels.get(index) else {
            warn!("texture level {} out of range", index);
            return false;
        };
        if handle.is_allocated() {
            return true;
        }

        let extent = self.level_extent(index);
        let bytes = self.level_bytes(index);
        if pixels.len() < bytes {
            warn!("level {} needs {} bytes, got {}", index, bytes, pixels.len());
            return false;
        }

        if !handle.allocate(bytes) {
            debug!("no room for level {} ({} bytes)", index, bytes);
            return false;
        }
        let Some(id) = handle.texture_id() else {
            return false;
        };

        let format = self.format;
        let uploaded =
            self.cache.with_backend(|gpu| gpu.upload_texture(id, extent, format, &pixels[..bytes]));
        if let Err(err) = uploaded {
            warn!("upload of level {} failed: {}", index, err);
            handle.free();
            return false;
        }
        true
    }

    /// Synthesize level `index` from the finest resident level above it
    ///
    /// The source level is read back from the GPU and decimated by
    /// `2^(index - source)`. A source whose read-back is missing or short is
    /// skipped in favour of the next coarser one.
    ///
    /// # Returns
    ///
    /// `true` when the level is ready.
    pub fn compute_texture(&mut self, index: usize) -> bool {
        if index >= LEVEL_COUNT {
            return false;
        }
        if self.is_texture_ready(index) {
            return true;
        }

        for source in 0..index {
            let pixels = match self.read_level(source) {
                Some(pixels) => pixels,
                None => continue,
            };

            let factor = reduction_factor(index - source);
            let Some(reduced) =
                decimate(&pixels, self.level_extent(source), self.format.channels(), factor)
            else {
                warn!("level {} read back {} bytes, skipping", source, pixels.len());
                continue;
            };
            trace!("synthesizing level {} from level {} (factor {})", index, source, factor);
            return self.setup_texture(index, &reduced);
        }

        false
    }

    /// Make level `index` ready from resident data if possible
    pub fn ensure_texture(&mut self, index: usize) -> bool {
        self.is_texture_ready(index) || self.compute_texture(index)
    }

    /// Read back the contents of a resident level
    pub fn read_level(&self, index: usize) -> Option<Vec<u8>> {
        let id = self.levels.get(index)?.texture_id()?;
        let extent = self.level_extent(index);
        let format = self.format;
        self.cache.with_backend(|gpu| gpu.read_texture(id, extent, format))
    }

    /// Draw the level chosen for `projection`
    ///
    /// Nothing is drawn when that level is not resident; the caller sets it up
    /// and draws again on a later frame.
    pub fn draw(&mut self, projection: &dyn Projection, filter: TextureFilter) -> bool {
        let index = self.texture_index(projection);
        if !self.is_texture_ready(index) {
            trace!("level {} not ready at {:?}, skipping", index, self.pos);
            return false;
        }
        self.draw_texture(&self.levels[index], filter)
    }

    /// Emit the tile quad textured with `texture`
    pub(crate) fn draw_texture(&self, texture: &TextureHandle<G>, filter: TextureFilter) -> bool {
        let Some(id) = texture.texture_id() else {
            return false;
        };
        texture.bind();

        let s = self.geom_size.width as f64 / self.tex_size.width.max(1) as f64;
        let t = self.geom_size.height as f64 / self.tex_size.height.max(1) as f64;
        let quad = TexturedQuad {
            texture: id,
            filter,
            color: [255, 255, 255, self.alpha],
            vertices: self.vertices(),
            tex_coords: [
                Point::new(0.0, 0.0),
                Point::new(s, 0.0),
                Point::new(s, t),
                Point::new(0.0, t),
            ],
        };

        self.cache.with_backend(|gpu| {
            gpu.set_texture_filter(filter);
            gpu.draw_quad(&quad);
        });
        true
    }

    /// Release all texture levels
    pub fn free_textures(&mut self) {
        for level in &self.levels {
            level.free();
        }
    }
}

impl<G: GpuBackend> TileSurface for Tile<G> {
    type Backend = G;

    fn cache(&self) -> &TextureCache<G> {
        &self.cache
    }

    fn configure(
        &mut self,
        format: PixelFormat,
        tex_size: Extent,
        geom_size: Extent,
        pos: Point,
        alpha: u8,
    ) {
        self.set_tex_format(format);
        self.set_tex_size(tex_size.width, tex_size.height);
        self.set_geom_size(geom_size.width, geom_size.height);
        self.set_pos(pos.x, pos.y);
        self.set_alpha(alpha);
    }

    fn set_alpha(&mut self, alpha: u8) {
        Tile::set_alpha(self, alpha);
    }

    fn pos(&self) -> Point {
        self.pos
    }

    fn geom_size(&self) -> Extent {
        self.geom_size
    }

    fn tex_size(&self) -> Extent {
        self.tex_size
    }

    fn is_texture_ready(&self, index: usize) -> bool {
        Tile::is_texture_ready(self, index)
    }

    fn texture_index(&self, projection: &dyn Projection) -> usize {
        Tile::texture_index(self, projection)
    }

    fn setup_texture(&mut self, index: usize, pixels: &[u8]) -> bool {
        Tile::setup_texture(self, index, pixels)
    }

    fn compute_texture(&mut self, index: usize) -> bool {
        Tile::compute_texture(self, index)
    }

    fn draw(&mut self, projection: &dyn Projection, filter: TextureFilter) -> bool {
        Tile::draw(self, projection, filter)
    }

    fn free_textures(&mut self) {
        Tile::free_textures(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ViewTransform;
    use crate::gpu::HeadlessGpu;

    fn cache() -> TextureCache<HeadlessGpu> {
        TextureCache::with_ceiling(HeadlessGpu::new(), 200_000_000)
    }

    fn rgb_tile(cache: &TextureCache<HeadlessGpu>) -> Tile<HeadlessGpu> {
        let mut tile = Tile::new(cache);
        tile.set_tex_format(PixelFormat::Rgb);
        tile
    }

    /// Pixel (x, y) of a 512x512 RGB gradient
    fn gradient(extent: Extent) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(extent.area() * 3);
        for y in 0..extent.height {
            for x in 0..extent.width {
                pixels.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        pixels
    }

    #[test]
    fn test_reduction_factor() {
        assert_eq!(reduction_factor(0), 1);
        assert_eq!(reduction_factor(1), 2);
        assert_eq!(reduction_factor(3), 8);
    }

    #[test]
    fn test_decimate_point_samples() {
        // 4x2 luminance: rows [0 1 2 3] [4 5 6 7]
        let pixels: Vec<u8> = (0..8).collect();
        assert_eq!(decimate(&pixels, Extent::new(4, 2), 1, 2), Some(vec![0, 2]));
        assert_eq!(decimate(&pixels, Extent::new(4, 2), 1, 1), Some(pixels.clone()));
        assert_eq!(decimate(&pixels, Extent::new(4, 2), 1, 8), Some(vec![0]));
    }

    #[test]
    fn test_decimate_rejects_short_buffer() {
        let pixels: Vec<u8> = (0..7).collect();

        assert_eq!(decimate(&pixels, Extent::new(4, 2), 1, 2), None);
        assert_eq!(decimate(&pixels, Extent::new(2, 2), 3, 1), None);
        assert_eq!(decimate(&pixels, Extent::new(0, 2), 1, 1), None);
    }

    #[test]
    fn test_compute_texture_skips_mismatched_read_back() {
        let cache = cache();
        let mut tile = Tile::new(&cache);
        tile.set_tex_size(4, 4);
        assert!(tile.setup_texture(0, &[7; 16]));
        // the device now reports level 0 as a smaller texture
        let id = tile.level(0).unwrap().texture_id().unwrap();
        cache.with_backend(|gpu| {
            gpu.upload_texture(id, Extent::new(2, 2), PixelFormat::Luminance, &[1; 4]).unwrap()
        });

        assert!(!tile.compute_texture(1));
        assert!(!tile.is_texture_ready(1));
    }

    #[test]
    fn test_new_tile_has_no_textures() {
        let cache = cache();
        let tile = Tile::new(&cache);

        for index in 0..LEVEL_COUNT {
            assert!(!tile.is_texture_ready(index));
        }
        assert!(!tile.is_texture_ready(LEVEL_COUNT));
        assert_eq!(cache.handle_count(), LEVEL_COUNT);
    }

    #[test]
    fn test_level_sizes() {
        let cache = cache();
        let tile = rgb_tile(&cache);

        assert_eq!(tile.level_extent(0), Extent::new(512, 512));
        assert_eq!(tile.level_extent(3), Extent::new(64, 64));
        assert_eq!(tile.level_bytes(2), 128 * 128 * 3);
    }

    #[test]
    fn test_setup_texture_uploads_once() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);
        let pixels = gradient(Extent::new(512, 512));

        assert!(tile.setup_texture(0, &pixels));
        assert!(tile.is_texture_ready(0));
        assert!(tile.setup_texture(0, &pixels));

        assert_eq!(cache.with_backend(|gpu| gpu.uploads()), 1);
        assert_eq!(cache.bytes_allocated(), 512 * 512 * 3);
    }

    #[test]
    fn test_setup_texture_rejects_short_buffer() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);

        assert!(!tile.setup_texture(1, &[0; 16]));
        assert!(!tile.is_texture_ready(1));
        assert_eq!(cache.bytes_allocated(), 0);
    }

    #[test]
    fn test_refused_upload_releases_level() {
        let cache = cache();
        let mut tile = Tile::new(&cache);
        tile.set_tex_size(4, 4);
        cache.with_backend(|gpu| gpu.refuse_next_upload());

        assert!(!tile.setup_texture(0, &[0; 16]));

        assert!(!tile.is_texture_ready(0));
        assert_eq!(cache.bytes_allocated(), 0);
        assert_eq!(cache.with_backend(|gpu| gpu.texture_count()), 0);
        assert!(tile.setup_texture(0, &[0; 16]));
    }

    #[test]
    fn test_geom_size_is_clamped_to_texture() {
        let cache = cache();
        let mut tile = Tile::new(&cache);
        tile.set_tex_size(4, 4);

        tile.set_geom_size(8, 3);
        assert_eq!(tile.geom_size(), Extent::new(4, 3));

        tile.set_tex_size(2, 2);
        assert_eq!(tile.geom_size(), Extent::new(2, 2));

        tile.setup_texture(0, &[0; 4]);
        tile.set_geom_size(100, 100);
        assert!(tile.draw(&ViewTransform::new(1.0), TextureFilter::Nearest));
        let quad = cache.with_backend(|gpu| gpu.draws()[0].clone());
        assert!(quad.tex_coords.iter().all(|c| c.x <= 1.0 && c.y <= 1.0));
        assert_eq!(quad.tex_coords[2], Point::new(1.0, 1.0));
    }

    #[test]
    fn test_setup_texture_without_room_is_not_ready() {
        let cache = TextureCache::with_ceiling(HeadlessGpu::with_capacity(1000), 200_000_000);
        let mut tile = rgb_tile(&cache);

        assert!(!tile.setup_texture(0, &gradient(Extent::new(512, 512))));
        assert!(!tile.is_texture_ready(0));
    }

    #[test]
    fn test_compute_texture_from_full_resolution() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);
        let pixels = gradient(Extent::new(512, 512));
        tile.setup_texture(0, &pixels);

        assert!(tile.compute_texture(2));

        assert!(!tile.is_texture_ready(1));
        let level = tile.read_level(2).unwrap();
        assert_eq!(level.len(), 128 * 128 * 3);
        // texel (5, 7) of level 2 is source pixel (20, 28)
        let texel = (7 * 128 + 5) * 3;
        assert_eq!(&level[texel..texel + 3], &[20, 28, 48]);
    }

    #[test]
    fn test_compute_texture_prefers_finest_resident_level() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);
        tile.setup_texture(0, &gradient(Extent::new(512, 512)));
        tile.setup_texture(1, &vec![9; tile.level_bytes(1)]);

        assert!(tile.compute_texture(3));

        let level = tile.read_level(3).unwrap();
        assert_eq!(&level[..3], &[0, 0, 0]);
    }

    #[test]
    fn test_compute_texture_without_source_fails() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);

        assert!(!tile.compute_texture(2));
        assert!(!tile.compute_texture(0));
        assert!(!tile.compute_texture(LEVEL_COUNT));
    }

    #[test]
    fn test_texture_index_follows_zoom() {
        let cache = cache();
        let tile = Tile::new(&cache);

        assert_eq!(tile.texture_index(&ViewTransform::new(4.0)), 0);
        assert_eq!(tile.texture_index(&ViewTransform::new(1.0)), 0);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.5)), 0);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.4)), 1);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.2)), 2);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.1)), 3);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.001)), 3);
    }

    #[test]
    fn test_texture_index_is_monotonic_in_zoom_out() {
        let cache = cache();
        let tile = Tile::new(&cache);

        let mut previous = 0;
        let mut scale = 8.0;
        while scale > 1e-4 {
            let index = tile.texture_index(&ViewTransform::new(scale));
            assert!(index >= previous);
            assert!(index < LEVEL_COUNT);
            previous = index;
            scale /= 2.0;
        }
        assert_eq!(previous, 3);
    }

    #[test]
    fn test_degenerate_projection_uses_full_resolution() {
        let cache = cache();
        let mut tile = Tile::new(&cache);

        assert_eq!(tile.screen_pixel_size(&ViewTransform::new(0.0)), 0.0);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.0)), 0);
        assert_eq!(tile.texture_index(&ViewTransform::new(1.0).with_scales(0.01, 0.0)), 0);

        tile.set_geom_size(0, 512);
        assert_eq!(tile.texture_index(&ViewTransform::new(0.01)), 0);
    }

    #[test]
    fn test_draw_skips_missing_level() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);
        tile.setup_texture(0, &gradient(Extent::new(512, 512)));

        assert!(!tile.draw(&ViewTransform::new(0.2), TextureFilter::Linear));
        assert!(cache.with_backend(|gpu| gpu.draws().is_empty()));
    }

    #[test]
    fn test_draw_emits_scaled_quad_for_edge_tile() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);
        tile.set_geom_size(256, 128);
        tile.set_pos(1024.0, 512.0);
        tile.set_alpha(128);
        tile.setup_texture(0, &gradient(Extent::new(512, 512)));

        assert!(tile.draw(&ViewTransform::new(1.0), TextureFilter::Linear));

        let quad = cache.with_backend(|gpu| gpu.draws()[0].clone());
        assert_eq!(quad.texture, tile.level(0).unwrap().texture_id().unwrap());
        assert_eq!(quad.filter, TextureFilter::Linear);
        assert_eq!(quad.color, [255, 255, 255, 128]);
        assert_eq!(quad.vertices[0], Point::new(1024.0, 512.0));
        assert_eq!(quad.vertices[2], Point::new(1280.0, 640.0));
        assert_eq!(quad.tex_coords[2], Point::new(0.5, 0.25));
        assert_eq!(cache.with_backend(|gpu| gpu.texture_filter()), TextureFilter::Linear);
        assert_eq!(cache.with_backend(|gpu| gpu.bound_texture()), Some(quad.texture));
    }

    #[test]
    fn test_flipped_corners() {
        let cache = cache();
        let mut tile = Tile::new(&cache);
        tile.set_tex_size(4, 4);
        tile.set_geom_size(4, 4);
        tile.set_corners([
            Point::new(0.0, 4.0),
            Point::new(4.0, 4.0),
            Point::new(4.0, 0.0),
            Point::new(0.0, 0.0),
        ]);
        tile.setup_texture(0, &[0; 16]);

        assert!(tile.draw(&ViewTransform::new(1.0), TextureFilter::Nearest));

        let quad = cache.with_backend(|gpu| gpu.draws()[0].clone());
        assert_eq!(quad.vertices[0], Point::new(0.0, 4.0));
        assert_eq!(quad.tex_coords[0], Point::new(0.0, 0.0));
        assert!((tile.screen_pixel_size(&ViewTransform::new(1.0)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_format_change_drops_textures() {
        let cache = cache();
        let mut tile = rgb_tile(&cache);
        tile.setup_texture(0, &gradient(Extent::new(512, 512)));

        tile.set_tex_format(PixelFormat::Rgba);

        assert!(!tile.is_texture_ready(0));
        assert_eq!(cache.bytes_allocated(), 0);
    }

    #[test]
    fn test_dropping_tile_frees_textures() {
        let cache = cache();
        {
            let mut tile = rgb_tile(&cache);
            tile.setup_texture(0, &gradient(Extent::new(512, 512)));
            tile.compute_texture(1);
            assert_eq!(cache.texture_count(), 2);
        }

        assert_eq!(cache.texture_count(), 0);
        assert_eq!(cache.handle_count(), 0);
        assert_eq!(cache.with_backend(|gpu| gpu.texture_count()), 0);
    }
}
