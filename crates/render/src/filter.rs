//! GPU post-processing of tile textures
//!
//! A [`FilterableTile`] wraps a plain [`Tile`] with an ordered [`FilterChain`].
//! After the full-resolution level is uploaded each filter runs in turn, its
//! result texture feeding the next one; the tile draws the last result.
//! Result textures are ordinary cache handles and may be evicted like any
//! other texture, in which case the chain is re-run on the next draw.

use log::{debug, trace, warn};
use rasterview_cache::{TextureCache, TextureHandle, TextureId};

use crate::geometry::{Extent, PixelFormat, PixelRect, Point, Projection, TextureFilter};
use crate::gpu::GpuBackend;
use crate::tile::{Tile, TileSurface};

/// How a filter consumes its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Output depends on the input only
    ImageFilter,
    /// Output also depends on the filter's previous output
    FeedbackFilter,
    /// Built-in display processing; not available as a tile filter
    GpuProcess,
}

/// Passes run on a feedback filter before its output is first shown
pub const DEFAULT_INITIALIZATION_ITERATIONS: u32 = 20;

/// Identifies a filter on a tile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterDescriptor {
    pub name: String,
    pub kind: FilterKind,
    /// Warm-up passes for feedback filters; `None` uses the default
    pub initialization_iterations: Option<u32>,
}

impl FilterDescriptor {
    pub fn new(name: impl Into<String>, kind: FilterKind) -> Self {
        Self { name: name.into(), kind, initialization_iterations: None }
    }

    pub fn with_initialization_iterations(mut self, iterations: u32) -> Self {
        self.initialization_iterations = Some(iterations);
        self
    }

    /// Number of warm-up passes run when the filter is enabled
    ///
    /// # Returns
    ///
    /// - `0` - for anything but a feedback filter
    /// - the configured count, or [`DEFAULT_INITIALIZATION_ITERATIONS`], otherwise
    pub fn warm_up_iterations(&self) -> u32 {
        match self.kind {
            FilterKind::FeedbackFilter => {
                self.initialization_iterations.unwrap_or(DEFAULT_INITIALIZATION_ITERATIONS)
            }
            _ => 0,
        }
    }
}

/// Textures and layout handed to a kernel for one filter pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPass {
    pub input: TextureId,
    pub output: TextureId,
    pub extent: Extent,
    pub format: PixelFormat,
    /// Whether `output` still holds the previous result
    pub feedback: bool,
}

/// The program a filter runs
pub trait FilterKernel<G> {
    /// Render `pass.input` into `pass.output`; returns whether output was produced
    fn process(&mut self, gpu: &mut G, pass: &FilterPass) -> bool;
}

impl<G, K: FilterKernel<G> + ?Sized> FilterKernel<G> for Box<K> {
    fn process(&mut self, gpu: &mut G, pass: &FilterPass) -> bool {
        (**self).process(gpu, pass)
    }
}

/// Kernel that runs a closure over read-back pixels
///
/// The closure receives the input pixels and, for feedback filters, the
/// previous output, and returns the new output of the same length.
pub struct PixelKernel<F> {
    transform: F,
}

impl<F> PixelKernel<F>
where
    F: FnMut(&[u8], Option<&[u8]>) -> Vec<u8>,
{
    pub fn new(transform: F) -> Self {
        Self { transform }
    }
}

impl<G, F> FilterKernel<G> for PixelKernel<F>
where
    G: GpuBackend,
    F: FnMut(&[u8], Option<&[u8]>) -> Vec<u8>,
{
    fn process(&mut self, gpu: &mut G, pass: &FilterPass) -> bool {
        let Some(input) = gpu.read_texture(pass.input, pass.extent, pass.format) else {
            return false;
        };
        let previous = if pass.feedback {
            gpu.read_texture(pass.output, pass.extent, pass.format)
        } else {
            None
        };

        let output = (self.transform)(&input, previous.as_deref());
        if output.len() != input.len() {
            warn!("filter produced {} bytes for a {} byte input", output.len(), input.len());
            return false;
        }
        match gpu.upload_texture(pass.output, pass.extent, pass.format, &output) {
            Ok(()) => true,
            Err(err) => {
                warn!("filter output rejected: {}", err);
                false
            }
        }
    }
}

/// One filter of a chain together with its result texture
pub struct ImageFilter<G: GpuBackend> {
    descriptor: FilterDescriptor,
    kernel: Box<dyn FilterKernel<G>>,
    result: TextureHandle<G>,
    frozen: bool,
}

impl<G: GpuBackend> ImageFilter<G> {
    fn new(cache: &TextureCache<G>, descriptor: FilterDescriptor, kernel: Box<dyn FilterKernel<G>>) -> Self {
        Self { descriptor, kernel, result: TextureHandle::new(cache), frozen: false }
    }

    pub fn descriptor(&self) -> &FilterDescriptor {
        &self.descriptor
    }

    /// The texture holding the last output
    pub fn result(&self) -> &TextureHandle<G> {
        &self.result
    }

    /// Run the filter on `input`
    ///
    /// A frozen filter with a resident result is not re-run. A result sized
    /// for a different extent or format is released first, so it is never
    /// reused across a resize.
    ///
    /// # Arguments
    ///
    /// * `input` - Resident texture to filter
    /// * `extent` - Texel dimensions of `input`
    /// * `format` - Pixel format of `input`
    ///
    /// # Returns
    ///
    /// Whether the result texture holds valid output.
    pub fn apply(&mut self, input: &TextureHandle<G>, extent: Extent, format: PixelFormat) -> bool {
        let bytes = extent.area() * format.channels();
        if self.result.is_allocated() && self.result.byte_size() != bytes {
            debug!(
                "filter '{}' result is {} bytes, need {}; reallocating",
                self.descriptor.name,
                self.result.byte_size(),
                bytes
            );
            self.result.free();
        }
        if self.frozen && self.result.is_allocated() {
            return true;
        }

        // keep the input warm so allocating the result cannot evict it
        input.bind();
        let feedback = self.descriptor.kind == FilterKind::FeedbackFilter && self.result.is_allocated();
        if !self.result.is_allocated() && !self.result.allocate(bytes) {
            debug!("no room for the result of filter '{}'", self.descriptor.name);
            return false;
        }

        let (Some(input), Some(output)) = (input.texture_id(), self.result.texture_id()) else {
            return false;
        };
        let pass = FilterPass { input, output, extent, format, feedback };
        let cache = self.result.cache();
        let produced = cache.with_backend(|gpu| self.kernel.process(gpu, &pass));
        if !produced {
            trace!("filter '{}' produced no output", self.descriptor.name);
            self.result.free();
        }
        produced
    }

    /// Drop the result buffer
    pub fn reset(&mut self) {
        self.result.free();
    }

    pub fn freeze(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Ordered list of filters applied to one texture
pub struct FilterChain<G: GpuBackend> {
    cache: TextureCache<G>,
    filters: Vec<ImageFilter<G>>,
}

impl<G: GpuBackend> FilterChain<G> {
    pub fn new(cache: &TextureCache<G>) -> Self {
        Self { cache: cache.clone(), filters: Vec::new() }
    }

    /// Append a filter
    ///
    /// Returns `None` if a filter with the same descriptor already exists or
    /// the descriptor kind cannot be run on a tile.
    pub fn create<K>(&mut self, descriptor: FilterDescriptor, kernel: K) -> Option<&mut ImageFilter<G>>
    where
        K: FilterKernel<G> + 'static,
    {
        if self.has(&descriptor) {
            return None;
        }
        if descriptor.kind == FilterKind::GpuProcess {
            warn!("filter '{}': GPU process filters are not supported on tiles", descriptor.name);
            return None;
        }

        self.filters.push(ImageFilter::new(&self.cache, descriptor, Box::new(kernel)));
        self.filters.last_mut()
    }

    pub fn get(&self, descriptor: &FilterDescriptor) -> Option<&ImageFilter<G>> {
        self.filters.iter().find(|filter| filter.descriptor == *descriptor)
    }

    pub fn get_mut(&mut self, descriptor: &FilterDescriptor) -> Option<&mut ImageFilter<G>> {
        self.filters.iter_mut().find(|filter| filter.descriptor == *descriptor)
    }

    pub fn has(&self, descriptor: &FilterDescriptor) -> bool {
        self.get(descriptor).is_some()
    }

    /// Remove a filter and release its result; returns whether it existed
    ///
    /// Results of the filters after it were computed from its output and are
    /// released too.
    pub fn destroy(&mut self, descriptor: &FilterDescriptor) -> bool {
        let Some(position) = self.filters.iter().position(|filter| filter.descriptor == *descriptor) else {
            return false;
        };
        self.filters.remove(position);
        for filter in &mut self.filters[position..] {
            filter.reset();
        }
        true
    }

    pub fn reset(&mut self, descriptor: &FilterDescriptor) {
        if let Some(filter) = self.get_mut(descriptor) {
            filter.reset();
        }
    }

    /// Release every result buffer; the filters themselves stay
    pub fn reset_all(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    pub fn freeze(&mut self, descriptor: &FilterDescriptor, frozen: bool) {
        if let Some(filter) = self.get_mut(descriptor) {
            filter.freeze(frozen);
        }
    }

    /// Freeze state of a filter; `false` for unknown filters
    pub fn freeze_flag(&self, descriptor: &FilterDescriptor) -> bool {
        self.get(descriptor).is_some_and(|filter| filter.is_frozen())
    }

    /// Descriptors in application order
    pub fn descriptors(&self) -> Vec<FilterDescriptor> {
        self.filters.iter().map(|filter| filter.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in order starting from `source`
    ///
    /// A filter that cannot produce output is skipped and the next one sees
    /// the previous buffer. Returns the handle to draw, or `None` if `source`
    /// is not resident.
    pub fn apply(&mut self, source: &TextureHandle<G>, extent: Extent, format: PixelFormat) -> Option<TextureHandle<G>> {
        if !source.is_allocated() {
            return None;
        }

        let mut current = source.clone();
        for filter in &mut self.filters {
            if filter.apply(&current, extent, format) {
                current = filter.result.clone();
            }
        }
        Some(current)
    }

    /// The buffer the chain would draw without re-running anything
    pub fn output(&self, source: &TextureHandle<G>) -> TextureHandle<G> {
        self.filters
            .iter()
            .rev()
            .map(|filter| &filter.result)
            .find(|result| result.is_allocated())
            .unwrap_or(source)
            .clone()
    }
}

/// A tile whose full-resolution texture is post-processed before drawing
///
/// Filtered tiles always display level 0.
pub struct FilterableTile<G: GpuBackend> {
    tile: Tile<G>,
    chain: FilterChain<G>,
    output: Option<TextureHandle<G>>,
}

impl<G: GpuBackend> FilterableTile<G> {
    pub fn new(cache: &TextureCache<G>) -> Self {
        Self { tile: Tile::new(cache), chain: FilterChain::new(cache), output: None }
    }

    pub fn tile(&self) -> &Tile<G> {
        &self.tile
    }

    pub fn tile_mut(&mut self) -> &mut Tile<G> {
        &mut self.tile
    }

    /// Add a filter; existing output is recomputed on the next draw
    pub fn create_filter<K>(&mut self, descriptor: FilterDescriptor, kernel: K) -> Option<&mut ImageFilter<G>>
    where
        K: FilterKernel<G> + 'static,
    {
        let filter = self.chain.create(descriptor, kernel)?;
        self.output = None;
        Some(filter)
    }

    pub fn get_filter(&self, descriptor: &FilterDescriptor) -> Option<&ImageFilter<G>> {
        self.chain.get(descriptor)
    }

    pub fn has_filter(&self, descriptor: &FilterDescriptor) -> bool {
        self.chain.has(descriptor)
    }

    /// Remove a filter
    ///
    /// Removing the last filter falls back to the previous filter's result.
    /// Removing any other re-runs the chain.
    pub fn destroy_filter(&mut self, descriptor: &FilterDescriptor) {
        let was_last = self.chain.filters.last().is_some_and(|filter| filter.descriptor == *descriptor);
        if !self.chain.destroy(descriptor) {
            return;
        }
        if was_last {
            self.output = self.level_zero().map(|source| self.chain.output(source));
        } else {
            self.apply_filters();
        }
    }

    pub fn reset_filter(&mut self, descriptor: &FilterDescriptor) {
        self.chain.reset(descriptor);
    }

    pub fn freeze_filter(&mut self, descriptor: &FilterDescriptor, frozen: bool) {
        self.chain.freeze(descriptor, frozen);
    }

    pub fn filter_freeze_flag(&self, descriptor: &FilterDescriptor) -> bool {
        self.chain.freeze_flag(descriptor)
    }

    pub fn filters(&self) -> Vec<FilterDescriptor> {
        self.chain.descriptors()
    }

    /// Run the chain on the resident full-resolution level
    pub fn apply_filters(&mut self) -> bool {
        let Some(source) = self.level_zero() else {
            self.output = None;
            return false;
        };
        let source = source.clone();
        self.output = self.chain.apply(&source, self.tile.level_extent(0), self.tile.tex_format());
        self.output.is_some()
    }

    /// The texture that is drawn, if any
    pub fn output(&self) -> Option<&TextureHandle<G>> {
        self.output.as_ref().filter(|output| output.is_allocated())
    }

    /// Read back part of the drawn output
    ///
    /// `rect` is clipped to the texture; rows are returned top to bottom.
    pub fn read_filter_buffer(&self, rect: PixelRect) -> Option<Vec<u8>> {
        let output = self.output()?;
        let id = output.texture_id()?;
        let extent = self.tile.level_extent(0);
        let format = self.tile.tex_format();
        let pixels = self.tile.cache().with_backend(|gpu| gpu.read_texture(id, extent, format))?;

        let rect = rect.intersect(&PixelRect::covering(extent));
        if rect.is_empty() {
            return Some(Vec::new());
        }
        let channels = format.channels();
        let row_bytes = extent.width as usize * channels;
        let span = rect.width() as usize * channels;
        let mut out = Vec::with_capacity(span * rect.height() as usize);
        for y in rect.top..=rect.bottom {
            let start = y as usize * row_bytes + rect.left as usize * channels;
            out.extend_from_slice(&pixels[start..start + span]);
        }
        Some(out)
    }

    fn level_zero(&self) -> Option<&TextureHandle<G>> {
        self.tile.level(0).filter(|level| level.is_allocated())
    }
}

impl<G: GpuBackend> TileSurface for FilterableTile<G> {
    type Backend = G;

    fn cache(&self) -> &TextureCache<G> {
        self.tile.cache()
    }

    fn configure(
        &mut self,
        format: PixelFormat,
        tex_size: Extent,
        geom_size: Extent,
        pos: Point,
        alpha: u8,
    ) {
        if self.tile.tex_format() != format || self.tile.tex_size() != tex_size {
            self.free_textures();
        }
        self.tile.configure(format, tex_size, geom_size, pos, alpha);
        if self.level_zero().is_none() {
            self.output = None;
        }
    }

    fn set_alpha(&mut self, alpha: u8) {
        self.tile.set_alpha(alpha);
    }

    fn pos(&self) -> Point {
        self.tile.pos()
    }

    fn geom_size(&self) -> Extent {
        self.tile.geom_size()
    }

    fn tex_size(&self) -> Extent {
        self.tile.tex_size()
    }

    fn is_texture_ready(&self, index: usize) -> bool {
        self.tile.is_texture_ready(index)
    }

    fn texture_index(&self, _projection: &dyn Projection) -> usize {
        0
    }

    fn setup_texture(&mut self, index: usize, pixels: &[u8]) -> bool {
        if index > 0 {
            warn!("filtered tiles only hold level 0, not level {}", index);
            return false;
        }
        let fresh = !self.tile.is_texture_ready(index);
        if !self.tile.setup_texture(index, pixels) {
            return false;
        }
        if fresh || self.output().is_none() {
            self.apply_filters();
        }
        true
    }

    /// Level 0 cannot be synthesized and no other level is displayed
    fn compute_texture(&mut self, _index: usize) -> bool {
        false
    }

    fn draw(&mut self, _projection: &dyn Projection, filter: TextureFilter) -> bool {
        if self.level_zero().is_none() {
            trace!("filtered tile at {:?} has no source texture", self.tile.pos());
            return false;
        }
        if self.output().is_none() {
            self.apply_filters();
        }
        match self.output() {
            Some(output) => self.tile.draw_texture(output, filter),
            None => false,
        }
    }

    /// Release the source level and every filter result
    fn free_textures(&mut self) {
        self.tile.free_textures();
        self.chain.reset_all();
        self.output = None;
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

    fn small_tile(cache: &TextureCache<HeadlessGpu>) -> FilterableTile<HeadlessGpu> {
        let mut tile = FilterableTile::new(cache);
        tile.configure(PixelFormat::Luminance, Extent::new(4, 4), Extent::new(4, 4), Point::default(), 255);
        tile
    }

    fn ramp() -> Vec<u8> {
        (0..16).collect()
    }

    fn invert() -> PixelKernel<impl FnMut(&[u8], Option<&[u8]>) -> Vec<u8>> {
        PixelKernel::new(|input: &[u8], _: Option<&[u8]>| input.iter().map(|v| 255 - v).collect())
    }

    fn add(amount: u8) -> PixelKernel<impl FnMut(&[u8], Option<&[u8]>) -> Vec<u8>> {
        PixelKernel::new(move |input: &[u8], _: Option<&[u8]>| {
            input.iter().map(|v| v.saturating_add(amount)).collect()
        })
    }

    struct Failing;

    impl FilterKernel<HeadlessGpu> for Failing {
        fn process(&mut self, _gpu: &mut HeadlessGpu, _pass: &FilterPass) -> bool {
            false
        }
    }

    fn drawn_pixels(cache: &TextureCache<HeadlessGpu>) -> Vec<u8> {
        cache.with_backend(|gpu| {
            let quad = gpu.draws().last().cloned().unwrap();
            gpu.pixels(quad.texture).unwrap().to_vec()
        })
    }

    #[test]
    fn test_create_rejects_duplicates_and_gpu_process() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let invert_desc = FilterDescriptor::new("invert", FilterKind::ImageFilter);

        assert!(tile.create_filter(invert_desc.clone(), invert()).is_some());
        assert!(tile.create_filter(invert_desc.clone(), invert()).is_none());
        assert!(tile
            .create_filter(FilterDescriptor::new("stretch", FilterKind::GpuProcess), invert())
            .is_none());

        assert_eq!(tile.filters(), vec![invert_desc.clone()]);
        assert!(tile.has_filter(&invert_desc));
        assert_eq!(tile.get_filter(&invert_desc).unwrap().descriptor(), &invert_desc);
    }

    #[test]
    fn test_filters_run_in_order() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.create_filter(FilterDescriptor::new("invert", FilterKind::ImageFilter), invert());
        tile.create_filter(FilterDescriptor::new("add", FilterKind::ImageFilter), add(10));

        assert!(tile.setup_texture(0, &ramp()));
        assert!(tile.draw(&ViewTransform::default(), TextureFilter::Nearest));

        let expected: Vec<u8> = ramp().iter().map(|v| (255 - v).saturating_add(10)).collect();
        assert_eq!(drawn_pixels(&cache), expected);
    }

    #[test]
    fn test_empty_chain_draws_source() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.setup_texture(0, &ramp());

        assert!(tile.draw(&ViewTransform::new(0.01), TextureFilter::Nearest));

        assert_eq!(drawn_pixels(&cache), ramp());
        assert_eq!(tile.texture_index(&ViewTransform::new(0.01)), 0);
    }

    #[test]
    fn test_failing_filter_is_skipped() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.create_filter(FilterDescriptor::new("invert", FilterKind::ImageFilter), invert());
        tile.create_filter(FilterDescriptor::new("broken", FilterKind::ImageFilter), Failing);
        tile.setup_texture(0, &ramp());

        assert!(tile.draw(&ViewTransform::default(), TextureFilter::Nearest));

        let inverted: Vec<u8> = ramp().iter().map(|v| 255 - v).collect();
        assert_eq!(drawn_pixels(&cache), inverted);
    }

    #[test]
    fn test_destroy_falls_back_to_previous_result() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let invert_desc = FilterDescriptor::new("invert", FilterKind::ImageFilter);
        let add_desc = FilterDescriptor::new("add", FilterKind::ImageFilter);
        tile.create_filter(invert_desc.clone(), invert());
        tile.create_filter(add_desc.clone(), add(1));
        tile.setup_texture(0, &ramp());

        tile.destroy_filter(&add_desc);
        let inverted: Vec<u8> = ramp().iter().map(|v| 255 - v).collect();
        assert_eq!(tile.read_filter_buffer(PixelRect::covering(Extent::new(4, 4))), Some(inverted));

        tile.destroy_filter(&invert_desc);
        assert_eq!(tile.read_filter_buffer(PixelRect::covering(Extent::new(4, 4))), Some(ramp()));
        assert!(tile.filters().is_empty());
    }

    #[test]
    fn test_destroying_middle_filter_reruns_rest() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let invert_desc = FilterDescriptor::new("invert", FilterKind::ImageFilter);
        tile.create_filter(invert_desc.clone(), invert());
        tile.create_filter(FilterDescriptor::new("add", FilterKind::ImageFilter), add(1));
        tile.setup_texture(0, &ramp());

        tile.destroy_filter(&invert_desc);

        let expected: Vec<u8> = ramp().iter().map(|v| v + 1).collect();
        assert_eq!(tile.read_filter_buffer(PixelRect::covering(Extent::new(4, 4))), Some(expected));
        assert_eq!(cache.texture_count(), 2);
    }

    #[test]
    fn test_frozen_filter_keeps_result() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let add_desc = FilterDescriptor::new("add", FilterKind::ImageFilter);
        tile.create_filter(add_desc.clone(), add(1));
        tile.setup_texture(0, &ramp());

        tile.freeze_filter(&add_desc, true);
        assert!(tile.filter_freeze_flag(&add_desc));
        tile.tile_mut().free_textures();
        tile.setup_texture(0, &[100; 16]);

        assert_eq!(
            tile.read_filter_buffer(PixelRect::new(0, 0, 1, 0)),
            Some(vec![1, 2])
        );

        tile.freeze_filter(&add_desc, false);
        tile.apply_filters();
        assert_eq!(tile.read_filter_buffer(PixelRect::new(0, 0, 1, 0)), Some(vec![101, 101]));
    }

    #[test]
    fn test_reset_releases_result_buffer() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let add_desc = FilterDescriptor::new("add", FilterKind::ImageFilter);
        tile.create_filter(add_desc.clone(), add(1));
        tile.setup_texture(0, &ramp());
        assert_eq!(cache.texture_count(), 2);

        tile.reset_filter(&add_desc);

        assert_eq!(cache.texture_count(), 1);
        assert!(!tile.get_filter(&add_desc).unwrap().result().is_allocated());
        // the next draw recomputes it
        assert!(tile.draw(&ViewTransform::default(), TextureFilter::Nearest));
        assert_eq!(cache.texture_count(), 2);
    }

    #[test]
    fn test_feedback_filter_sees_previous_output() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let accumulate = PixelKernel::new(|input: &[u8], previous: Option<&[u8]>| match previous {
            Some(previous) => input.iter().zip(previous).map(|(a, b)| a.saturating_add(*b)).collect(),
            None => input.to_vec(),
        });
        tile.create_filter(FilterDescriptor::new("accumulate", FilterKind::FeedbackFilter), accumulate);
        tile.setup_texture(0, &[1; 16]);

        tile.apply_filters();
        tile.apply_filters();

        assert_eq!(tile.read_filter_buffer(PixelRect::new(0, 0, 0, 0)), Some(vec![3]));
    }

    #[test]
    fn test_read_filter_buffer_clips_to_texture() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.setup_texture(0, &ramp());

        assert_eq!(tile.read_filter_buffer(PixelRect::new(2, 2, 10, 10)), Some(vec![10, 11, 14, 15]));
        assert_eq!(tile.read_filter_buffer(PixelRect::new(8, 8, 9, 9)), Some(Vec::new()));
    }

    #[test]
    fn test_resize_reallocates_filter_results() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.create_filter(FilterDescriptor::new("add", FilterKind::ImageFilter), add(1));
        tile.setup_texture(0, &ramp());
        assert!(tile.draw(&ViewTransform::default(), TextureFilter::Nearest));

        tile.configure(PixelFormat::Luminance, Extent::new(8, 8), Extent::new(8, 8), Point::default(), 255);
        assert_eq!(cache.bytes_allocated(), 0);
        assert!(tile.setup_texture(0, &[50; 64]));
        assert!(tile.draw(&ViewTransform::default(), TextureFilter::Nearest));

        assert_eq!(drawn_pixels(&cache), vec![51; 64]);
        assert_eq!(tile.read_filter_buffer(PixelRect::covering(Extent::new(8, 8))), Some(vec![51; 64]));
        assert_eq!(cache.bytes_allocated(), 2 * 64);
    }

    #[test]
    fn test_format_change_reallocates_filter_results() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.create_filter(FilterDescriptor::new("add", FilterKind::ImageFilter), add(1));
        tile.setup_texture(0, &ramp());

        tile.configure(PixelFormat::Rgb, Extent::new(4, 4), Extent::new(4, 4), Point::default(), 255);
        assert!(tile.output().is_none());
        assert!(tile.setup_texture(0, &[50; 48]));

        assert_eq!(tile.read_filter_buffer(PixelRect::new(0, 0, 0, 0)), Some(vec![51, 51, 51]));
        assert_eq!(cache.bytes_allocated(), 2 * 48);
    }

    #[test]
    fn test_stale_result_size_is_reallocated() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let add_desc = FilterDescriptor::new("add", FilterKind::ImageFilter);
        tile.create_filter(add_desc.clone(), add(1));
        tile.freeze_filter(&add_desc, true);
        tile.setup_texture(0, &ramp());

        // resizing the inner tile leaves the chain alone
        tile.tile_mut().set_tex_size(8, 8);
        assert!(tile.setup_texture(0, &[50; 64]));

        let result = tile.get_filter(&add_desc).unwrap().result();
        assert_eq!(result.byte_size(), 64);
        assert_eq!(tile.read_filter_buffer(PixelRect::new(0, 7, 7, 7)), Some(vec![51; 8]));
    }

    #[test]
    fn test_rejected_filter_upload_falls_back_to_source() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        let add_desc = FilterDescriptor::new("add", FilterKind::ImageFilter);
        tile.create_filter(add_desc.clone(), add(1));
        tile.setup_texture(0, &ramp());

        tile.reset_filter(&add_desc);
        cache.with_backend(|gpu| gpu.refuse_next_upload());
        tile.apply_filters();

        assert!(!tile.get_filter(&add_desc).unwrap().result().is_allocated());
        assert_eq!(tile.read_filter_buffer(PixelRect::covering(Extent::new(4, 4))), Some(ramp()));
        assert_eq!(cache.texture_count(), 1);
    }

    #[test]
    fn test_free_textures_releases_filter_results() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.create_filter(FilterDescriptor::new("invert", FilterKind::ImageFilter), invert());
        tile.create_filter(FilterDescriptor::new("add", FilterKind::ImageFilter), add(1));
        tile.setup_texture(0, &ramp());
        assert_eq!(cache.texture_count(), 3);

        tile.free_textures();

        assert_eq!(cache.bytes_allocated(), 0);
        assert_eq!(cache.texture_count(), 0);
        assert_eq!(cache.with_backend(|gpu| gpu.texture_count()), 0);
        assert_eq!(tile.filters().len(), 2);
        assert!(tile.output().is_none());
    }

    #[test]
    fn test_only_level_zero_is_held() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.setup_texture(0, &ramp());

        assert!(!tile.setup_texture(1, &[0; 4]));
        assert!(!tile.compute_texture(1));
        assert!(!tile.is_texture_ready(1));
        assert_eq!(cache.texture_count(), 1);
    }

    #[test]
    fn test_warm_up_iterations() {
        let feedback = FilterDescriptor::new("accumulate", FilterKind::FeedbackFilter);
        assert_eq!(feedback.warm_up_iterations(), DEFAULT_INITIALIZATION_ITERATIONS);
        assert_eq!(feedback.clone().with_initialization_iterations(3).warm_up_iterations(), 3);
        assert_eq!(FilterDescriptor::new("add", FilterKind::ImageFilter).warm_up_iterations(), 0);
    }

    #[test]
    fn test_no_source_draws_nothing() {
        let cache = cache();
        let mut tile = small_tile(&cache);
        tile.create_filter(FilterDescriptor::new("invert", FilterKind::ImageFilter), invert());

        assert!(!tile.draw(&ViewTransform::default(), TextureFilter::Nearest));
        assert!(tile.read_filter_buffer(PixelRect::new(0, 0, 1, 1)).is_none());
    }
}
