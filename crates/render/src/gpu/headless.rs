//! In-memory GPU backend
//!
//! Keeps texture contents in host memory and records draw calls. Used for
//! headless rendering (thumbnails, batch export) and in tests. An optional
//! capacity makes allocations fail the way a full device does.

use std::collections::HashMap;

use rasterview_cache::{AllocationError, TextureBackend, TextureId};

use super::{ContextId, ContextSwitch, GpuBackend, TexturedQuad, UploadError};
use crate::geometry::{Extent, PixelFormat, TextureFilter};

#[derive(Debug, Default)]
struct HeadlessTexture {
    bytes: usize,
    extent: Extent,
    format: PixelFormat,
    pixels: Vec<u8>,
}

/// GPU backend without a GPU
#[derive(Debug)]
pub struct HeadlessGpu {
    capacity: usize,
    used: usize,
    next_id: u32,
    textures: HashMap<TextureId, HeadlessTexture>,
    bound: Option<TextureId>,
    filter: TextureFilter,
    blending: bool,
    context: Option<ContextId>,
    context_switches: usize,
    draws: Vec<TexturedQuad>,
    uploads: usize,
    refused_uploads: usize,
    reads: usize,
}

impl HeadlessGpu {
    /// Backend with unlimited memory
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Backend that refuses allocations beyond `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            next_id: 0,
            textures: HashMap::new(),
            bound: None,
            filter: TextureFilter::default(),
            blending: false,
            context: None,
            context_switches: 0,
            draws: Vec::new(),
            uploads: 0,
            refused_uploads: 0,
            reads: 0,
        }
    }

    /// Change the device capacity; existing textures are kept
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Bytes held by live textures
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Contents of a texture as last uploaded
    pub fn pixels(&self, id: TextureId) -> Option<&[u8]> {
        self.textures.get(&id).map(|t| t.pixels.as_slice())
    }

    pub fn bound_texture(&self) -> Option<TextureId> {
        self.bound
    }

    pub fn texture_filter(&self) -> TextureFilter {
        self.filter
    }

    pub fn blending(&self) -> bool {
        self.blending
    }

    pub fn context_switches(&self) -> usize {
        self.context_switches
    }

    /// Quads drawn so far
    pub fn draws(&self) -> &[TexturedQuad] {
        &self.draws
    }

    /// Drain the recorded quads, e.g. at the end of a frame
    pub fn take_draws(&mut self) -> Vec<TexturedQuad> {
        std::mem::take(&mut self.draws)
    }

    /// Make the next upload fail as a device error would
    pub fn refuse_next_upload(&mut self) {
        self.refused_uploads += 1;
    }

    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureBackend for HeadlessGpu {
    fn create_texture(&mut self, bytes: usize) -> Result<TextureId, AllocationError> {
        if bytes == 0 {
            return Err(AllocationError::InvalidSize { requested: bytes });
        }
        if self.used.saturating_add(bytes) > self.capacity {
            return Err(AllocationError::OutOfMemory { requested: bytes });
        }

        self.next_id += 1;
        let id = TextureId::new(self.next_id).ok_or(AllocationError::InvalidSize { requested: bytes })?;
        self.used += bytes;
        self.textures.insert(id, HeadlessTexture { bytes, ..Default::default() });
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            self.used -= texture.bytes;
        }
        if self.bound == Some(id) {
            self.bound = None;
        }
    }

    fn bind_texture(&mut self, id: TextureId) {
        self.bound = Some(id);
    }
}

impl ContextSwitch for HeadlessGpu {
    fn current_context(&self) -> Option<ContextId> {
        self.context
    }

    fn make_current(&mut self, context: Option<ContextId>) {
        self.context = context;
        self.context_switches += 1;
    }
}

impl GpuBackend for HeadlessGpu {
    fn upload_texture(
        &mut self,
        id: TextureId,
        extent: Extent,
        format: PixelFormat,
        pixels: &[u8],
    ) -> Result<(), UploadError> {
        let texture = self.textures.get_mut(&id).ok_or(UploadError::UnknownTexture(id))?;
        if self.refused_uploads > 0 {
            self.refused_uploads -= 1;
            return Err(UploadError::Rejected(id));
        }
        let needed = extent.area() * format.channels();
        if needed > texture.bytes {
            return Err(UploadError::TooLarge { id, needed, capacity: texture.bytes });
        }
        if pixels.len() < needed {
            return Err(UploadError::ShortBuffer { needed, actual: pixels.len() });
        }
        texture.extent = extent;
        texture.format = format;
        texture.pixels = pixels[..needed].to_vec();
        self.uploads += 1;
        Ok(())
    }

    fn read_texture(&mut self, id: TextureId, extent: Extent, format: PixelFormat) -> Option<Vec<u8>> {
        let texture = self.textures.get(&id)?;
        if texture.extent != extent || texture.format != format || texture.pixels.is_empty() {
            return None;
        }
        self.reads += 1;
        Some(texture.pixels.clone())
    }

    fn set_texture_filter(&mut self, filter: TextureFilter) {
        self.filter = filter;
    }

    fn set_blending(&mut self, enabled: bool) {
        self.blending = enabled;
    }

    fn draw_quad(&mut self, quad: &TexturedQuad) {
        self.draws.push(quad.clone());
    }
}
