//! GPU abstraction used by tiles
//!
//! [`GpuBackend`] extends the cache's [`TextureBackend`] with what drawing
//! needs: pixel upload and read-back, filter and blend state, quad emission
//! and GL context switching.

mod context;
mod headless;

pub use context::{ContextGuard, ContextId, ContextSwitch};
pub use headless::HeadlessGpu;

use rasterview_cache::{TextureBackend, TextureId};
use thiserror::Error;

use crate::geometry::{Extent, PixelFormat, Point, TextureFilter};

/// One textured quadrilateral
#[derive(Debug, Clone, PartialEq)]
pub struct TexturedQuad {
    pub texture: TextureId,
    pub filter: TextureFilter,
    /// Modulation colour; the alpha channel carries the tile alpha
    pub color: [u8; 4],
    /// Corners in image space, in drawing order
    pub vertices: [Point; 4],
    /// Normalized texture coordinates matching `vertices`
    pub tex_coords: [Point; 4],
}

/// Reasons a texture upload is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("texture {0} does not exist")]
    UnknownTexture(TextureId),

    #[error("device rejected upload to texture {0}")]
    Rejected(TextureId),

    #[error("upload of {needed} bytes does not fit texture {id} ({capacity} bytes)")]
    TooLarge { id: TextureId, needed: usize, capacity: usize },

    #[error("pixel buffer holds {actual} bytes, upload needs {needed}")]
    ShortBuffer { needed: usize, actual: usize },
}

/// Drawing operations needed by tiles
pub trait GpuBackend: TextureBackend + ContextSwitch {
    /// Replace the contents of texture `id` with `pixels`
    ///
    /// # Arguments
    ///
    /// * `id` - Texture previously returned by `create_texture`
    /// * `extent` - Texel dimensions of the upload
    /// * `format` - Channel layout of `pixels`
    /// * `pixels` - At least `extent.area() * format.channels()` bytes, row-major
    ///
    /// # Returns
    ///
    /// An error if the texture is unknown, too small for the upload, the
    /// buffer is short or the device fails. The texture contents are
    /// unchanged in that case.
    fn upload_texture(
        &mut self,
        id: TextureId,
        extent: Extent,
        format: PixelFormat,
        pixels: &[u8],
    ) -> Result<(), UploadError>;

    /// Read back the contents of texture `id`
    fn read_texture(&mut self, id: TextureId, extent: Extent, format: PixelFormat) -> Option<Vec<u8>>;

    /// Magnification/minification filter for the bound texture
    fn set_texture_filter(&mut self, filter: TextureFilter);

    /// Enable or disable source-alpha blending
    fn set_blending(&mut self, enabled: bool);

    /// Emit a textured quad using the bound texture
    fn draw_quad(&mut self, quad: &TexturedQuad);
}
