//! Geometry, pixel formats and view projection

/// A point in image or screen space
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The extent shrunk by `2^shift` in both axes, never below 1×1
    pub fn shrink(&self, shift: u32) -> Self {
        Self::new((self.width >> shift).max(1), (self.height >> shift).max(1))
    }
}

/// Inclusive pixel rectangle (`left..=right`, `top..=bottom`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl PixelRect {
    pub const fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self { left, top, right, bottom }
    }

    /// The whole of an image of the given size
    pub fn covering(extent: Extent) -> Self {
        Self::new(0, 0, extent.width as i64 - 1, extent.height as i64 - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.right < self.left || self.bottom < self.top
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            (self.right - self.left + 1) as u32
        }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            (self.bottom - self.top + 1) as u32
        }
    }

    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        PixelRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        )
    }
}

/// Channel layout of tile pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Luminance,
    LuminanceAlpha,
    Rgb,
    Rgba,
}

impl PixelFormat {
    /// Bytes per pixel (one byte per channel)
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Luminance => 1,
            PixelFormat::LuminanceAlpha => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    /// Whether pixels carry their own alpha and must be blended
    pub fn has_alpha(&self) -> bool {
        matches!(self, PixelFormat::LuminanceAlpha | PixelFormat::Rgba)
    }
}

/// Texture magnification/minification filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

/// Maps image coordinates to screen pixels
pub trait Projection {
    fn project(&self, point: Point) -> Point;
}

/// Axis-aligned scale and translation from image to screen space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ViewTransform {
    /// Uniform zoom: `scale` screen pixels per image pixel
    pub fn new(scale: f64) -> Self {
        Self { scale_x: scale, scale_y: scale, offset_x: 0.0, offset_y: 0.0 }
    }

    pub fn with_scales(mut self, scale_x: f64, scale_y: f64) -> Self {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self
    }

    pub fn with_offset(mut self, offset_x: f64, offset_y: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Projection for ViewTransform {
    fn project(&self, point: Point) -> Point {
        Point::new(point.x * self.scale_x + self.offset_x, point.y * self.scale_y + self.offset_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_shrink() {
        let extent = Extent::new(512, 300);
        assert_eq!(extent.shrink(0), extent);
        assert_eq!(extent.shrink(2), Extent::new(128, 75));
        assert_eq!(Extent::new(2, 2).shrink(3), Extent::new(1, 1));
    }

    #[test]
    fn test_pixel_rect_intersection() {
        let image = PixelRect::covering(Extent::new(1000, 800));
        let view = PixelRect::new(-50, 100, 400, 2000);
        let visible = image.intersect(&view);

        assert_eq!(visible, PixelRect::new(0, 100, 400, 799));
        assert_eq!(visible.width(), 401);
        assert!(image.intersect(&PixelRect::new(1200, 0, 1300, 10)).is_empty());
    }

    #[test]
    fn test_format_channels() {
        assert_eq!(PixelFormat::Luminance.channels(), 1);
        assert_eq!(PixelFormat::LuminanceAlpha.channels(), 2);
        assert_eq!(PixelFormat::Rgb.channels(), 3);
        assert_eq!(PixelFormat::Rgba.channels(), 4);
        assert!(PixelFormat::Rgba.has_alpha());
        assert!(!PixelFormat::Rgb.has_alpha());
    }

    #[test]
    fn test_view_transform() {
        let view = ViewTransform::new(2.0).with_offset(10.0, -5.0);
        assert_eq!(view.project(Point::new(3.0, 4.0)), Point::new(16.0, 3.0));
    }
}
