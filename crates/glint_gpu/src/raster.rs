//! External rasterization and shaping collaborators
//!
//! Glyph rasterization, CPU path rasterization for masks, and stroke
//! outline expansion are not part of the engine; they are consumed
//! through the service traits here as "produce a bitmap / outline for
//! this content".

use std::borrow::Cow;
use std::cell::RefCell;
use std::sync::Arc;

use glint_core::{ClipPath, Matrix, Path, Point, Rect, Stroke};

use crate::cache::ResourceRef;
use crate::key::UniqueKey;

/// A single-channel coverage bitmap sized to a device-space rect
#[derive(Clone, Debug)]
pub struct CoverageMask {
    pub width: u32,
    pub height: u32,
    /// Row-major, one byte per pixel, 255 = full coverage
    pub data: Vec<u8>,
}

impl CoverageMask {
    pub fn is_valid(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize)
    }
}

/// One positioned glyph in a run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Glyph {
    pub id: u32,
    pub position: Point,
}

/// A shaped run of glyphs from one font at one size. Shaping happens
/// upstream; the engine treats the run as opaque geometry.
#[derive(Clone, Debug)]
pub struct GlyphRun {
    pub font_id: u32,
    pub size: f32,
    pub glyphs: Vec<Glyph>,
}

impl GlyphRun {
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

/// CPU rasterization service: turns device-space geometry into
/// coverage bitmaps for mask textures.
///
/// `bounds` is the whole-pixel device rect the mask maps onto; the
/// returned bitmap must match its dimensions. `None` means the content
/// cannot be rasterized and the requesting draw is skipped.
pub trait CoverageRasterizer {
    /// Coverage of `path` (already in device space) over `bounds`
    fn rasterize_path(&self, path: &Path, bounds: Rect) -> Option<CoverageMask>;

    /// Coverage of the accumulated clip over `bounds`; the result is
    /// the product of the clip elements' coverages
    fn rasterize_clip(&self, clip: &ClipPath, bounds: Rect) -> Option<CoverageMask>;

    /// Coverage of a glyph run under `matrix` over `bounds`
    fn rasterize_glyphs(&self, run: &GlyphRun, matrix: &Matrix, bounds: Rect)
        -> Option<CoverageMask>;
}

/// Stroke outline expansion service: reduces stroking to filling by
/// producing the outline of the stroked path. `None` when the stroke
/// cannot be expanded (degenerate width, empty path).
pub trait StrokeExpander {
    fn expand(&self, path: &Path, stroke: &Stroke) -> Option<Path>;
}

/// Decoded image pixels, produced by an upstream decoder
pub trait ImagePixels: Send + Sync {
    /// Tightly packed RGBA8 rows
    fn pixels(&self) -> Cow<'_, [u8]>;
}

/// An immutable image the engine can draw.
///
/// The GPU texture for an image is cached in the resource cache under
/// the image's identity key; the image holds the external ref, so the
/// texture stays resident exactly as long as some image handle does.
pub struct Image {
    width: u32,
    height: u32,
    key: UniqueKey,
    source: Arc<dyn ImagePixels>,
    cached: RefCell<Option<ResourceRef>>,
}

impl Image {
    pub fn new(width: u32, height: u32, source: Arc<dyn ImagePixels>) -> Self {
        Self {
            width,
            height,
            key: UniqueKey::next(),
            source,
            cached: RefCell::new(None),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_wh(self.width as f32, self.height as f32)
    }

    /// Stable content identity used to key the cached texture
    pub fn unique_key(&self) -> UniqueKey {
        self.key
    }

    pub fn pixels(&self) -> Cow<'_, [u8]> {
        self.source.pixels()
    }

    pub(crate) fn cached_texture(&self) -> Option<ResourceRef> {
        self.cached.borrow().clone()
    }

    pub(crate) fn set_cached_texture(&self, texture: ResourceRef) {
        *self.cached.borrow_mut() = Some(texture);
    }

    pub(crate) fn clear_cached_texture(&self) {
        *self.cached.borrow_mut() = None;
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("key", &self.key)
            .finish()
    }
}
