//! GPU drawing engine core
//!
//! Translates canvas-style draw calls into operations against an
//! abstract GPU backend.
//!
//! # Features
//!
//! - Save/restore drawing state with transform, alpha, blend and clip
//! - Clip resolution: scissor, analytic coverage or cached mask
//! - Fill strategy selection: clear, primitive op, CPU triangulation
//!   or coverage mask
//! - Byte-budgeted resource cache with LRU eviction and scratch
//!   recycling
//! - Compiled-program cache keyed by pipeline configuration
//!
//! Geometry and paint value types live in `glint_core`; the native
//! graphics API sits behind the [`GpuBackend`] trait.

pub mod backend;
pub mod cache;
pub mod canvas;
pub mod clip;
pub mod context;
pub mod fill;
pub mod key;
pub mod raster;
pub mod state;
pub mod surface;

pub use backend::{
    BackendError, BackendEvent, BufferDescriptor, BufferKind, DrawSubmission, DrawUniforms,
    FragmentStage, GeometryLayout, GpuBackend, PipelineDescription, ProgramHandle,
    RecordingBackend, ResourceDescriptor, ResourceHandle, TextureDescriptor, TextureFormat,
};
pub use cache::{
    ProgramCache, ResourceCache, ResourceCacheOptions, ResourceId, ResourceRef, MAX_PROGRAM_COUNT,
};
pub use canvas::Canvas;
pub use clip::{ClipClass, SurfaceOrigin, PIXEL_ALIGN_EPSILON};
pub use context::{Context, DrawContext, RenderContext, RenderTarget, TransformContext};
pub use fill::{AaMode, FillStrategy};
pub use key::{BytesKey, UniqueId, UniqueKey};
pub use raster::{
    CoverageMask, CoverageRasterizer, Glyph, GlyphRun, Image, ImagePixels, StrokeExpander,
};
pub use state::{DrawState, StateStack};
pub use surface::{Surface, SurfaceDescriptor};
