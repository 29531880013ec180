//! Glint geometry and paint value types
//!
//! Pure value types shared by the rest of the engine:
//!
//! - Points, rectangles, rounded rectangles and 2D affine matrices
//! - Vector paths with rect/rounded-rect recognition
//! - Colors, blend modes and paint resolution
//!
//! Nothing in this crate touches the GPU, performs caching, or holds
//! shared state.

pub mod color;
pub mod geometry;
pub mod paint;
pub mod path;

pub use color::Color;
pub use geometry::{Matrix, Point, RRect, Rect};
pub use paint::{
    BlendMode, ColorFilter, FillStyle, FilterMode, LineCap, LineJoin, MaskFilter, MipmapMode,
    Paint, SamplingOptions, Shader, Stroke,
};
pub use path::{ClipPath, Path, PathBuilder, PathCommand};
