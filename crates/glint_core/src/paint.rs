//! Paint resolution: blend modes, stroke geometry and fill styles

use std::sync::Arc;

use crate::color::Color;

/// Porter-Duff and separable blend modes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Clear,
    Src,
    Dst,
    #[default]
    SrcOver,
    DstOver,
    SrcIn,
    DstIn,
    SrcOut,
    DstOut,
    SrcATop,
    DstATop,
    Xor,
    Plus,
    Modulate,
    Screen,
}

impl BlendMode {
    /// True if drawing fully-transparent source content changes nothing
    pub fn transparent_src_is_noop(&self) -> bool {
        matches!(
            self,
            BlendMode::SrcOver
                | BlendMode::DstOver
                | BlendMode::DstOut
                | BlendMode::SrcATop
                | BlendMode::Xor
                | BlendMode::Plus
        )
    }

    /// Stable discriminant for pipeline keys
    pub fn as_key(&self) -> u32 {
        *self as u32
    }
}

/// A programmable color source, resolved per-fragment downstream.
/// Opaque to the engine except for solid-color folding.
pub trait Shader: Send + Sync {
    /// Some(color) if the shader produces a single uniform color,
    /// letting the engine fold it into the paint color
    fn as_solid_color(&self) -> Option<Color> {
        None
    }

    /// Stable discriminant of the fragment logic this shader needs.
    /// Shaders sharing a class share one compiled program.
    fn program_class(&self) -> u32 {
        0
    }
}

/// A per-pixel color transform applied after the shader. Opaque.
pub trait ColorFilter: Send + Sync {
    /// Stable discriminant of the fragment logic this filter needs
    fn program_class(&self) -> u32 {
        0
    }
}

/// A coverage-modifying filter applied to the shape mask. Opaque.
pub trait MaskFilter: Send + Sync {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

/// Stroke geometry parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub width: f32,
    pub cap: LineCap,
    pub join: LineJoin,
    pub miter_limit: f32,
}

impl Default for Stroke {
    fn default() -> Self {
        Self {
            width: 1.0,
            cap: LineCap::Butt,
            join: LineJoin::Miter,
            miter_limit: 4.0,
        }
    }
}

impl Stroke {
    pub fn new(width: f32) -> Self {
        Self {
            width,
            ..Default::default()
        }
    }
}

/// Texture sampling filter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Mipmap selection behavior
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MipmapMode {
    #[default]
    None,
    Nearest,
    Linear,
}

/// How image content is sampled when drawn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplingOptions {
    pub filter: FilterMode,
    pub mipmap: MipmapMode,
}

/// User-facing paint: everything that controls how a shape is filled
/// or stroked
#[derive(Clone)]
pub struct Paint {
    pub color: Color,
    pub alpha: f32,
    pub blend_mode: BlendMode,
    pub anti_alias: bool,
    pub shader: Option<Arc<dyn Shader>>,
    pub color_filter: Option<Arc<dyn ColorFilter>>,
    pub mask_filter: Option<Arc<dyn MaskFilter>>,
    pub stroke: Option<Stroke>,
}

impl Default for Paint {
    fn default() -> Self {
        Self::new()
    }
}

impl Paint {
    pub fn new() -> Self {
        Self {
            color: Color::BLACK,
            alpha: 1.0,
            blend_mode: BlendMode::SrcOver,
            anti_alias: true,
            shader: None,
            color_filter: None,
            mask_filter: None,
            stroke: None,
        }
    }

    pub fn fill(color: Color) -> Self {
        Self {
            color,
            ..Self::new()
        }
    }

    pub fn stroke(color: Color, stroke: Stroke) -> Self {
        Self {
            color,
            stroke: Some(stroke),
            ..Self::new()
        }
    }

    /// True if drawing with this paint can have no visible effect,
    /// regardless of geometry
    pub fn nothing_to_draw(&self) -> bool {
        match self.blend_mode {
            BlendMode::Dst => true,
            mode if mode.transparent_src_is_noop() => {
                self.alpha <= 0.0 || (self.shader.is_none() && self.color.is_transparent())
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Paint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paint")
            .field("color", &self.color)
            .field("alpha", &self.alpha)
            .field("blend_mode", &self.blend_mode)
            .field("anti_alias", &self.anti_alias)
            .field("has_shader", &self.shader.is_some())
            .field("has_color_filter", &self.color_filter.is_some())
            .field("has_mask_filter", &self.mask_filter.is_some())
            .field("stroke", &self.stroke)
            .finish()
    }
}

/// Resolved fill parameters handed down the draw-context chain.
///
/// Derived once per draw call from a [`Paint`]; the color is
/// premultiplied and solid-color shaders are already folded in.
#[derive(Clone, Default)]
pub struct FillStyle {
    pub color: Color,
    pub shader: Option<Arc<dyn Shader>>,
    pub color_filter: Option<Arc<dyn ColorFilter>>,
    pub mask_filter: Option<Arc<dyn MaskFilter>>,
    pub blend_mode: BlendMode,
    pub anti_alias: bool,
}

impl FillStyle {
    pub fn from_paint(paint: &Paint) -> Self {
        let mut shader = paint.shader.clone();
        let color = match shader.as_ref().and_then(|s| s.as_solid_color()) {
            Some(mut solid) => {
                solid.a *= paint.alpha;
                shader = None;
                solid.premultiply()
            }
            None => paint.color.with_alpha(paint.color.a * paint.alpha).premultiply(),
        };
        Self {
            color,
            shader,
            color_filter: paint.color_filter.clone(),
            mask_filter: paint.mask_filter.clone(),
            blend_mode: paint.blend_mode,
            anti_alias: paint.anti_alias,
        }
    }

    /// True if nothing modifies the source color besides the color
    /// itself; a precondition for the draw-as-clear fast path
    pub fn has_only_color(&self) -> bool {
        self.shader.is_none() && self.color_filter.is_none() && self.mask_filter.is_none()
    }

    /// The style with `alpha` multiplied in
    pub fn with_alpha(&self, alpha: f32) -> Self {
        if alpha >= 1.0 {
            return self.clone();
        }
        let mut style = self.clone();
        // Color is premultiplied; alpha scales every channel.
        style.color.r *= alpha;
        style.color.g *= alpha;
        style.color.b *= alpha;
        style.color.a *= alpha;
        style
    }
}

impl std::fmt::Debug for FillStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FillStyle")
            .field("color", &self.color)
            .field("blend_mode", &self.blend_mode)
            .field("anti_alias", &self.anti_alias)
            .field("has_shader", &self.shader.is_some())
            .field("has_color_filter", &self.color_filter.is_some())
            .field("has_mask_filter", &self.mask_filter.is_some())
            .finish()
    }
}
