//! Fill strategy selection
//!
//! Every filled shape is lowered through the same preference order:
//! replace the draw with a buffer clear when legal, emit a specialized
//! rect/rounded-rect op, triangulate the path on the CPU, and only as
//! a last resort rasterize it to a coverage mask and composite. Each
//! strategy is attempted only when the previous one is inapplicable.

use glint_core::{Color, FillStyle, Matrix, Path, RRect, Rect};
use lyon::tessellation::{
    BuffersBuilder, FillOptions, FillTessellator, FillVertex, VertexBuffers,
};
use lyon::math::point;
use lyon::path::Path as LyonPath;

use crate::clip::PIXEL_ALIGN_EPSILON;
use crate::state::DrawState;

use glint_core::{BlendMode, PathCommand, Point};

/// A vertex for engine-generated geometry
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
    pub coverage: f32,
    pub uv: [f32; 2],
}

/// CPU-side triangle mesh ready for upload
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }
}

/// Antialiasing mode for one draw, chosen orthogonally to the fill
/// strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AaMode {
    /// The target is multisampled; geometry needs no coverage work
    Msaa,
    /// Per-fragment / per-vertex coverage
    Coverage,
    /// Exact pixel coverage, no antialiasing needed
    None,
}

/// Pick the AA mode for a draw. `device_rect` is Some for shapes whose
/// device footprint is an axis-aligned rect.
pub fn select_aa_mode(
    anti_alias: bool,
    sample_count: u32,
    matrix: &Matrix,
    device_rect: Option<&Rect>,
) -> AaMode {
    if !anti_alias {
        return AaMode::None;
    }
    if sample_count > 1 {
        return AaMode::Msaa;
    }
    let exact = matrix.rects_stay_rects()
        && device_rect.is_some_and(|r| r.is_pixel_aligned(PIXEL_ALIGN_EPSILON));
    if exact {
        AaMode::None
    } else {
        AaMode::Coverage
    }
}

/// Checks whether filling `rect` can be replaced by a direct buffer
/// clear: no color-modifying effects, a rect-preserving transform, and
/// a pixel-aligned device footprint. Returns the device rect to clear
/// and the clear color.
pub fn draw_as_clear(rect: &Rect, state: &DrawState, style: &FillStyle) -> Option<(Rect, Color)> {
    if !style.has_only_color() {
        return None;
    }
    let color = match style.blend_mode {
        BlendMode::Clear => Color::TRANSPARENT,
        BlendMode::Src => style.color,
        BlendMode::SrcOver if style.color.is_opaque() => style.color,
        _ => return None,
    };
    if !state.matrix.rects_stay_rects() {
        return None;
    }
    let device = state.matrix.map_rect(rect);
    if !device.is_pixel_aligned(PIXEL_ALIGN_EPSILON) {
        return None;
    }
    Some((device.round(), color))
}

/// How a filled path will be rendered, after the clear fast path has
/// already been ruled out
#[derive(Debug)]
pub enum FillStrategy {
    /// Specialized rect / rounded-rect vertex op, no mask
    Primitive {
        mesh: Mesh,
        /// Device-space (rect, radius_x, radius_y) when analytic
        /// rounded-rect coverage is required
        rrect: Option<(Rect, f32, f32)>,
    },
    /// Triangle mesh produced by the tessellation routine
    Triangulated { mesh: Mesh },
    /// Rasterize to a coverage texture over the given whole-pixel
    /// device rect and composite it as a masked fill
    Masked { bounds: Rect },
}

/// Select the strategy for a filled (non-stroked) path.
///
/// `clip_bounds` is the device-space region that can possibly be
/// affected; mask bounds never exceed it.
pub fn select_path_fill(
    path: &Path,
    state: &DrawState,
    style: &FillStyle,
    clip_bounds: Rect,
    aa: AaMode,
) -> Option<FillStrategy> {
    let color = color_array(style);
    if let Some(rect) = path.as_rect() {
        if state.matrix.rects_stay_rects() {
            let device = state.matrix.map_rect(&rect);
            if device.is_empty() {
                return None;
            }
            let mesh = rect_mesh(device, color, aa);
            return Some(FillStrategy::Primitive { mesh, rrect: None });
        }
    }
    if let Some(rrect) = path.as_rrect() {
        if state.matrix.is_translate_scale() && !rrect.is_rect() {
            return Some(rrect_primitive(&rrect, state, color, aa));
        }
    }
    let device_path = path.transform(&state.matrix);
    if triangulation_is_safe(&device_path) {
        if let Some(mesh) = triangulate(&device_path, color) {
            return Some(FillStrategy::Triangulated { mesh });
        }
    }
    let bounds = device_path.bounds().round_out().intersect(&clip_bounds.round_out());
    if bounds.is_empty() {
        return None;
    }
    Some(FillStrategy::Masked { bounds })
}

fn color_array(style: &FillStyle) -> [f32; 4] {
    [style.color.r, style.color.g, style.color.b, style.color.a]
}

fn rrect_primitive(rrect: &RRect, state: &DrawState, color: [f32; 4], aa: AaMode) -> FillStrategy {
    let device_rect = state.matrix.map_rect(&rrect.rect);
    let rx = rrect.radii.x * state.matrix.a;
    let ry = rrect.radii.y * state.matrix.d;
    // The coverage quad; analytic coverage trims it to the rounded shape.
    let quad = if aa == AaMode::Coverage {
        device_rect.inset(-0.5, -0.5)
    } else {
        device_rect
    };
    FillStrategy::Primitive {
        mesh: quad_mesh(quad, color, 1.0),
        rrect: Some((device_rect, rx, ry)),
    }
}

/// Quad with per-corner coverage antialiasing: an inner full-coverage
/// quad ringed by a half-pixel zero-coverage fringe
pub fn rect_mesh(device: Rect, color: [f32; 4], aa: AaMode) -> Mesh {
    if aa != AaMode::Coverage {
        return quad_mesh(device, color, 1.0);
    }
    let inner = device.inset(0.5, 0.5);
    if inner.is_empty() {
        // Too thin for a fringe; a plain quad with reduced coverage
        // approximates the sliver.
        let coverage = (device.width.min(device.height)).clamp(0.0, 1.0);
        return quad_mesh(device.inset(-0.5, -0.5), color, coverage);
    }
    let outer = device.inset(-0.5, -0.5);
    let mut mesh = Mesh::default();
    for rect in [inner, outer] {
        let coverage = if rect == inner { 1.0 } else { 0.0 };
        for corner in rect_corners(rect) {
            mesh.vertices.push(Vertex {
                position: [corner.x, corner.y],
                color,
                coverage,
                uv: [0.0, 0.0],
            });
        }
    }
    // Inner quad.
    mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
    // Fringe ring between inner (0..4) and outer (4..8).
    for i in 0..4u32 {
        let j = (i + 1) % 4;
        mesh.indices
            .extend_from_slice(&[4 + i, 4 + j, j, 4 + i, j, i]);
    }
    mesh
}

/// Plain quad with uniform coverage, uv spanning 0..1
pub fn quad_mesh(device: Rect, color: [f32; 4], coverage: f32) -> Mesh {
    let corners = rect_corners(device);
    let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
    Mesh {
        vertices: corners
            .iter()
            .zip(uvs)
            .map(|(corner, uv)| Vertex {
                position: [corner.x, corner.y],
                color,
                coverage,
                uv,
            })
            .collect(),
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

fn rect_corners(rect: Rect) -> [Point; 4] {
    [
        Point::new(rect.left(), rect.top()),
        Point::new(rect.right(), rect.top()),
        Point::new(rect.right(), rect.bottom()),
        Point::new(rect.left(), rect.bottom()),
    ]
}

/// Tessellate a device-space path into triangles. `None` when the
/// tessellator rejects the geometry; the caller falls back to a mask.
pub fn triangulate(path: &Path, color: [f32; 4]) -> Option<Mesh> {
    let lyon_path = to_lyon_path(path)?;
    let mut buffers: VertexBuffers<Vertex, u32> = VertexBuffers::new();
    let mut tessellator = FillTessellator::new();
    let result = tessellator.tessellate_path(
        &lyon_path,
        &FillOptions::tolerance(0.25),
        &mut BuffersBuilder::new(&mut buffers, |vertex: FillVertex| {
            let p = vertex.position();
            Vertex {
                position: [p.x, p.y],
                color,
                coverage: 1.0,
                uv: [0.0, 0.0],
            }
        }),
    );
    if result.is_err() || buffers.vertices.is_empty() {
        return None;
    }
    Some(Mesh {
        vertices: buffers.vertices,
        indices: buffers.indices,
    })
}

fn to_lyon_path(path: &Path) -> Option<LyonPath> {
    if path.is_empty() {
        return None;
    }
    let mut builder = LyonPath::builder();
    let mut open = false;
    for cmd in path.commands() {
        match *cmd {
            PathCommand::MoveTo(p) => {
                if open {
                    builder.end(false);
                }
                builder.begin(point(p.x, p.y));
                open = true;
            }
            PathCommand::LineTo(p) => {
                if !open {
                    builder.begin(point(p.x, p.y));
                    open = true;
                } else {
                    builder.line_to(point(p.x, p.y));
                }
            }
            PathCommand::QuadTo { control, end } => {
                if !open {
                    builder.begin(point(control.x, control.y));
                    open = true;
                }
                builder.quadratic_bezier_to(point(control.x, control.y), point(end.x, end.y));
            }
            PathCommand::CubicTo {
                control1,
                control2,
                end,
            } => {
                if !open {
                    builder.begin(point(control1.x, control1.y));
                    open = true;
                }
                builder.cubic_bezier_to(
                    point(control1.x, control1.y),
                    point(control2.x, control2.y),
                    point(end.x, end.y),
                );
            }
            PathCommand::Close => {
                if open {
                    builder.end(true);
                    open = false;
                }
            }
        }
    }
    if open {
        builder.end(false);
    }
    Some(builder.build())
}

/// Conservative pre-check for the triangulation strategy: a single
/// contour with no self-intersections. Paths needing fill-rule
/// resolution go to the mask fallback instead, where the rasterizer
/// handles winding correctly.
pub fn triangulation_is_safe(path: &Path) -> bool {
    let contours = path
        .commands()
        .iter()
        .filter(|c| matches!(c, PathCommand::MoveTo(_)))
        .count();
    if contours > 1 {
        return false;
    }
    let segments = flatten(path);
    for i in 0..segments.len() {
        for j in (i + 2)..segments.len() {
            // Skip the adjacency wrap between last and first.
            if i == 0 && j == segments.len() - 1 {
                continue;
            }
            if segments_intersect(segments[i], segments[j]) {
                return false;
            }
        }
    }
    true
}

const CURVE_FLATTEN_STEPS: usize = 8;

fn flatten(path: &Path) -> Vec<(Point, Point)> {
    let mut segments = Vec::new();
    let mut current = Point::ZERO;
    let mut start = Point::ZERO;
    for cmd in path.commands() {
        match *cmd {
            PathCommand::MoveTo(p) => {
                current = p;
                start = p;
            }
            PathCommand::LineTo(p) => {
                segments.push((current, p));
                current = p;
            }
            PathCommand::QuadTo { control, end } => {
                let mut prev = current;
                for step in 1..=CURVE_FLATTEN_STEPS {
                    let t = step as f32 / CURVE_FLATTEN_STEPS as f32;
                    let p = quad_at(current, control, end, t);
                    segments.push((prev, p));
                    prev = p;
                }
                current = end;
            }
            PathCommand::CubicTo {
                control1,
                control2,
                end,
            } => {
                let mut prev = current;
                for step in 1..=CURVE_FLATTEN_STEPS {
                    let t = step as f32 / CURVE_FLATTEN_STEPS as f32;
                    let p = cubic_at(current, control1, control2, end, t);
                    segments.push((prev, p));
                    prev = p;
                }
                current = end;
            }
            PathCommand::Close => {
                if current != start {
                    segments.push((current, start));
                    current = start;
                }
            }
        }
    }
    segments
}

fn quad_at(p0: Point, c: Point, p1: Point, t: f32) -> Point {
    let u = 1.0 - t;
    Point::new(
        u * u * p0.x + 2.0 * u * t * c.x + t * t * p1.x,
        u * u * p0.y + 2.0 * u * t * c.y + t * t * p1.y,
    )
}

fn cubic_at(p0: Point, c1: Point, c2: Point, p1: Point, t: f32) -> Point {
    let u = 1.0 - t;
    Point::new(
        u * u * u * p0.x + 3.0 * u * u * t * c1.x + 3.0 * u * t * t * c2.x + t * t * t * p1.x,
        u * u * u * p0.y + 3.0 * u * u * t * c1.y + 3.0 * u * t * t * c2.y + t * t * t * p1.y,
    )
}

fn orient(a: Point, b: Point, c: Point) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn segments_intersect(s1: (Point, Point), s2: (Point, Point)) -> bool {
    let (a, b) = s1;
    let (c, d) = s2;
    // Shared endpoints are adjacency, not intersection.
    if a == c || a == d || b == c || b == d {
        return false;
    }
    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);
    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::{PathBuilder, Paint};

    fn state(matrix: Matrix) -> DrawState {
        let mut s = DrawState::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        s.matrix = matrix;
        s
    }

    fn solid_style(color: Color, blend: BlendMode) -> FillStyle {
        let mut paint = Paint::fill(color);
        paint.blend_mode = blend;
        FillStyle::from_paint(&paint)
    }

    #[test]
    fn aligned_opaque_src_rect_clears() {
        let style = solid_style(Color::rgb(1.0, 0.0, 0.0), BlendMode::Src);
        let got = draw_as_clear(
            &Rect::new(10.0, 10.0, 20.0, 20.0),
            &state(Matrix::identity()),
            &style,
        );
        let (rect, color) = got.expect("clear applies");
        assert_eq!(rect, Rect::new(10.0, 10.0, 20.0, 20.0));
        assert_eq!(color, Color::rgb(1.0, 0.0, 0.0));
    }

    #[test]
    fn clear_rejects_rotation_and_misalignment() {
        let style = solid_style(Color::rgb(0.0, 0.0, 0.0), BlendMode::Src);
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(draw_as_clear(&rect, &state(Matrix::rotate(0.4)), &style).is_none());
        assert!(draw_as_clear(
            &Rect::new(10.3, 10.0, 20.0, 20.0),
            &state(Matrix::identity()),
            &style
        )
        .is_none());
    }

    #[test]
    fn clear_rejects_translucent_src_over() {
        let style = solid_style(Color::new(1.0, 0.0, 0.0, 0.5), BlendMode::SrcOver);
        assert!(draw_as_clear(
            &Rect::new(0.0, 0.0, 10.0, 10.0),
            &state(Matrix::identity()),
            &style
        )
        .is_none());
    }

    #[test]
    fn clear_blend_clears_to_transparent() {
        let style = solid_style(Color::rgb(0.2, 0.4, 0.6), BlendMode::Clear);
        let (_, color) = draw_as_clear(
            &Rect::new(0.0, 0.0, 10.0, 10.0),
            &state(Matrix::identity()),
            &style,
        )
        .expect("clear applies");
        assert_eq!(color, Color::TRANSPARENT);
    }

    #[test]
    fn rect_path_selects_primitive() {
        let style = solid_style(Color::BLACK, BlendMode::SrcOver);
        let path = Path::rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        let strategy = select_path_fill(
            &path,
            &state(Matrix::identity()),
            &style,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            AaMode::None,
        )
        .unwrap();
        assert!(matches!(strategy, FillStrategy::Primitive { rrect: None, .. }));
    }

    #[test]
    fn rrect_path_selects_analytic_primitive() {
        let style = solid_style(Color::BLACK, BlendMode::SrcOver);
        let path = Path::rrect(RRect::new(Rect::new(0.0, 0.0, 40.0, 40.0), 8.0, 8.0));
        let strategy = select_path_fill(
            &path,
            &state(Matrix::translate(5.0, 5.0)),
            &style,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            AaMode::Coverage,
        )
        .unwrap();
        match strategy {
            FillStrategy::Primitive { rrect: Some((rect, rx, ry)), .. } => {
                assert_eq!(rect, Rect::new(5.0, 5.0, 40.0, 40.0));
                assert_eq!((rx, ry), (8.0, 8.0));
            }
            other => panic!("expected rrect primitive, got {other:?}"),
        }
    }

    #[test]
    fn simple_polygon_triangulates() {
        let style = solid_style(Color::BLACK, BlendMode::SrcOver);
        let path = PathBuilder::new()
            .move_to(10.0, 10.0)
            .line_to(50.0, 15.0)
            .line_to(30.0, 45.0)
            .close()
            .build();
        let strategy = select_path_fill(
            &path,
            &state(Matrix::identity()),
            &style,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            AaMode::None,
        )
        .unwrap();
        match strategy {
            FillStrategy::Triangulated { mesh } => {
                assert_eq!(mesh.indices.len() % 3, 0);
                assert!(!mesh.is_empty());
            }
            other => panic!("expected triangulation, got {other:?}"),
        }
    }

    #[test]
    fn self_intersecting_path_falls_back_to_mask() {
        let style = solid_style(Color::BLACK, BlendMode::SrcOver);
        // A bowtie: two triangles sharing a crossing.
        let path = PathBuilder::new()
            .move_to(0.0, 0.0)
            .line_to(40.0, 40.0)
            .line_to(40.0, 0.0)
            .line_to(0.0, 40.0)
            .close()
            .build();
        let strategy = select_path_fill(
            &path,
            &state(Matrix::identity()),
            &style,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            AaMode::None,
        )
        .unwrap();
        match strategy {
            FillStrategy::Masked { bounds } => {
                assert_eq!(bounds, Rect::new(0.0, 0.0, 40.0, 40.0));
            }
            other => panic!("expected mask fallback, got {other:?}"),
        }
    }

    #[test]
    fn multi_contour_path_falls_back_to_mask() {
        // Two contours may form a hole needing fill-rule resolution.
        let path = PathBuilder::new()
            .move_to(0.0, 0.0)
            .line_to(40.0, 0.0)
            .line_to(40.0, 40.0)
            .line_to(0.0, 40.0)
            .close()
            .move_to(10.0, 10.0)
            .line_to(30.0, 10.0)
            .line_to(30.0, 30.0)
            .line_to(10.0, 30.0)
            .close()
            .build();
        assert!(!triangulation_is_safe(&path));
    }

    #[test]
    fn aa_mode_selection() {
        let aligned = Rect::new(1.0, 1.0, 10.0, 10.0);
        let unaligned = Rect::new(1.5, 1.0, 10.0, 10.0);
        let identity = Matrix::identity();
        assert_eq!(select_aa_mode(false, 1, &identity, Some(&aligned)), AaMode::None);
        assert_eq!(select_aa_mode(true, 4, &identity, Some(&unaligned)), AaMode::Msaa);
        assert_eq!(select_aa_mode(true, 1, &identity, Some(&aligned)), AaMode::None);
        assert_eq!(
            select_aa_mode(true, 1, &identity, Some(&unaligned)),
            AaMode::Coverage
        );
        assert_eq!(
            select_aa_mode(true, 1, &Matrix::rotate(0.2), Some(&aligned)),
            AaMode::Coverage
        );
        assert_eq!(select_aa_mode(true, 1, &identity, None), AaMode::Coverage);
    }

    #[test]
    fn coverage_rect_mesh_has_fringe() {
        let mesh = rect_mesh(Rect::new(10.0, 10.0, 20.0, 20.0), [1.0; 4], AaMode::Coverage);
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices.len(), 6 + 4 * 6);
        assert!(mesh.vertices[..4].iter().all(|v| v.coverage == 1.0));
        assert!(mesh.vertices[4..].iter().all(|v| v.coverage == 0.0));
    }
}
