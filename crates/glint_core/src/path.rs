//! Path building, shape recognition and clip accumulation

use smallvec::SmallVec;

use crate::geometry::{Matrix, Point, RRect, Rect};

/// Path command
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
    QuadTo {
        control: Point,
        end: Point,
    },
    CubicTo {
        control1: Point,
        control2: Point,
        end: Point,
    },
    Close,
}

/// Exact shape a path is known to describe, tracked so the engine can
/// route rects and rounded rects onto specialized draw paths without
/// geometry analysis on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
enum ShapeHint {
    Rect(Rect),
    RRect(RRect),
    General,
}

/// A 2D vector path composed of commands
#[derive(Clone, Debug)]
pub struct Path {
    commands: SmallVec<[PathCommand; 16]>,
    shape: ShapeHint,
    bounds: Rect,
}

impl Default for Path {
    fn default() -> Self {
        Self {
            commands: SmallVec::new(),
            shape: ShapeHint::General,
            bounds: Rect::EMPTY,
        }
    }
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    /// A path describing exactly `rect`
    pub fn rect(rect: Rect) -> Self {
        let mut path = Self::default();
        path.push_rect_commands(&rect);
        path.shape = ShapeHint::Rect(rect);
        path.bounds = rect;
        path
    }

    /// A path describing exactly `rrect`
    pub fn rrect(rrect: RRect) -> Self {
        if rrect.is_rect() {
            return Self::rect(rrect.rect);
        }
        let mut path = Self::default();
        path.push_rrect_commands(&rrect);
        path.shape = ShapeHint::RRect(rrect);
        path.bounds = rrect.rect;
        path
    }

    /// A path describing the ellipse inscribed in `rect`
    pub fn oval(rect: Rect) -> Self {
        Self::rrect(RRect::oval(rect))
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() || self.bounds.is_empty()
    }

    /// Tight axis-aligned bounds of all control points
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Some(rect) iff the path is exactly an axis-aligned rectangle
    pub fn as_rect(&self) -> Option<Rect> {
        match self.shape {
            ShapeHint::Rect(rect) => Some(rect),
            ShapeHint::General => recognize_rect(&self.commands),
            _ => None,
        }
    }

    /// Some(rrect) iff the path is exactly a rounded rectangle (or oval)
    pub fn as_rrect(&self) -> Option<RRect> {
        match self.shape {
            ShapeHint::RRect(rrect) => Some(rrect),
            ShapeHint::Rect(rect) => Some(RRect::new(rect, 0.0, 0.0)),
            ShapeHint::General => None,
        }
    }

    /// True if the whole of `rect` is known to lie inside the filled
    /// path. Conservative: general paths answer false.
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        match self.shape {
            ShapeHint::Rect(r) => r.contains_rect(rect),
            ShapeHint::RRect(rr) => rr.contains_rect(rect),
            ShapeHint::General => match recognize_rect(&self.commands) {
                Some(r) => r.contains_rect(rect),
                None => false,
            },
        }
    }

    /// True if the path is exactly one line segment
    pub fn is_line(&self) -> bool {
        matches!(
            self.commands.as_slice(),
            [PathCommand::MoveTo(_), PathCommand::LineTo(_)]
                | [PathCommand::MoveTo(_), PathCommand::LineTo(_), PathCommand::Close]
        )
    }

    /// The path with `matrix` applied to every control point
    pub fn transform(&self, matrix: &Matrix) -> Path {
        if matrix.is_identity() {
            return self.clone();
        }
        // Rect identity survives rect-preserving transforms; rounded
        // corners additionally need uniform treatment of both axes.
        let shape = match self.shape {
            ShapeHint::Rect(rect) if matrix.rects_stay_rects() => {
                ShapeHint::Rect(matrix.map_rect(&rect))
            }
            ShapeHint::RRect(rrect) if matrix.is_translate_scale() => ShapeHint::RRect(RRect::new(
                matrix.map_rect(&rrect.rect),
                rrect.radii.x * matrix.a,
                rrect.radii.y * matrix.d,
            )),
            _ => ShapeHint::General,
        };
        let mut path = Path {
            commands: SmallVec::with_capacity(self.commands.len()),
            shape,
            bounds: Rect::EMPTY,
        };
        for cmd in &self.commands {
            let mapped = match *cmd {
                PathCommand::MoveTo(p) => PathCommand::MoveTo(matrix.map_point(p)),
                PathCommand::LineTo(p) => PathCommand::LineTo(matrix.map_point(p)),
                PathCommand::QuadTo { control, end } => PathCommand::QuadTo {
                    control: matrix.map_point(control),
                    end: matrix.map_point(end),
                },
                PathCommand::CubicTo {
                    control1,
                    control2,
                    end,
                } => PathCommand::CubicTo {
                    control1: matrix.map_point(control1),
                    control2: matrix.map_point(control2),
                    end: matrix.map_point(end),
                },
                PathCommand::Close => PathCommand::Close,
            };
            path.push(mapped);
        }
        path
    }

    fn push(&mut self, cmd: PathCommand) {
        match cmd {
            PathCommand::MoveTo(p) | PathCommand::LineTo(p) => self.grow_bounds(&[p]),
            PathCommand::QuadTo { control, end } => self.grow_bounds(&[control, end]),
            PathCommand::CubicTo {
                control1,
                control2,
                end,
            } => self.grow_bounds(&[control1, control2, end]),
            PathCommand::Close => {}
        }
        self.commands.push(cmd);
    }

    fn grow_bounds(&mut self, points: &[Point]) {
        let mut first = self.commands.is_empty();
        for p in points {
            if first {
                self.bounds = Rect::new(p.x, p.y, 0.0, 0.0);
                first = false;
            } else {
                self.bounds = Rect::from_ltrb(
                    self.bounds.left().min(p.x),
                    self.bounds.top().min(p.y),
                    self.bounds.right().max(p.x),
                    self.bounds.bottom().max(p.y),
                );
            }
        }
    }

    fn push_rect_commands(&mut self, rect: &Rect) {
        self.push(PathCommand::MoveTo(Point::new(rect.left(), rect.top())));
        self.push(PathCommand::LineTo(Point::new(rect.right(), rect.top())));
        self.push(PathCommand::LineTo(Point::new(rect.right(), rect.bottom())));
        self.push(PathCommand::LineTo(Point::new(rect.left(), rect.bottom())));
        self.push(PathCommand::Close);
    }

    fn push_rrect_commands(&mut self, rrect: &RRect) {
        // Circular-arc corners approximated with cubics.
        const K: f32 = 0.552_284_75;
        let r = rrect.rect;
        let (rx, ry) = (rrect.radii.x, rrect.radii.y);
        let (kx, ky) = (rx * K, ry * K);
        self.push(PathCommand::MoveTo(Point::new(r.left() + rx, r.top())));
        self.push(PathCommand::LineTo(Point::new(r.right() - rx, r.top())));
        self.push(PathCommand::CubicTo {
            control1: Point::new(r.right() - rx + kx, r.top()),
            control2: Point::new(r.right(), r.top() + ry - ky),
            end: Point::new(r.right(), r.top() + ry),
        });
        self.push(PathCommand::LineTo(Point::new(r.right(), r.bottom() - ry)));
        self.push(PathCommand::CubicTo {
            control1: Point::new(r.right(), r.bottom() - ry + ky),
            control2: Point::new(r.right() - rx + kx, r.bottom()),
            end: Point::new(r.right() - rx, r.bottom()),
        });
        self.push(PathCommand::LineTo(Point::new(r.left() + rx, r.bottom())));
        self.push(PathCommand::CubicTo {
            control1: Point::new(r.left() + rx - kx, r.bottom()),
            control2: Point::new(r.left(), r.bottom() - ry + ky),
            end: Point::new(r.left(), r.bottom() - ry),
        });
        self.push(PathCommand::LineTo(Point::new(r.left(), r.top() + ry)));
        self.push(PathCommand::CubicTo {
            control1: Point::new(r.left(), r.top() + ry - ky),
            control2: Point::new(r.left() + rx - kx, r.top()),
            end: Point::new(r.left() + rx, r.top()),
        });
        self.push(PathCommand::Close);
    }
}

/// Recognize a move + 3-4 axis-aligned lines (+ close) as a rectangle
fn recognize_rect(commands: &[PathCommand]) -> Option<Rect> {
    let mut points: SmallVec<[Point; 5]> = SmallVec::new();
    let mut closed = false;
    for (i, cmd) in commands.iter().enumerate() {
        match *cmd {
            PathCommand::MoveTo(p) if i == 0 => points.push(p),
            PathCommand::LineTo(p) => points.push(p),
            PathCommand::Close if i == commands.len() - 1 => closed = true,
            _ => return None,
        }
    }
    // Four corners, or five with an explicit return to the start.
    match points.len() {
        4 => {}
        5 if points[4] == points[0] => {
            points.pop();
        }
        _ => return None,
    }
    if !closed && points.len() == 4 && commands.len() == 4 {
        // Open four-point contour still outlines a rect if the last edge
        // would close it axis-aligned; require explicit closure instead.
        return None;
    }
    let [p0, p1, p2, p3] = [points[0], points[1], points[2], points[3]];
    let horizontal_first = p0.y == p1.y && p1.x == p2.x && p2.y == p3.y && p3.x == p0.x;
    let vertical_first = p0.x == p1.x && p1.y == p2.y && p2.x == p3.x && p3.y == p0.y;
    if !horizontal_first && !vertical_first {
        return None;
    }
    let rect = Rect::from_ltrb(
        p0.x.min(p2.x),
        p0.y.min(p2.y),
        p0.x.max(p2.x),
        p0.y.max(p2.y),
    );
    if rect.is_empty() {
        None
    } else {
        Some(rect)
    }
}

/// Builder for constructing paths
#[derive(Default)]
pub struct PathBuilder {
    path: Path,
    current: Point,
}

impl PathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(mut self, x: f32, y: f32) -> Self {
        let point = Point::new(x, y);
        self.path.push(PathCommand::MoveTo(point));
        self.path.shape = ShapeHint::General;
        self.current = point;
        self
    }

    pub fn line_to(mut self, x: f32, y: f32) -> Self {
        let point = Point::new(x, y);
        self.path.push(PathCommand::LineTo(point));
        self.path.shape = ShapeHint::General;
        self.current = point;
        self
    }

    pub fn quad_to(mut self, cx: f32, cy: f32, x: f32, y: f32) -> Self {
        let end = Point::new(x, y);
        self.path.push(PathCommand::QuadTo {
            control: Point::new(cx, cy),
            end,
        });
        self.path.shape = ShapeHint::General;
        self.current = end;
        self
    }

    pub fn cubic_to(mut self, c1x: f32, c1y: f32, c2x: f32, c2y: f32, x: f32, y: f32) -> Self {
        let end = Point::new(x, y);
        self.path.push(PathCommand::CubicTo {
            control1: Point::new(c1x, c1y),
            control2: Point::new(c2x, c2y),
            end,
        });
        self.path.shape = ShapeHint::General;
        self.current = end;
        self
    }

    pub fn close(mut self) -> Self {
        self.path.push(PathCommand::Close);
        self
    }

    pub fn build(self) -> Path {
        self.path
    }
}

/// Accumulated clip geometry: the intersection of clip elements.
///
/// Adjacent rectangular elements collapse into a single rect so the
/// common rect-clip case stays cheap to classify; anything else keeps
/// its elements and is resolved by rasterization downstream.
#[derive(Clone, Debug)]
pub struct ClipPath {
    elements: SmallVec<[Path; 1]>,
}

impl ClipPath {
    /// A clip covering `device_bounds` entirely
    pub fn full(device_bounds: Rect) -> Self {
        Self {
            elements: smallvec::smallvec![Path::rect(device_bounds)],
        }
    }

    /// Intersect the accumulated clip with `path` (already in device space)
    pub fn intersect(&mut self, path: Path) {
        if let (Some(a), Some(b)) = (self.as_rect(), path.as_rect()) {
            let merged = a.intersect(&b);
            self.elements.clear();
            self.elements.push(Path::rect(merged));
            return;
        }
        // A rect element that already contains the incoming shape adds
        // nothing to the intersection.
        if self.elements.len() == 1 && self.elements[0].contains_rect(&path.bounds()) {
            if self.elements[0].as_rect().is_some() {
                self.elements.clear();
            }
        }
        self.elements.push(path);
    }

    /// Some(rect) iff the whole clip is a single axis-aligned rectangle
    pub fn as_rect(&self) -> Option<Rect> {
        match self.elements.as_slice() {
            [only] => only.as_rect(),
            _ => None,
        }
    }

    /// Some(rrect) iff the whole clip is a single rounded rectangle
    pub fn as_rrect(&self) -> Option<RRect> {
        match self.elements.as_slice() {
            [only] => only.as_rrect(),
            _ => None,
        }
    }

    /// True if every element fully contains `rect`
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        self.elements.iter().all(|e| e.contains_rect(rect))
    }

    /// True if nothing can pass the clip
    pub fn is_empty(&self) -> bool {
        self.elements.iter().any(|e| e.is_empty()) || self.bounds().is_empty()
    }

    /// Intersection of all element bounds
    pub fn bounds(&self) -> Rect {
        let mut iter = self.elements.iter();
        let mut bounds = match iter.next() {
            Some(e) => e.bounds(),
            None => return Rect::EMPTY,
        };
        for e in iter {
            bounds = bounds.intersect(&e.bounds());
        }
        bounds
    }

    /// Clip elements, outermost first; coverage is their product
    pub fn elements(&self) -> &[Path] {
        &self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_path_round_trips_through_recognition() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(Path::rect(rect).as_rect(), Some(rect));

        // Hand-built equivalent contour is recognized too.
        let built = PathBuilder::new()
            .move_to(10.0, 20.0)
            .line_to(40.0, 20.0)
            .line_to(40.0, 60.0)
            .line_to(10.0, 60.0)
            .close()
            .build();
        assert_eq!(built.as_rect(), Some(rect));
    }

    #[test]
    fn skewed_quad_is_not_a_rect() {
        let path = PathBuilder::new()
            .move_to(0.0, 0.0)
            .line_to(10.0, 2.0)
            .line_to(12.0, 12.0)
            .line_to(0.0, 10.0)
            .close()
            .build();
        assert!(path.as_rect().is_none());
    }

    #[test]
    fn transform_keeps_rect_identity_when_axis_aligned() {
        let path = Path::rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        let moved = path.transform(&Matrix::translate(5.0, 5.0));
        assert_eq!(moved.as_rect(), Some(Rect::new(5.0, 5.0, 10.0, 10.0)));

        let rotated = path.transform(&Matrix::rotate(0.3));
        assert!(rotated.as_rect().is_none());
    }

    #[test]
    fn clip_path_collapses_rect_intersections() {
        let mut clip = ClipPath::full(Rect::new(0.0, 0.0, 100.0, 100.0));
        clip.intersect(Path::rect(Rect::new(20.0, 20.0, 100.0, 100.0)));
        assert_eq!(clip.as_rect(), Some(Rect::new(20.0, 20.0, 80.0, 80.0)));
        assert!(clip.contains_rect(&Rect::new(30.0, 30.0, 10.0, 10.0)));
        assert!(!clip.contains_rect(&Rect::new(0.0, 0.0, 30.0, 30.0)));
    }

    #[test]
    fn empty_clip_after_disjoint_intersection() {
        let mut clip = ClipPath::full(Rect::new(0.0, 0.0, 100.0, 100.0));
        clip.intersect(Path::rect(Rect::new(200.0, 200.0, 10.0, 10.0)));
        assert!(clip.is_empty());
    }

    #[test]
    fn line_recognition() {
        let line = PathBuilder::new().move_to(0.0, 0.0).line_to(5.0, 5.0).build();
        assert!(line.is_line());
        assert!(!Path::rect(Rect::new(0.0, 0.0, 1.0, 1.0)).is_line());
    }
}
