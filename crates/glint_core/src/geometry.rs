//! Points, rectangles and 2D affine transforms

/// A 2D point
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_wh(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// A rect with zero or negative extent draws nothing
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.left() && p.x < self.right() && p.y >= self.top() && p.y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left() <= other.left()
            && self.top() <= other.top()
            && self.right() >= other.right()
            && self.bottom() >= other.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Intersection of two rects; empty if they do not overlap
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            Rect::EMPTY
        } else {
            Rect::from_ltrb(left, top, right, bottom)
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_ltrb(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn inset(&self, dx: f32, dy: f32) -> Rect {
        Rect::from_ltrb(
            self.left() + dx,
            self.top() + dy,
            self.right() - dx,
            self.bottom() - dy,
        )
    }

    /// True if every edge sits on a whole-pixel boundary within `epsilon`
    pub fn is_pixel_aligned(&self, epsilon: f32) -> bool {
        let aligned = |v: f32| (v - v.round()).abs() <= epsilon;
        aligned(self.left()) && aligned(self.top()) && aligned(self.right()) && aligned(self.bottom())
    }

    /// Snap each edge to the nearest whole pixel
    pub fn round(&self) -> Rect {
        Rect::from_ltrb(
            self.left().round(),
            self.top().round(),
            self.right().round(),
            self.bottom().round(),
        )
    }

    /// Expand to the smallest whole-pixel rect covering this one
    pub fn round_out(&self) -> Rect {
        Rect::from_ltrb(
            self.left().floor(),
            self.top().floor(),
            self.right().ceil(),
            self.bottom().ceil(),
        )
    }
}

/// A rounded rectangle with uniform corner radii
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RRect {
    pub rect: Rect,
    /// Corner radius along x and y
    pub radii: Point,
}

impl RRect {
    pub fn new(rect: Rect, radius_x: f32, radius_y: f32) -> Self {
        let rx = radius_x.clamp(0.0, rect.width / 2.0);
        let ry = radius_y.clamp(0.0, rect.height / 2.0);
        Self {
            rect,
            radii: Point::new(rx, ry),
        }
    }

    pub fn oval(rect: Rect) -> Self {
        Self {
            rect,
            radii: Point::new(rect.width / 2.0, rect.height / 2.0),
        }
    }

    pub fn is_rect(&self) -> bool {
        self.radii.x <= 0.0 && self.radii.y <= 0.0
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    /// True if `other` lies entirely inside the rounded shape, corner
    /// ellipses included
    pub fn contains_rect(&self, other: &Rect) -> bool {
        if !self.rect.contains_rect(other) {
            return false;
        }
        if self.is_rect() {
            return true;
        }
        let corners = [
            Point::new(other.left(), other.top()),
            Point::new(other.right(), other.top()),
            Point::new(other.right(), other.bottom()),
            Point::new(other.left(), other.bottom()),
        ];
        corners.iter().all(|p| self.contains_point(*p))
    }

    fn contains_point(&self, p: Point) -> bool {
        if !self.rect.contains_point(p) && !on_closed_edge(&self.rect, p) {
            return false;
        }
        let (rx, ry) = (self.radii.x, self.radii.y);
        if rx <= 0.0 || ry <= 0.0 {
            return true;
        }
        // Find the corner ellipse center nearest to the point, if the
        // point is in a corner region at all.
        let cx = if p.x < self.rect.left() + rx {
            self.rect.left() + rx
        } else if p.x > self.rect.right() - rx {
            self.rect.right() - rx
        } else {
            return true;
        };
        let cy = if p.y < self.rect.top() + ry {
            self.rect.top() + ry
        } else if p.y > self.rect.bottom() - ry {
            self.rect.bottom() - ry
        } else {
            return true;
        };
        let dx = (p.x - cx) / rx;
        let dy = (p.y - cy) / ry;
        dx * dx + dy * dy <= 1.0
    }
}

fn on_closed_edge(rect: &Rect, p: Point) -> bool {
    p.x >= rect.left() && p.x <= rect.right() && p.y >= rect.top() && p.y <= rect.bottom()
}

/// 2D affine transform
///
/// Column-vector convention: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub const fn translate(dx: f32, dy: f32) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: dx,
            f: dy,
        }
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: 0.0,
            f: 0.0,
        }
    }

    /// Rotation by `radians` around the origin
    pub fn rotate(radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn skew(sx: f32, sy: f32) -> Self {
        Self {
            a: 1.0,
            b: sy,
            c: sx,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Composition applying `other` first, then `self`
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, or `None` if singular
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det.abs() <= f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        Some(Matrix {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    pub fn map_point(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    /// Axis-aligned bounds of the transformed rect corners
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.map_point(Point::new(rect.left(), rect.top())),
            self.map_point(Point::new(rect.right(), rect.top())),
            self.map_point(Point::new(rect.right(), rect.bottom())),
            self.map_point(Point::new(rect.left(), rect.bottom())),
        ];
        let mut left = corners[0].x;
        let mut top = corners[0].y;
        let mut right = corners[0].x;
        let mut bottom = corners[0].y;
        for p in &corners[1..] {
            left = left.min(p.x);
            top = top.min(p.y);
            right = right.max(p.x);
            bottom = bottom.max(p.y);
        }
        Rect::from_ltrb(left, top, right, bottom)
    }

    /// True if axis-aligned rects map to axis-aligned rects: either no
    /// rotation/skew at all, or an exact quarter-turn
    pub fn rects_stay_rects(&self) -> bool {
        (self.b == 0.0 && self.c == 0.0) || (self.a == 0.0 && self.d == 0.0)
    }

    /// True if the transform is translation plus positive axis-aligned
    /// scale only: no rotation, skew, or mirroring
    pub fn is_translate_scale(&self) -> bool {
        self.b == 0.0 && self.c == 0.0 && self.a > 0.0 && self.d > 0.0
    }
}
