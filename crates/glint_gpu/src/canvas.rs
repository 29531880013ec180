//! The user-facing drawing API
//!
//! A [`Canvas`] pairs a [`StateStack`] with the head of a draw-context
//! chain. It resolves paints into fill styles, expands strokes into
//! fillable outlines, filters out draws that cannot produce output, and
//! forwards everything else down the chain. No GPU work happens here.

use std::cell::RefCell;
use std::rc::Rc;

use glint_core::{
    BlendMode, Color, FillStyle, Matrix, Paint, Path, PathBuilder, RRect, Rect, SamplingOptions,
};

use crate::context::{Context, DrawContext};
use crate::raster::{GlyphRun, Image};
use crate::state::StateStack;

pub struct Canvas<'a> {
    context: Rc<RefCell<Context>>,
    draw_context: &'a mut dyn DrawContext,
    stack: &'a mut StateStack,
}

impl<'a> Canvas<'a> {
    pub(crate) fn new(
        context: Rc<RefCell<Context>>,
        draw_context: &'a mut dyn DrawContext,
        stack: &'a mut StateStack,
    ) -> Self {
        Self {
            context,
            draw_context,
            stack,
        }
    }

    // State management

    pub fn save(&mut self) {
        self.stack.save();
    }

    pub fn restore(&mut self) {
        self.stack.restore();
    }

    pub fn save_count(&self) -> usize {
        self.stack.depth()
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.stack.concat(&Matrix::translate(dx, dy));
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.stack.concat(&Matrix::scale(sx, sy));
    }

    pub fn rotate(&mut self, radians: f32) {
        self.stack.concat(&Matrix::rotate(radians));
    }

    /// Rotates around `(px, py)` instead of the origin
    pub fn rotate_about(&mut self, radians: f32, px: f32, py: f32) {
        let pivot = Matrix::translate(px, py)
            .concat(&Matrix::rotate(radians))
            .concat(&Matrix::translate(-px, -py));
        self.stack.concat(&pivot);
    }

    pub fn skew(&mut self, sx: f32, sy: f32) {
        self.stack.concat(&Matrix::skew(sx, sy));
    }

    pub fn concat(&mut self, matrix: &Matrix) {
        self.stack.concat(matrix);
    }

    pub fn set_matrix(&mut self, matrix: Matrix) {
        self.stack.set_matrix(matrix);
    }

    pub fn reset_matrix(&mut self) {
        self.stack.reset_matrix();
    }

    pub fn matrix(&self) -> Matrix {
        self.stack.state().matrix
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.stack.set_alpha(alpha);
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.stack.set_blend_mode(mode);
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        self.stack.clip_rect(rect);
    }

    pub fn clip_path(&mut self, path: Path) {
        self.stack.clip_path(path);
    }

    // Drawing

    /// Erases the clipped target region to `color`
    pub fn clear(&mut self, color: Color) {
        self.draw_context.clear(self.stack.state(), color);
    }

    pub fn draw_rect(&mut self, rect: &Rect, paint: &Paint) {
        if rect.is_empty() || paint.nothing_to_draw() {
            return;
        }
        if paint.stroke.is_some() {
            self.stroke_outline(Path::rect(*rect), paint);
            return;
        }
        let style = self.resolve_style(paint);
        self.draw_context.draw_rect(rect, self.stack.state(), &style);
    }

    pub fn draw_rrect(&mut self, rrect: &RRect, paint: &Paint) {
        if rrect.is_empty() || paint.nothing_to_draw() {
            return;
        }
        if paint.stroke.is_some() {
            self.stroke_outline(Path::rrect(*rrect), paint);
            return;
        }
        let style = self.resolve_style(paint);
        self.draw_context.draw_rrect(rrect, self.stack.state(), &style);
    }

    pub fn draw_oval(&mut self, rect: &Rect, paint: &Paint) {
        if rect.is_empty() {
            return;
        }
        self.draw_rrect(&RRect::oval(*rect), paint);
    }

    pub fn draw_circle(&mut self, cx: f32, cy: f32, radius: f32, paint: &Paint) {
        if radius <= 0.0 {
            return;
        }
        self.draw_oval(
            &Rect::new(cx - radius, cy - radius, radius * 2.0, radius * 2.0),
            paint,
        );
    }

    /// Draws a stroked line segment. The paint's stroke geometry is
    /// used when present; a hairline of width one otherwise.
    pub fn draw_line(&mut self, x0: f32, y0: f32, x1: f32, y1: f32, paint: &Paint) {
        if paint.nothing_to_draw() || (x0 == x1 && y0 == y1) {
            return;
        }
        let path = PathBuilder::new().move_to(x0, y0).line_to(x1, y1).build();
        let mut stroked = paint.clone();
        stroked.stroke = Some(paint.stroke.unwrap_or_default());
        self.stroke_outline(path, &stroked);
    }

    pub fn draw_path(&mut self, path: &Path, paint: &Paint) {
        if path.is_empty() || paint.nothing_to_draw() {
            return;
        }
        if paint.stroke.is_some() {
            self.stroke_outline(path.clone(), paint);
            return;
        }
        // A bare segment has no interior to fill.
        if path.is_line() {
            return;
        }
        let style = self.resolve_style(paint);
        self.draw_context.draw_path(path, self.stack.state(), &style);
    }

    /// Draws the whole image with its top-left corner at `(x, y)`
    pub fn draw_image(&mut self, image: &Image, x: f32, y: f32, paint: &Paint) {
        let src = image.bounds();
        self.draw_image_rect(
            image,
            src,
            src.offset(x, y),
            SamplingOptions::default(),
            paint,
        );
    }

    pub fn draw_image_rect(
        &mut self,
        image: &Image,
        src: Rect,
        dst: Rect,
        sampling: SamplingOptions,
        paint: &Paint,
    ) {
        if src.is_empty() || dst.is_empty() || paint.nothing_to_draw() {
            return;
        }
        let style = self.resolve_style(paint);
        self.draw_context
            .draw_image_rect(image, src, dst, sampling, self.stack.state(), &style);
    }

    /// Draws sprites cut from one image, each under its own transform.
    /// Sprite `i` covers `rects[i]` in the image and `transforms[i]`
    /// maps it into the canvas; with mismatched slice lengths the
    /// shorter prefix draws.
    pub fn draw_atlas(
        &mut self,
        image: &Image,
        transforms: &[Matrix],
        rects: &[Rect],
        sampling: SamplingOptions,
        paint: &Paint,
    ) {
        if transforms.is_empty() || rects.is_empty() || paint.nothing_to_draw() {
            return;
        }
        let style = self.resolve_style(paint);
        for (transform, src) in transforms.iter().zip(rects) {
            if src.is_empty() {
                continue;
            }
            let dst = Rect::from_wh(src.width, src.height);
            let mut state = self.stack.state().clone();
            state.matrix = state.matrix.concat(transform);
            self.draw_context
                .draw_image_rect(image, *src, dst, sampling, &state, &style);
        }
    }

    pub fn draw_glyphs(&mut self, run: &GlyphRun, paint: &Paint) {
        if run.is_empty() || paint.nothing_to_draw() {
            return;
        }
        let style = self.resolve_style(paint);
        self.draw_context.draw_glyph_run(run, self.stack.state(), &style);
    }

    /// Resolved fill parameters: premultiplied color with the state
    /// alpha folded in. A paint left on the default source-over blend
    /// inherits the state's blend mode; an explicit paint blend wins.
    fn resolve_style(&self, paint: &Paint) -> FillStyle {
        let state = self.stack.state();
        let mut style = FillStyle::from_paint(paint).with_alpha(state.alpha);
        if paint.blend_mode == BlendMode::SrcOver {
            style.blend_mode = state.blend_mode;
        }
        style
    }

    /// Reduces a stroke to a fill of its expanded outline
    fn stroke_outline(&mut self, path: Path, paint: &Paint) {
        let Some(stroke) = &paint.stroke else {
            debug_assert!(false, "stroke_outline called without stroke geometry");
            return;
        };
        if stroke.width <= 0.0 {
            return;
        }
        let expanded = self.context.borrow().stroker.expand(&path, stroke);
        let Some(outline) = expanded else {
            tracing::warn!("stroke expansion failed; dropping draw");
            return;
        };
        let style = self.resolve_style(paint);
        self.draw_context.draw_path(&outline, self.stack.state(), &style);
    }
}
