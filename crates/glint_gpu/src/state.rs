//! Drawing state and the save/restore stack

use glint_core::{BlendMode, ClipPath, Matrix, Path, Rect};

use crate::key::UniqueId;

/// Snapshot of everything that affects subsequent drawing: transform,
/// alpha, blend mode and the accumulated clip.
///
/// `clip_id` changes iff the clip geometry changes, so two states with
/// equal ids are guaranteed bit-identical clip geometry and cached
/// masks can be reused without geometry comparison.
#[derive(Clone, Debug)]
pub struct DrawState {
    pub matrix: Matrix,
    pub alpha: f32,
    pub blend_mode: BlendMode,
    pub clip: ClipPath,
    pub clip_id: u32,
}

impl DrawState {
    /// Default state for a freshly attached surface: identity
    /// transform, opaque, clip wide open over the device bounds
    pub fn new(device_bounds: Rect) -> Self {
        Self {
            matrix: Matrix::identity(),
            alpha: 1.0,
            blend_mode: BlendMode::SrcOver,
            clip: ClipPath::full(device_bounds),
            clip_id: UniqueId::next(),
        }
    }
}

/// Save/restore stack over [`DrawState`].
///
/// State mutation issues no GPU work; the stack is pure bookkeeping.
#[derive(Debug)]
pub struct StateStack {
    current: DrawState,
    saved: Vec<DrawState>,
}

impl StateStack {
    pub fn new(device_bounds: Rect) -> Self {
        Self {
            current: DrawState::new(device_bounds),
            saved: Vec::new(),
        }
    }

    pub fn state(&self) -> &DrawState {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn save(&mut self) {
        self.saved.push(self.current.clone());
    }

    /// Restores the last saved snapshot; a no-op on an empty stack
    pub fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.current = state;
        }
    }

    /// Left-multiplies `matrix` into the current transform, so it
    /// affects geometry drawn after this call only
    pub fn concat(&mut self, matrix: &Matrix) {
        self.current.matrix = self.current.matrix.concat(matrix);
    }

    pub fn set_matrix(&mut self, matrix: Matrix) {
        self.current.matrix = matrix;
    }

    pub fn reset_matrix(&mut self) {
        self.current.matrix = Matrix::identity();
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.current.alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.current.blend_mode = mode;
    }

    /// Intersects the clip with `rect` under the current transform.
    /// Always advances the clip identity, even when the geometry is
    /// unchanged: the identity is an invalidation signal, not a
    /// content hash.
    pub fn clip_rect(&mut self, rect: Rect) {
        self.clip_path(Path::rect(rect));
    }

    pub fn clip_path(&mut self, path: Path) {
        let device_path = path.transform(&self.current.matrix);
        self.current.clip.intersect(device_path);
        self.current.clip_id = UniqueId::next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: Rect = Rect::new(0.0, 0.0, 200.0, 100.0);

    #[test]
    fn balanced_save_restore_round_trips() {
        let mut stack = StateStack::new(BOUNDS);
        let before_matrix = stack.state().matrix;
        let before_clip_id = stack.state().clip_id;

        stack.save();
        stack.concat(&Matrix::translate(10.0, 20.0));
        stack.set_alpha(0.5);
        stack.clip_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        stack.save();
        stack.set_blend_mode(BlendMode::Plus);
        stack.restore();
        stack.restore();

        assert_eq!(stack.state().matrix, before_matrix);
        assert_eq!(stack.state().alpha, 1.0);
        assert_eq!(stack.state().blend_mode, BlendMode::SrcOver);
        assert_eq!(stack.state().clip_id, before_clip_id);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn restore_on_empty_stack_is_noop() {
        let mut stack = StateStack::new(BOUNDS);
        stack.concat(&Matrix::scale(2.0, 2.0));
        let matrix = stack.state().matrix;
        stack.restore();
        assert_eq!(stack.state().matrix, matrix);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn clip_always_advances_identity() {
        let mut stack = StateStack::new(BOUNDS);
        let id0 = stack.state().clip_id;
        stack.clip_rect(BOUNDS);
        let id1 = stack.state().clip_id;
        // Geometry unchanged, identity advanced anyway.
        assert_ne!(id0, id1);
        stack.clip_rect(BOUNDS);
        assert_ne!(stack.state().clip_id, id1);
    }

    #[test]
    fn clip_applies_current_transform() {
        let mut stack = StateStack::new(BOUNDS);
        stack.concat(&Matrix::translate(100.0, 0.0));
        stack.clip_rect(Rect::new(0.0, 0.0, 50.0, 50.0));
        assert_eq!(
            stack.state().clip.as_rect(),
            Some(Rect::new(100.0, 0.0, 50.0, 50.0))
        );
    }

    #[test]
    fn concat_left_multiplies() {
        let mut stack = StateStack::new(BOUNDS);
        stack.concat(&Matrix::translate(10.0, 0.0));
        stack.concat(&Matrix::scale(2.0, 2.0));
        // Scale applies to new geometry before the earlier translate.
        let p = stack.state().matrix.map_point(glint_core::Point::new(1.0, 0.0));
        assert_eq!(p, glint_core::Point::new(12.0, 0.0));
    }
}
