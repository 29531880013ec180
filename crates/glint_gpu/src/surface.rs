//! Drawable surfaces
//!
//! A [`Surface`] owns a render target, the terminal [`RenderContext`]
//! drawing into it, and the state stack its canvases mutate. Surfaces
//! on one device share a [`Context`] and with it the resource and
//! program caches.

use std::cell::RefCell;
use std::rc::Rc;

use glint_core::Rect;

use crate::backend::{TextureDescriptor, TextureFormat};
use crate::canvas::Canvas;
use crate::clip::SurfaceOrigin;
use crate::context::{Context, RenderContext, RenderTarget};
use crate::state::StateStack;

#[derive(Clone, Copy, Debug)]
pub struct SurfaceDescriptor {
    pub width: u32,
    pub height: u32,
    pub origin: SurfaceOrigin,
    pub sample_count: u32,
}

impl SurfaceDescriptor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            origin: SurfaceOrigin::default(),
            sample_count: 1,
        }
    }

    pub fn with_origin(mut self, origin: SurfaceOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }
}

pub struct Surface {
    context: Rc<RefCell<Context>>,
    render: RenderContext,
    stack: StateStack,
}

impl Surface {
    /// Creates a surface with a freshly allocated render target.
    /// `None` when the descriptor is degenerate or the target cannot
    /// be allocated.
    pub fn new(context: &Rc<RefCell<Context>>, desc: SurfaceDescriptor) -> Option<Surface> {
        if desc.width == 0 || desc.height == 0 {
            return None;
        }
        let sample_count = desc.sample_count.max(1);
        let texture = context.borrow_mut().scratch_texture(TextureDescriptor {
            width: desc.width,
            height: desc.height,
            format: TextureFormat::Rgba8,
            sample_count,
            renderable: true,
        })?;
        let target = RenderTarget {
            texture,
            width: desc.width,
            height: desc.height,
            origin: desc.origin,
            sample_count,
        };
        let bounds = target.bounds();
        Some(Surface {
            context: context.clone(),
            render: RenderContext::new(context.clone(), target),
            stack: StateStack::new(bounds),
        })
    }

    pub fn width(&self) -> u32 {
        self.render.target().width
    }

    pub fn height(&self) -> u32 {
        self.render.target().height
    }

    pub fn bounds(&self) -> Rect {
        self.render.target().bounds()
    }

    pub fn origin(&self) -> SurfaceOrigin {
        self.render.target().origin
    }

    /// A canvas drawing into this surface. State changes persist
    /// across canvases; the canvas borrows, it does not own.
    pub fn canvas(&mut self) -> Canvas<'_> {
        Canvas::new(self.context.clone(), &mut self.render, &mut self.stack)
    }

    /// Submits every recorded operation to the backend
    pub fn flush(&mut self) {
        self.render.flush();
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("origin", &self.origin())
            .finish()
    }
}
