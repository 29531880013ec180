//! The draw-context chain
//!
//! Draw calls flow through a chain of [`DrawContext`] stages: an
//! optional [`TransformContext`] that folds an outer transform and clip
//! into every call, and the terminal [`RenderContext`] that resolves
//! clips, selects fill strategies and batches backend operations.
//! [`Context`] owns the device-wide pieces every stage shares: the
//! backend, the resource cache, the program cache and the CPU
//! rasterization services.

use std::cell::RefCell;
use std::rc::Rc;

use glint_core::{
    BlendMode, ClipPath, Color, ColorFilter as _, FillStyle, Matrix, Path, Point, RRect, Rect,
    SamplingOptions, Shader as _,
};
use smallvec::{smallvec, SmallVec};

use crate::backend::{
    BufferDescriptor, BufferKind, DrawSubmission, DrawUniforms, FragmentStage, GeometryLayout,
    GpuBackend, PipelineDescription, ResourceDescriptor, ResourceHandle, TextureDescriptor,
    TextureFormat,
};
use crate::cache::{ProgramCache, ResourceCache, ResourceCacheOptions, ResourceRef};
use crate::clip::{classify_clip, to_scissor_space, ClipClass, ClipMask, SurfaceOrigin};
use crate::fill::{
    draw_as_clear, quad_mesh, select_aa_mode, select_path_fill, FillStrategy, Mesh, Vertex,
};
use crate::key::UniqueId;
use crate::raster::{CoverageMask, CoverageRasterizer, GlyphRun, Image, StrokeExpander};
use crate::state::DrawState;

/// Device-wide engine state shared by every surface on one device.
///
/// Single-threaded by design; surfaces share a context through
/// `Rc<RefCell<Context>>`.
pub struct Context {
    pub(crate) backend: Box<dyn GpuBackend>,
    pub(crate) resources: ResourceCache,
    pub(crate) programs: ProgramCache,
    pub(crate) rasterizer: Box<dyn CoverageRasterizer>,
    pub(crate) stroker: Box<dyn StrokeExpander>,
}

impl Context {
    pub fn new(
        backend: Box<dyn GpuBackend>,
        rasterizer: Box<dyn CoverageRasterizer>,
        stroker: Box<dyn StrokeExpander>,
        options: ResourceCacheOptions,
    ) -> Self {
        Self {
            backend,
            resources: ResourceCache::new(options),
            programs: ProgramCache::new(),
            rasterizer,
            stroker,
        }
    }

    pub fn resource_bytes(&self) -> usize {
        self.resources.total_bytes()
    }

    pub fn purgeable_resource_bytes(&self) -> usize {
        self.resources.purgeable_bytes()
    }

    pub fn set_resource_cache_limit(&mut self, max_bytes: usize) {
        self.resources.set_cache_limit(self.backend.as_mut(), max_bytes);
    }

    /// Purges idle purgeable resources not used since `since`
    pub fn purge_resources_not_used_since(
        &mut self,
        since: std::time::Instant,
        recyclable_only: bool,
    ) {
        self.resources
            .purge_not_used_since(self.backend.as_mut(), since, recyclable_only);
    }

    /// Drops every cached resource and program. `release_gpu` is false
    /// when the device is already lost and backend calls would be
    /// invalid.
    pub fn release_all(&mut self, release_gpu: bool) {
        self.resources.release_all(self.backend.as_mut(), release_gpu);
        self.programs.release_all(self.backend.as_mut(), release_gpu);
    }

    /// A pooled scratch texture: reclaims a same-shaped purgeable
    /// texture before allocating. `None` when allocation fails; the
    /// caller abandons the work that needed it.
    pub(crate) fn scratch_texture(&mut self, desc: TextureDescriptor) -> Option<ResourceRef> {
        let descriptor = ResourceDescriptor::Texture(desc);
        let key = descriptor.recycle_key();
        if let Some(found) = self.resources.find_recyclable(&key) {
            return Some(found);
        }
        match self.backend.allocate_resource(&descriptor) {
            Ok(handle) => Some(self.resources.add_resource(
                self.backend.as_mut(),
                handle,
                descriptor,
                Some(key),
            )),
            Err(err) => {
                tracing::warn!(%err, ?desc, "texture allocation failed");
                None
            }
        }
    }

    pub(crate) fn scratch_buffer(&mut self, kind: BufferKind, size: usize) -> Option<ResourceRef> {
        let descriptor = ResourceDescriptor::Buffer(BufferDescriptor { kind, size });
        let key = descriptor.recycle_key();
        if let Some(found) = self.resources.find_recyclable(&key) {
            return Some(found);
        }
        match self.backend.allocate_resource(&descriptor) {
            Ok(handle) => Some(self.resources.add_resource(
                self.backend.as_mut(),
                handle,
                descriptor,
                Some(key),
            )),
            Err(err) => {
                tracing::warn!(%err, ?kind, size, "buffer allocation failed");
                None
            }
        }
    }

    /// The GPU texture holding `image`'s pixels, uploading on first
    /// use. Cached under the image's identity key; the image itself
    /// holds the external ref that keeps it resident.
    pub(crate) fn texture_for_image(&mut self, image: &Image) -> Option<ResourceRef> {
        if let Some(cached) = image.cached_texture() {
            // The image's ref survives release_all; only trust it while
            // the cache still indexes the texture.
            if self.resources.has_resource(&image.unique_key()) {
                return Some(cached);
            }
            image.clear_cached_texture();
        }
        if let Some(found) = self.resources.get_resource(&image.unique_key()) {
            image.set_cached_texture(found.clone());
            return Some(found);
        }
        let desc = TextureDescriptor {
            width: image.width(),
            height: image.height(),
            format: TextureFormat::Rgba8,
            sample_count: 1,
            renderable: false,
        };
        let descriptor = ResourceDescriptor::Texture(desc);
        let handle = match self.backend.allocate_resource(&descriptor) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(%err, "image texture allocation failed");
                return None;
            }
        };
        self.backend
            .upload_texture(handle, image.width(), image.height(), &image.pixels());
        // Content textures carry no recycle key: their pixels are
        // identity-addressed, not shape-pooled.
        let reference =
            self.resources
                .add_resource(self.backend.as_mut(), handle, descriptor, None);
        self.resources.assign_unique_key(&reference, image.unique_key());
        image.set_cached_texture(reference.clone());
        Some(reference)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("resource_bytes", &self.resources.total_bytes())
            .field("programs", &self.programs.len())
            .finish()
    }
}

/// One stage in the draw-context chain. Every operation takes the
/// resolved [`DrawState`] and [`FillStyle`]; stroking and paint
/// resolution happen upstream in the canvas.
pub trait DrawContext {
    /// Erase the clipped target region to `color`, ignoring the
    /// transform
    fn clear(&mut self, state: &DrawState, color: Color);

    fn draw_rect(&mut self, rect: &Rect, state: &DrawState, style: &FillStyle);

    fn draw_rrect(&mut self, rrect: &RRect, state: &DrawState, style: &FillStyle);

    fn draw_path(&mut self, path: &Path, state: &DrawState, style: &FillStyle);

    fn draw_image_rect(
        &mut self,
        image: &Image,
        src: Rect,
        dst: Rect,
        sampling: SamplingOptions,
        state: &DrawState,
        style: &FillStyle,
    );

    fn draw_glyph_run(&mut self, run: &GlyphRun, state: &DrawState, style: &FillStyle);
}

struct ClipMemo {
    in_id: u32,
    out_id: u32,
    clip: ClipPath,
}

/// A chain stage that folds a fixed outer transform and clip into
/// every forwarded call.
///
/// The merged clip is memoized per incoming clip identity, so repeated
/// draws under one clip keep a stable outgoing identity and downstream
/// mask caching stays effective.
pub struct TransformContext<'a> {
    inner: &'a mut dyn DrawContext,
    matrix: Matrix,
    clip: Option<Path>,
    memo: Option<ClipMemo>,
}

impl<'a> TransformContext<'a> {
    /// Wraps `inner`, or `None` when the transform is the identity and
    /// no clip is given: the stage would forward everything unchanged
    /// and callers should keep using `inner` directly.
    pub fn wrap(
        inner: &'a mut dyn DrawContext,
        matrix: Matrix,
        clip: Option<Path>,
    ) -> Option<Self> {
        if matrix.is_identity() && clip.is_none() {
            return None;
        }
        Some(Self {
            inner,
            matrix,
            clip,
            memo: None,
        })
    }

    fn outer_state(&mut self, state: &DrawState) -> DrawState {
        let mut out = state.clone();
        out.matrix = self.matrix.concat(&state.matrix);
        if let Some(clip) = &self.clip {
            if let Some(memo) = &self.memo {
                if memo.in_id == state.clip_id {
                    out.clip = memo.clip.clone();
                    out.clip_id = memo.out_id;
                    return out;
                }
            }
            out.clip.intersect(clip.clone());
            out.clip_id = UniqueId::next();
            self.memo = Some(ClipMemo {
                in_id: state.clip_id,
                out_id: out.clip_id,
                clip: out.clip.clone(),
            });
        }
        out
    }
}

impl DrawContext for TransformContext<'_> {
    fn clear(&mut self, state: &DrawState, color: Color) {
        let state = self.outer_state(state);
        self.inner.clear(&state, color);
    }

    fn draw_rect(&mut self, rect: &Rect, state: &DrawState, style: &FillStyle) {
        let state = self.outer_state(state);
        self.inner.draw_rect(rect, &state, style);
    }

    fn draw_rrect(&mut self, rrect: &RRect, state: &DrawState, style: &FillStyle) {
        let state = self.outer_state(state);
        self.inner.draw_rrect(rrect, &state, style);
    }

    fn draw_path(&mut self, path: &Path, state: &DrawState, style: &FillStyle) {
        let state = self.outer_state(state);
        self.inner.draw_path(path, &state, style);
    }

    fn draw_image_rect(
        &mut self,
        image: &Image,
        src: Rect,
        dst: Rect,
        sampling: SamplingOptions,
        state: &DrawState,
        style: &FillStyle,
    ) {
        let state = self.outer_state(state);
        self.inner
            .draw_image_rect(image, src, dst, sampling, &state, style);
    }

    fn draw_glyph_run(&mut self, run: &GlyphRun, state: &DrawState, style: &FillStyle) {
        let state = self.outer_state(state);
        self.inner.draw_glyph_run(run, &state, style);
    }
}

/// The drawable target a [`RenderContext`] renders into. The texture
/// ref keeps the target resident for the surface's lifetime.
pub struct RenderTarget {
    pub texture: ResourceRef,
    pub width: u32,
    pub height: u32,
    pub origin: SurfaceOrigin,
    pub sample_count: u32,
}

impl RenderTarget {
    pub fn bounds(&self) -> Rect {
        Rect::from_wh(self.width as f32, self.height as f32)
    }
}

struct PendingDraw {
    pipeline: PipelineDescription,
    mesh: Mesh,
    uniforms: DrawUniforms,
    textures: SmallVec<[ResourceRef; 2]>,
    sampling: SamplingOptions,
    /// Device space; mapped to scissor space at flush
    scissor: Option<Rect>,
    /// Device-space footprint, used for overwrite elision
    bounds: Rect,
}

enum PendingOp {
    Clear {
        /// Device space; `None` clears the whole target
        region: Option<Rect>,
        color: Color,
    },
    Draw(PendingDraw),
}

/// Terminal stage of the chain: turns draws into backend operations.
///
/// Operations accumulate and are submitted in order on [`flush`];
/// nothing reorders. A failure at any allocation or compilation point
/// abandons only the operation that needed the object.
///
/// [`flush`]: RenderContext::flush
pub struct RenderContext {
    context: Rc<RefCell<Context>>,
    target: RenderTarget,
    ops: Vec<PendingOp>,
    /// Rasterized clip, valid while the clip identity matches its tag
    clip_mask: Option<ClipMask>,
}

impl RenderContext {
    pub fn new(context: Rc<RefCell<Context>>, target: RenderTarget) -> Self {
        Self {
            context,
            target,
            ops: Vec::new(),
            clip_mask: None,
        }
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    /// Submits every pending operation to the backend in draw order
    pub fn flush(&mut self) {
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        let ops = std::mem::take(&mut self.ops);

        // All draw geometry batches into one vertex and one index
        // buffer per flush; buffers pool across flushes by size class.
        let mut vertices: Vec<Vertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut bases: Vec<(u32, u32)> = Vec::new();
        for op in &ops {
            if let PendingOp::Draw(draw) = op {
                bases.push((vertices.len() as u32, indices.len() as u32));
                vertices.extend_from_slice(&draw.mesh.vertices);
                indices.extend_from_slice(&draw.mesh.indices);
            }
        }
        let buffers = if vertices.is_empty() {
            None
        } else {
            let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
            let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
            let vb = ctx.scratch_buffer(BufferKind::Vertex, vertex_bytes.len());
            let ib = ctx.scratch_buffer(BufferKind::Index, index_bytes.len());
            match (vb, ib) {
                (Some(vb), Some(ib)) => {
                    ctx.backend.upload_buffer(vb.handle(), vertex_bytes);
                    ctx.backend.upload_buffer(ib.handle(), index_bytes);
                    Some((vb, ib))
                }
                _ => {
                    tracing::warn!("geometry buffers unavailable; dropping draws this flush");
                    None
                }
            }
        };

        let Context {
            backend, programs, ..
        } = ctx;
        let height = self.target.height as f32;
        let origin = self.target.origin;
        let mut next_base = bases.into_iter();
        for op in ops {
            match op {
                PendingOp::Clear { region, color } => {
                    let scissor = region.map(|r| to_scissor_space(r, origin, height));
                    backend.clear(scissor, color);
                }
                PendingOp::Draw(draw) => {
                    let Some((base_vertex, base_index)) = next_base.next() else {
                        debug_assert!(false, "pending draw without recorded buffer offsets");
                        continue;
                    };
                    let Some((vb, ib)) = &buffers else { continue };
                    let program = match programs.get_program(backend.as_mut(), &draw.pipeline) {
                        Ok(program) => program,
                        Err(err) => {
                            tracing::warn!(%err, "program unavailable; dropping draw");
                            continue;
                        }
                    };
                    backend.bind_scissor(draw.scissor.map(|r| to_scissor_space(r, origin, height)));
                    let textures: SmallVec<[ResourceHandle; 2]> =
                        draw.textures.iter().map(|t| t.handle()).collect();
                    backend.issue_draw(&DrawSubmission {
                        program,
                        vertex_buffer: vb.handle(),
                        index_buffer: Some(ib.handle()),
                        vertex_count: draw.mesh.vertices.len() as u32,
                        index_count: draw.mesh.indices.len() as u32,
                        base_vertex,
                        base_index,
                        textures: &textures,
                        sampling: draw.sampling,
                        uniforms: &draw.uniforms,
                        blend: draw.pipeline.blend,
                    });
                }
            }
        }
        backend.flush();
    }

    /// A clear over `region` makes earlier operations wholly inside it
    /// invisible; they are discarded before they ever reach the backend.
    fn push_clear(&mut self, region: Rect, color: Color) {
        let full = region.contains_rect(&self.target.bounds());
        self.ops.retain(|op| match op {
            PendingOp::Clear {
                region: Some(r), ..
            } => !region.contains_rect(r),
            PendingOp::Clear { region: None, .. } => !full,
            PendingOp::Draw(draw) => !region.contains_rect(&draw.bounds),
        });
        self.ops.push(PendingOp::Clear {
            region: if full { None } else { Some(region) },
            color,
        });
    }

    fn fill_path(&mut self, ctx: &mut Context, path: &Path, state: &DrawState, style: &FillStyle) {
        if path.is_empty() {
            return;
        }
        let clip_bounds = state.clip.bounds().intersect(&self.target.bounds());
        // The unclipped footprint decides whether the clip actually
        // cuts this draw; the clipped one is what the draw can touch.
        let raw_bounds = state.matrix.map_rect(&path.bounds());
        let device_bounds = raw_bounds.intersect(&clip_bounds);
        if device_bounds.is_empty() {
            return;
        }
        let class = classify_clip(&state.clip, self.target.bounds(), raw_bounds);
        if class == ClipClass::Empty {
            return;
        }

        if let Some(rect) = path.as_rect() {
            if let Some((region, color)) = draw_as_clear(&rect, state, style) {
                match &class {
                    ClipClass::Unclipped => {
                        self.push_clear(region, color);
                        return;
                    }
                    ClipClass::Scissor(scissor) => {
                        let clipped = region.intersect(scissor);
                        if !clipped.is_empty() {
                            self.push_clear(clipped, color);
                        }
                        return;
                    }
                    // Soft clips cannot be honored by a clear.
                    _ => {}
                }
            }
        }

        let device_rect = path
            .as_rect()
            .filter(|_| state.matrix.rects_stay_rects())
            .map(|r| state.matrix.map_rect(&r));
        let aa = select_aa_mode(
            style.anti_alias,
            self.target.sample_count,
            &state.matrix,
            device_rect.as_ref(),
        );
        let Some(strategy) = select_path_fill(path, state, style, clip_bounds, aa) else {
            return;
        };

        let mut stages: SmallVec<[FragmentStage; 4]> = smallvec![];
        let mut uniforms = DrawUniforms {
            color: style.color,
            ..Default::default()
        };
        let mut textures: SmallVec<[ResourceRef; 2]> = smallvec![];
        let mut clip_handled = false;
        let color = style_color(style);

        let (geometry, mesh) = match strategy {
            FillStrategy::Primitive { mesh, rrect } => {
                if let Some(params) = rrect {
                    stages.push(FragmentStage::AnalyticRRectCoverage);
                    uniforms.coverage_rrect = Some(params);
                }
                (GeometryLayout::PositionColorCoverage, mesh)
            }
            FillStrategy::Triangulated { mesh } => (GeometryLayout::PositionColorCoverage, mesh),
            FillStrategy::Masked { bounds } => {
                let device_path = path.transform(&state.matrix);
                let Some(mut coverage) = ctx.rasterizer.rasterize_path(&device_path, bounds)
                else {
                    tracing::warn!("path rasterization failed; dropping draw");
                    return;
                };
                // A mask-clipped mask draw folds the clip into the same
                // coverage bitmap rather than binding a second mask.
                if class == ClipClass::NeedsMask {
                    let Some(clip_coverage) = ctx.rasterizer.rasterize_clip(&state.clip, bounds)
                    else {
                        tracing::warn!("clip rasterization failed; dropping draw");
                        return;
                    };
                    if !multiply_coverage(&mut coverage, &clip_coverage) {
                        return;
                    }
                    clip_handled = true;
                }
                let Some(texture) = upload_mask(ctx, &coverage) else {
                    return;
                };
                stages.push(FragmentStage::TextureMask);
                uniforms.mask_rect = Some(bounds);
                textures.push(texture);
                (GeometryLayout::PositionColorUv, quad_mesh(bounds, color, 1.0))
            }
        };

        self.push_draw(
            ctx,
            DrawPieces {
                geometry,
                mesh,
                stages,
                uniforms,
                textures,
                sampling: SamplingOptions::default(),
            },
            clip_handled,
            class,
            state,
            style,
            device_bounds,
        );
    }

    fn fill_image(
        &mut self,
        ctx: &mut Context,
        image: &Image,
        src: Rect,
        dst: Rect,
        sampling: SamplingOptions,
        state: &DrawState,
        style: &FillStyle,
    ) {
        let src = src.intersect(&image.bounds());
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let clip_bounds = state.clip.bounds().intersect(&self.target.bounds());
        let raw_bounds = state.matrix.map_rect(&dst);
        let device_bounds = raw_bounds.intersect(&clip_bounds);
        if device_bounds.is_empty() {
            return;
        }
        let class = classify_clip(&state.clip, self.target.bounds(), raw_bounds);
        if class == ClipClass::Empty {
            return;
        }
        let Some(texture) = ctx.texture_for_image(image) else {
            return;
        };
        // Images modulate by paint alpha only; the premultiplied alpha
        // channel carries it for every vertex component.
        let alpha = style.color.a;
        let uv = Rect::new(
            src.x / image.width() as f32,
            src.y / image.height() as f32,
            src.width / image.width() as f32,
            src.height / image.height() as f32,
        );
        let mesh = mapped_quad(&state.matrix, dst, uv, [alpha, alpha, alpha, alpha]);
        let uniforms = DrawUniforms {
            color: style.color,
            ..Default::default()
        };
        self.push_draw(
            ctx,
            DrawPieces {
                geometry: GeometryLayout::PositionColorUv,
                mesh,
                stages: smallvec![FragmentStage::TextureColor],
                uniforms,
                textures: smallvec![texture],
                sampling,
            },
            false,
            class,
            state,
            style,
            device_bounds,
        );
    }

    fn fill_glyphs(
        &mut self,
        ctx: &mut Context,
        run: &GlyphRun,
        state: &DrawState,
        style: &FillStyle,
    ) {
        if run.is_empty() {
            return;
        }
        let clip_bounds = state.clip.bounds().intersect(&self.target.bounds());
        let local = glyph_run_bounds(run);
        let raw_bounds = state.matrix.map_rect(&local).round_out();
        let device_bounds = raw_bounds.intersect(&clip_bounds.round_out());
        if device_bounds.is_empty() {
            return;
        }
        let class = classify_clip(&state.clip, self.target.bounds(), raw_bounds);
        if class == ClipClass::Empty {
            return;
        }
        let Some(mut coverage) = ctx
            .rasterizer
            .rasterize_glyphs(run, &state.matrix, device_bounds)
        else {
            tracing::warn!(font = run.font_id, "glyph rasterization failed; dropping draw");
            return;
        };
        let mut clip_handled = false;
        if class == ClipClass::NeedsMask {
            let Some(clip_coverage) = ctx.rasterizer.rasterize_clip(&state.clip, device_bounds)
            else {
                tracing::warn!("clip rasterization failed; dropping draw");
                return;
            };
            if !multiply_coverage(&mut coverage, &clip_coverage) {
                return;
            }
            clip_handled = true;
        }
        let Some(texture) = upload_mask(ctx, &coverage) else {
            return;
        };
        let uniforms = DrawUniforms {
            color: style.color,
            mask_rect: Some(device_bounds),
            ..Default::default()
        };
        let mesh = quad_mesh(device_bounds, style_color(style), 1.0);
        self.push_draw(
            ctx,
            DrawPieces {
                geometry: GeometryLayout::PositionColorUv,
                mesh,
                stages: smallvec![FragmentStage::TextureMask],
                uniforms,
                textures: smallvec![texture],
                sampling: SamplingOptions::default(),
            },
            clip_handled,
            class,
            state,
            style,
            device_bounds,
        );
    }

    /// Appends the style and clip stages and records the pending draw.
    /// Returns without recording when a clip mask cannot be produced.
    fn push_draw(
        &mut self,
        ctx: &mut Context,
        mut pieces: DrawPieces,
        clip_handled: bool,
        class: ClipClass,
        state: &DrawState,
        style: &FillStyle,
        device_bounds: Rect,
    ) {
        if let Some(shader) = &style.shader {
            pieces.stages.push(FragmentStage::Shader {
                class: shader.program_class(),
            });
        }
        let mut scissor = None;
        match class {
            ClipClass::Empty | ClipClass::Unclipped => {}
            ClipClass::Scissor(rect) => scissor = Some(rect),
            ClipClass::AnalyticCoverage(rect) => {
                pieces.stages.push(FragmentStage::AnalyticRectCoverage);
                pieces.uniforms.coverage_rect = Some(rect);
            }
            ClipClass::NeedsMask => {
                if !clip_handled {
                    let Some(mask) = self.clip_mask_for(ctx, state) else {
                        tracing::warn!("clip mask unavailable; dropping draw");
                        return;
                    };
                    pieces.stages.push(FragmentStage::TextureMask);
                    pieces.uniforms.mask_rect = Some(mask.bounds);
                    pieces.textures.push(mask.texture);
                }
            }
        }
        if let Some(filter) = &style.color_filter {
            pieces.stages.push(FragmentStage::ColorFilter {
                class: filter.program_class(),
            });
        }
        if pieces.mesh.is_empty() {
            return;
        }
        self.ops.push(PendingOp::Draw(PendingDraw {
            pipeline: PipelineDescription {
                geometry: pieces.geometry,
                stages: pieces.stages,
                blend: style.blend_mode,
                sample_count: self.target.sample_count,
            },
            mesh: pieces.mesh,
            uniforms: pieces.uniforms,
            textures: pieces.textures,
            sampling: pieces.sampling,
            scissor,
            bounds: device_bounds,
        }));
    }

    /// The cached clip mask for the current clip identity, rasterizing
    /// and uploading a fresh one on identity change
    fn clip_mask_for(&mut self, ctx: &mut Context, state: &DrawState) -> Option<ClipMask> {
        if let Some(mask) = &self.clip_mask {
            if mask.tag == state.clip_id {
                return Some(mask.clone());
            }
        }
        let bounds = state
            .clip
            .bounds()
            .round_out()
            .intersect(&self.target.bounds());
        if bounds.is_empty() {
            return None;
        }
        let coverage = ctx.rasterizer.rasterize_clip(&state.clip, bounds)?;
        let texture = upload_mask(ctx, &coverage)?;
        let mask = ClipMask {
            tag: state.clip_id,
            texture,
            bounds,
        };
        self.clip_mask = Some(mask.clone());
        Some(mask)
    }
}

impl DrawContext for RenderContext {
    fn clear(&mut self, state: &DrawState, color: Color) {
        let style = FillStyle {
            color: color.premultiply(),
            blend_mode: BlendMode::Src,
            anti_alias: false,
            ..Default::default()
        };
        // Clears operate in device space; the transform is dropped, the
        // clip is kept.
        let mut device_state = state.clone();
        device_state.matrix = Matrix::identity();
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        self.fill_path(ctx, &Path::rect(self.target.bounds()), &device_state, &style);
    }

    fn draw_rect(&mut self, rect: &Rect, state: &DrawState, style: &FillStyle) {
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        self.fill_path(ctx, &Path::rect(*rect), state, style);
    }

    fn draw_rrect(&mut self, rrect: &RRect, state: &DrawState, style: &FillStyle) {
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        self.fill_path(ctx, &Path::rrect(*rrect), state, style);
    }

    fn draw_path(&mut self, path: &Path, state: &DrawState, style: &FillStyle) {
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        self.fill_path(ctx, path, state, style);
    }

    fn draw_image_rect(
        &mut self,
        image: &Image,
        src: Rect,
        dst: Rect,
        sampling: SamplingOptions,
        state: &DrawState,
        style: &FillStyle,
    ) {
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        self.fill_image(ctx, image, src, dst, sampling, state, style);
    }

    fn draw_glyph_run(&mut self, run: &GlyphRun, state: &DrawState, style: &FillStyle) {
        let context = self.context.clone();
        let ctx = &mut *context.borrow_mut();
        self.fill_glyphs(ctx, run, state, style);
    }
}

struct DrawPieces {
    geometry: GeometryLayout,
    mesh: Mesh,
    stages: SmallVec<[FragmentStage; 4]>,
    uniforms: DrawUniforms,
    textures: SmallVec<[ResourceRef; 2]>,
    sampling: SamplingOptions,
}

fn style_color(style: &FillStyle) -> [f32; 4] {
    [style.color.r, style.color.g, style.color.b, style.color.a]
}

fn upload_mask(ctx: &mut Context, coverage: &CoverageMask) -> Option<ResourceRef> {
    if !coverage.is_valid() {
        debug_assert!(false, "coverage bitmap does not match its dimensions");
        return None;
    }
    let texture = ctx.scratch_texture(TextureDescriptor {
        width: coverage.width,
        height: coverage.height,
        format: TextureFormat::Alpha8,
        sample_count: 1,
        renderable: false,
    })?;
    ctx.backend
        .upload_texture(texture.handle(), coverage.width, coverage.height, &coverage.data);
    Some(texture)
}

/// In-place product of two coverage bitmaps; false when their
/// dimensions disagree
fn multiply_coverage(dst: &mut CoverageMask, src: &CoverageMask) -> bool {
    if dst.width != src.width || dst.height != src.height {
        debug_assert!(false, "coverage bitmaps have mismatched dimensions");
        return false;
    }
    for (d, s) in dst.data.iter_mut().zip(&src.data) {
        *d = ((*d as u16 * *s as u16) / 255) as u8;
    }
    true
}

/// Quad over `dst` mapped through `matrix`, with `uv` in normalized
/// texture space
fn mapped_quad(matrix: &Matrix, dst: Rect, uv: Rect, color: [f32; 4]) -> Mesh {
    let corners = [
        Point::new(dst.left(), dst.top()),
        Point::new(dst.right(), dst.top()),
        Point::new(dst.right(), dst.bottom()),
        Point::new(dst.left(), dst.bottom()),
    ];
    let uvs = [
        [uv.left(), uv.top()],
        [uv.right(), uv.top()],
        [uv.right(), uv.bottom()],
        [uv.left(), uv.bottom()],
    ];
    Mesh {
        vertices: corners
            .iter()
            .zip(uvs)
            .map(|(corner, uv)| {
                let p = matrix.map_point(*corner);
                Vertex {
                    position: [p.x, p.y],
                    color,
                    coverage: 1.0,
                    uv,
                }
            })
            .collect(),
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

/// Conservative local-space bounds of a glyph run: the positions'
/// bounding box padded by the nominal glyph extent
fn glyph_run_bounds(run: &GlyphRun) -> Rect {
    let mut left = f32::MAX;
    let mut top = f32::MAX;
    let mut right = f32::MIN;
    let mut bottom = f32::MIN;
    for glyph in &run.glyphs {
        left = left.min(glyph.position.x);
        top = top.min(glyph.position.y);
        right = right.max(glyph.position.x);
        bottom = bottom.max(glyph.position.y);
    }
    Rect::from_ltrb(left, top, right, bottom).inset(-run.size, -run.size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::Paint;

    #[derive(Default)]
    struct RecordingDrawContext {
        clip_ids: Vec<u32>,
        rects: Vec<Rect>,
    }

    impl DrawContext for RecordingDrawContext {
        fn clear(&mut self, _state: &DrawState, _color: Color) {}
        fn draw_rect(&mut self, rect: &Rect, state: &DrawState, _style: &FillStyle) {
            self.clip_ids.push(state.clip_id);
            self.rects.push(state.matrix.map_rect(rect));
        }
        fn draw_rrect(&mut self, _rrect: &RRect, _state: &DrawState, _style: &FillStyle) {}
        fn draw_path(&mut self, _path: &Path, _state: &DrawState, _style: &FillStyle) {}
        fn draw_image_rect(
            &mut self,
            _image: &Image,
            _src: Rect,
            _dst: Rect,
            _sampling: SamplingOptions,
            _state: &DrawState,
            _style: &FillStyle,
        ) {
        }
        fn draw_glyph_run(&mut self, _run: &GlyphRun, _state: &DrawState, _style: &FillStyle) {}
    }

    #[test]
    fn wrap_collapses_identity_to_none() {
        let mut inner = RecordingDrawContext::default();
        assert!(TransformContext::wrap(&mut inner, Matrix::identity(), None).is_none());
        assert!(TransformContext::wrap(&mut inner, Matrix::translate(1.0, 0.0), None).is_some());
        assert!(TransformContext::wrap(
            &mut inner,
            Matrix::identity(),
            Some(Path::rect(Rect::new(0.0, 0.0, 10.0, 10.0)))
        )
        .is_some());
    }

    #[test]
    fn transform_context_prepends_its_matrix() {
        let mut inner = RecordingDrawContext::default();
        let mut outer =
            TransformContext::wrap(&mut inner, Matrix::translate(100.0, 0.0), None).unwrap();
        let state = DrawState::new(Rect::new(0.0, 0.0, 400.0, 400.0));
        let style = FillStyle::from_paint(&Paint::new());
        outer.draw_rect(&Rect::new(0.0, 0.0, 10.0, 10.0), &state, &style);
        assert_eq!(inner.rects, vec![Rect::new(100.0, 0.0, 10.0, 10.0)]);
    }

    #[test]
    fn merged_clip_identity_is_stable_per_incoming_clip() {
        let mut inner = RecordingDrawContext::default();
        let mut outer = TransformContext::wrap(
            &mut inner,
            Matrix::identity(),
            Some(Path::rect(Rect::new(0.0, 0.0, 50.0, 50.0))),
        )
        .unwrap();
        let state = DrawState::new(Rect::new(0.0, 0.0, 400.0, 400.0));
        let style = FillStyle::from_paint(&Paint::new());
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        outer.draw_rect(&rect, &state, &style);
        outer.draw_rect(&rect, &state, &style);
        assert_eq!(inner.clip_ids.len(), 2);
        // Same incoming clip, same merged identity.
        assert_eq!(inner.clip_ids[0], inner.clip_ids[1]);
        // And the merged identity differs from the incoming one.
        assert_ne!(inner.clip_ids[0], state.clip_id);
    }

    #[test]
    fn glyph_bounds_pad_by_glyph_extent() {
        let run = GlyphRun {
            font_id: 1,
            size: 12.0,
            glyphs: vec![
                crate::raster::Glyph {
                    id: 1,
                    position: Point::new(10.0, 50.0),
                },
                crate::raster::Glyph {
                    id: 2,
                    position: Point::new(40.0, 50.0),
                },
            ],
        };
        let bounds = glyph_run_bounds(&run);
        assert_eq!(bounds, Rect::from_ltrb(-2.0, 38.0, 52.0, 62.0));
    }
}
