//! Abstract GPU boundary
//!
//! The engine never talks to a native graphics API directly; it
//! compiles programs, allocates resources and issues draws through
//! [`GpuBackend`]. Every allocation point is fallible, and a failure
//! aborts only the draw call that needed the object.

use glint_core::{BlendMode, Color, Rect, SamplingOptions};
use smallvec::SmallVec;

use crate::key::BytesKey;

/// Backend-owned compiled program
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Backend-owned GPU object (texture or buffer)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// Pixel format of an allocated texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    /// Single-channel coverage
    Alpha8,
    Rgba8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            TextureFormat::Alpha8 => 1,
            TextureFormat::Rgba8 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub sample_count: u32,
    /// Usable as a render target
    pub renderable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub kind: BufferKind,
    pub size: usize,
}

/// What to allocate; also the source of shape-based recycle keys
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceDescriptor {
    Texture(TextureDescriptor),
    Buffer(BufferDescriptor),
}

impl ResourceDescriptor {
    /// Approximate GPU memory the object will occupy
    pub fn byte_size(&self) -> usize {
        match self {
            ResourceDescriptor::Texture(t) => {
                (t.width as usize)
                    * (t.height as usize)
                    * t.format.bytes_per_pixel()
                    * (t.sample_count.max(1) as usize)
            }
            ResourceDescriptor::Buffer(b) => b.size,
        }
    }

    /// Key describing the reusable shape of the object, so same-shaped
    /// scratch resources pool across frames
    pub fn recycle_key(&self) -> BytesKey {
        let mut key = BytesKey::with_capacity(6);
        match self {
            ResourceDescriptor::Texture(t) => {
                key.write_u32(0);
                key.write_u32(t.width);
                key.write_u32(t.height);
                key.write_u32(match t.format {
                    TextureFormat::Alpha8 => 0,
                    TextureFormat::Rgba8 => 1,
                });
                key.write_u32(t.sample_count);
                key.write_bool(t.renderable);
            }
            ResourceDescriptor::Buffer(b) => {
                key.write_u32(1);
                key.write_u32(match b.kind {
                    BufferKind::Vertex => 0,
                    BufferKind::Index => 1,
                });
                // Size class, so slightly different batch sizes still pool.
                key.write_u32(b.size.next_power_of_two() as u32);
            }
        }
        key
    }
}

/// Vertex attribute layout a pipeline expects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryLayout {
    /// position.xy + premultiplied color
    PositionColor,
    /// position.xy + color + scalar coverage
    PositionColorCoverage,
    /// position.xy + color + uv
    PositionColorUv,
}

/// One link in a pipeline's fragment effect chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentStage {
    /// Analytic coverage of an axis-aligned rect (clip or fill)
    AnalyticRectCoverage,
    /// Analytic coverage of a rounded rect
    AnalyticRRectCoverage,
    /// Multiply by a sampled single-channel coverage texture
    TextureMask,
    /// Modulate by a sampled RGBA texture
    TextureColor,
    /// An opaque user shader; `class` identifies the generated code,
    /// so instances of one class share compiled programs
    Shader { class: u32 },
    /// An opaque user color filter class
    ColorFilter { class: u32 },
}

impl FragmentStage {
    fn write_to(&self, key: &mut BytesKey) {
        match *self {
            FragmentStage::AnalyticRectCoverage => key.write_u32(0),
            FragmentStage::AnalyticRRectCoverage => key.write_u32(1),
            FragmentStage::TextureMask => key.write_u32(2),
            FragmentStage::TextureColor => key.write_u32(3),
            FragmentStage::Shader { class } => {
                key.write_u32(4);
                key.write_u32(class);
            }
            FragmentStage::ColorFilter { class } => {
                key.write_u32(5);
                key.write_u32(class);
            }
        }
    }
}

/// Everything that determines which compiled program a draw needs.
///
/// Analytic shape parameters and colors are uniforms and deliberately
/// not part of the description.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineDescription {
    pub geometry: GeometryLayout,
    pub stages: SmallVec<[FragmentStage; 4]>,
    pub blend: BlendMode,
    pub sample_count: u32,
}

impl PipelineDescription {
    /// Deterministic key: identical descriptions always produce
    /// identical keys, distinct descriptions never collide
    pub fn compute_key(&self) -> BytesKey {
        let mut key = BytesKey::with_capacity(4 + self.stages.len() * 2);
        key.write_u32(self.geometry as u32);
        key.write_u32(self.blend.as_key());
        key.write_u32(self.sample_count);
        key.write_u32(self.stages.len() as u32);
        for stage in &self.stages {
            stage.write_to(&mut key);
        }
        key
    }
}

/// Shape-independent uniform data bound with a draw
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawUniforms {
    pub color: Color,
    /// Rect for analytic rect coverage stages, device space
    pub coverage_rect: Option<Rect>,
    /// (rect, radius_x, radius_y) for analytic rounded-rect stages
    pub coverage_rrect: Option<(Rect, f32, f32)>,
    /// Device-space rect a mask texture maps onto
    pub mask_rect: Option<Rect>,
}

/// A fully-resolved draw ready for the backend
pub struct DrawSubmission<'a> {
    pub program: ProgramHandle,
    pub vertex_buffer: ResourceHandle,
    pub index_buffer: Option<ResourceHandle>,
    pub vertex_count: u32,
    pub index_count: u32,
    /// Base vertex / base index into the shared batch buffers
    pub base_vertex: u32,
    pub base_index: u32,
    pub textures: &'a [ResourceHandle],
    /// Sampler configuration for the bound textures
    pub sampling: SamplingOptions,
    pub uniforms: &'a DrawUniforms,
    pub blend: BlendMode,
}

/// Backend failure at an allocation or compilation point
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("program compilation failed: {0}")]
    Compilation(String),
    #[error("resource allocation failed: {0}")]
    Allocation(String),
    #[error("out of GPU memory")]
    OutOfMemory,
}

/// The downstream interface the engine drives.
///
/// Implementations wrap a native graphics API. Submission is
/// fire-and-forget: `flush` marks a batching boundary and must not
/// block for completion.
pub trait GpuBackend {
    fn compile_program(&mut self, desc: &PipelineDescription) -> Result<ProgramHandle, BackendError>;

    fn allocate_resource(&mut self, desc: &ResourceDescriptor)
        -> Result<ResourceHandle, BackendError>;

    fn release_resource(&mut self, handle: ResourceHandle);

    fn release_program(&mut self, handle: ProgramHandle);

    fn upload_texture(&mut self, handle: ResourceHandle, width: u32, height: u32, data: &[u8]);

    fn upload_buffer(&mut self, handle: ResourceHandle, data: &[u8]);

    fn bind_scissor(&mut self, rect: Option<Rect>);

    fn clear(&mut self, scissor: Option<Rect>, color: Color);

    fn issue_draw(&mut self, draw: &DrawSubmission<'_>);

    /// Batching boundary; must not block
    fn flush(&mut self) {}
}

/// Everything a [`RecordingBackend`] saw, in issue order
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    Compile(BytesKey),
    Allocate(ResourceDescriptor),
    ReleaseResource(ResourceHandle),
    ReleaseProgram(ProgramHandle),
    UploadTexture {
        handle: ResourceHandle,
        width: u32,
        height: u32,
    },
    UploadBuffer {
        handle: ResourceHandle,
        bytes: usize,
    },
    Scissor(Option<Rect>),
    Clear {
        scissor: Option<Rect>,
        color: Color,
    },
    Draw {
        program: ProgramHandle,
        textures: Vec<ResourceHandle>,
        vertex_count: u32,
        index_count: u32,
    },
    Flush,
}

/// An in-memory backend that records every call.
///
/// Used by the test suite to observe the exact operation stream the
/// engine produces; also handy for debugging op batching. Allocation
/// and compilation failures can be injected.
#[derive(Default)]
pub struct RecordingBackend {
    pub events: Vec<BackendEvent>,
    next_handle: u64,
    pub fail_allocations: bool,
    pub fail_compilations: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Events of interest to most tests: clears and draws only
    pub fn visual_events(&self) -> Vec<&BackendEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, BackendEvent::Clear { .. } | BackendEvent::Draw { .. }))
            .collect()
    }
}

impl GpuBackend for RecordingBackend {
    fn compile_program(
        &mut self,
        desc: &PipelineDescription,
    ) -> Result<ProgramHandle, BackendError> {
        if self.fail_compilations {
            return Err(BackendError::Compilation("injected failure".into()));
        }
        self.events.push(BackendEvent::Compile(desc.compute_key()));
        Ok(ProgramHandle(self.next()))
    }

    fn allocate_resource(
        &mut self,
        desc: &ResourceDescriptor,
    ) -> Result<ResourceHandle, BackendError> {
        if self.fail_allocations {
            return Err(BackendError::OutOfMemory);
        }
        self.events.push(BackendEvent::Allocate(*desc));
        Ok(ResourceHandle(self.next()))
    }

    fn release_resource(&mut self, handle: ResourceHandle) {
        self.events.push(BackendEvent::ReleaseResource(handle));
    }

    fn release_program(&mut self, handle: ProgramHandle) {
        self.events.push(BackendEvent::ReleaseProgram(handle));
    }

    fn upload_texture(&mut self, handle: ResourceHandle, width: u32, height: u32, _data: &[u8]) {
        self.events.push(BackendEvent::UploadTexture {
            handle,
            width,
            height,
        });
    }

    fn upload_buffer(&mut self, handle: ResourceHandle, data: &[u8]) {
        self.events.push(BackendEvent::UploadBuffer {
            handle,
            bytes: data.len(),
        });
    }

    fn bind_scissor(&mut self, rect: Option<Rect>) {
        self.events.push(BackendEvent::Scissor(rect));
    }

    fn clear(&mut self, scissor: Option<Rect>, color: Color) {
        self.events.push(BackendEvent::Clear { scissor, color });
    }

    fn issue_draw(&mut self, draw: &DrawSubmission<'_>) {
        self.events.push(BackendEvent::Draw {
            program: draw.program,
            textures: draw.textures.to_vec(),
            vertex_count: draw.vertex_count,
            index_count: draw.index_count,
        });
    }

    fn flush(&mut self) {
        self.events.push(BackendEvent::Flush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn pipeline_keys_are_deterministic() {
        let desc = PipelineDescription {
            geometry: GeometryLayout::PositionColorCoverage,
            stages: smallvec![FragmentStage::AnalyticRectCoverage, FragmentStage::TextureMask],
            blend: BlendMode::SrcOver,
            sample_count: 1,
        };
        assert_eq!(desc.compute_key(), desc.compute_key());
    }

    #[test]
    fn distinct_pipelines_get_distinct_keys() {
        let base = PipelineDescription {
            geometry: GeometryLayout::PositionColor,
            stages: smallvec![],
            blend: BlendMode::SrcOver,
            sample_count: 1,
        };
        let mut blend = base.clone();
        blend.blend = BlendMode::Src;
        let mut staged = base.clone();
        staged.stages = smallvec![FragmentStage::Shader { class: 7 }];
        assert_ne!(base.compute_key(), blend.compute_key());
        assert_ne!(base.compute_key(), staged.compute_key());
        assert_ne!(blend.compute_key(), staged.compute_key());
    }

    #[test]
    fn texture_recycle_keys_pool_by_shape() {
        let a = ResourceDescriptor::Texture(TextureDescriptor {
            width: 256,
            height: 256,
            format: TextureFormat::Alpha8,
            sample_count: 1,
            renderable: false,
        });
        let b = a;
        let c = ResourceDescriptor::Texture(TextureDescriptor {
            width: 128,
            height: 256,
            format: TextureFormat::Alpha8,
            sample_count: 1,
            renderable: false,
        });
        assert_eq!(a.recycle_key(), b.recycle_key());
        assert_ne!(a.recycle_key(), c.recycle_key());
    }

    #[test]
    fn buffer_recycle_keys_use_size_classes() {
        let a = ResourceDescriptor::Buffer(BufferDescriptor {
            kind: BufferKind::Vertex,
            size: 900,
        });
        let b = ResourceDescriptor::Buffer(BufferDescriptor {
            kind: BufferKind::Vertex,
            size: 1000,
        });
        // Both round up to the 1024 size class.
        assert_eq!(a.recycle_key(), b.recycle_key());
    }
}
