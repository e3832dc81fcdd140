//! Backend-agnostic immediate-mode graphics pipe contract.
//!
//! The D3D9 translation core in `novem-d3d9` never talks to a concrete GPU
//! API. Everything it needs from a backend is captured by the [`Pipe`] trait:
//! resource creation/destruction, pipeline binds, draws, clears, and the
//! asynchronous query lifecycle. A backend is free to execute these calls on
//! whatever API it likes (or on no API at all; see [`trace::TracePipe`]);
//! the contract is that calls are executed in submission order.
//!
//! State values cross this boundary in raw D3D9 encoding (`state_id`/`value`
//! pairs, vec4 constant registers). Translating them to a concrete pipeline
//! representation is the backend's problem, which keeps this crate free of
//! any rendering dependencies.

pub mod trace;

use bitflags::bitflags;
use thiserror::Error;

/// Opaque handle to a backend resource (buffer or texture).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u32);

/// Opaque handle to a backend query object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub u32);

#[derive(Debug, Error)]
pub enum PipeError {
    /// The backend could not allocate the resource. Callers are expected to
    /// free what they can and retry once before giving up.
    #[error("backend out of memory creating {kind:?} ({size} bytes)")]
    OutOfMemory { kind: ResourceKind, size: u64 },
    #[error("unknown resource handle {0:?}")]
    UnknownResource(ResourceHandle),
    #[error("unknown query handle {0:?}")]
    UnknownQuery(QueryHandle),
    #[error("query type {0:?} not supported by this backend")]
    UnsupportedQueryType(PipeQueryType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    VertexBuffer,
    IndexBuffer,
    Texture,
    RenderTarget,
    DepthStencil,
}

/// Descriptor for resource creation.
///
/// Width/height are only meaningful for texture-like kinds; buffer kinds use
/// `size` alone. `levels` counts mip levels (0 is invalid).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceDesc {
    pub kind: ResourceKind,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
}

impl ResourceDesc {
    pub fn buffer(kind: ResourceKind, size: u64) -> Self {
        Self {
            kind,
            size,
            width: 0,
            height: 0,
            levels: 1,
        }
    }

    pub fn texture(kind: ResourceKind, width: u32, height: u32, levels: u32) -> Self {
        Self {
            kind,
            size: 0,
            width,
            height,
            levels,
        }
    }
}

/// Asynchronous query types the pipe may support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipeQueryType {
    /// Fence-like "all previous work done" query.
    Event,
    /// Samples that passed the depth test.
    Occlusion,
    /// A single timestamp, in nanoseconds.
    Timestamp,
    /// Whether timestamps were reliable over the bracketed interval.
    TimestampDisjoint,
    /// Vertex/primitive invocation counters over the bracketed interval.
    PipelineStatistics,
}

bitflags! {
    /// Capability bits reported by the backend, used by the device layer to
    /// decide which D3D9 query types to advertise.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QueryCaps: u32 {
        const EVENT      = 1 << 0;
        const OCCLUSION  = 1 << 1;
        const TIMESTAMP  = 1 << 2;
        const PIPELINE_STATISTICS = 1 << 3;
    }
}

bitflags! {
    /// Clear targets, mirroring the D3DCLEAR_* encoding.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClearFlags: u32 {
        const TARGET  = 1 << 0;
        const ZBUFFER = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Static backend capabilities.
#[derive(Clone, Copy, Debug)]
pub struct PipeCaps {
    pub queries: QueryCaps,
    pub max_streams: u32,
    pub max_vs_const_f: u32,
    /// Occlusion counters are 64-bit on the backend; D3D9 narrows to 32.
    pub occlusion_counter_bits: u32,
}

impl Default for PipeCaps {
    fn default() -> Self {
        Self {
            queries: QueryCaps::all(),
            max_streams: 16,
            max_vs_const_f: 256,
            occlusion_counter_bits: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexStreamBinding {
    pub buffer: ResourceHandle,
    pub offset: u64,
    pub stride: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBinding {
    pub buffer: ResourceHandle,
    pub format: IndexFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Token identifying a translated shader on the backend. The frontend
/// assigns keys; the backend resolves them to whatever compiled artifact it
/// caches (see the shader-translation layer, which is a separate concern).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderKey(pub u32);

/// One element of a vertex declaration, in raw D3DVERTEXELEMENT9 encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexElement {
    pub stream: u16,
    pub offset: u16,
    pub decl_type: u8,
    pub method: u8,
    pub usage: u8,
    pub usage_index: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

/// Decoded result of a completed query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryResult {
    /// Event/fence queries report only completion.
    Signaled,
    /// Samples passed, full backend precision.
    Occlusion(u64),
    /// Nanosecond timestamp.
    Timestamp(u64),
    /// Timestamps disjoint over the bracketed interval.
    TimestampDisjoint(bool),
    PipelineStatistics {
        vertices_invoked: u64,
        primitives_generated: u64,
    },
}

/// The immediate-mode backend the command layer drives.
///
/// Execution order equals call order; nothing here is allowed to reorder.
/// All binds are sticky until rebound. A `None` binding unbinds the slot.
pub trait Pipe: Send {
    fn caps(&self) -> PipeCaps;

    fn create_resource(&mut self, desc: &ResourceDesc) -> Result<ResourceHandle, PipeError>;
    fn destroy_resource(&mut self, handle: ResourceHandle);

    fn set_render_state(&mut self, state_id: u32, value: u32);
    fn set_sampler_state(&mut self, sampler: u32, state_id: u32, value: u32);
    fn bind_texture(&mut self, sampler: u32, texture: Option<ResourceHandle>);
    fn bind_vertex_stream(&mut self, stream: u32, binding: Option<VertexStreamBinding>);
    fn bind_index_buffer(&mut self, binding: Option<IndexBinding>);
    fn bind_shader(&mut self, stage: ShaderStage, shader: Option<ShaderKey>);
    fn set_vertex_declaration(&mut self, elements: Option<&[VertexElement]>);
    fn set_clip_plane(&mut self, index: u32, plane: &[f32; 4]);
    fn set_constants_f(&mut self, stage: ShaderStage, start_register: u32, data: &[f32]);
    fn set_constants_i(&mut self, stage: ShaderStage, start_register: u32, data: &[i32]);
    fn set_constants_b(&mut self, stage: ShaderStage, start_register: u32, data: &[u32]);
    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor(&mut self, rect: &Rect);

    fn clear(&mut self, flags: ClearFlags, color: u32, depth: f32, stencil: u32);
    fn draw(&mut self, topology: PrimitiveTopology, start_vertex: u32, vertex_count: u32);
    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        base_vertex: i32,
        start_index: u32,
        index_count: u32,
    );

    fn query_create(&mut self, kind: PipeQueryType) -> Result<QueryHandle, PipeError>;
    fn query_destroy(&mut self, handle: QueryHandle);
    fn query_begin(&mut self, handle: QueryHandle) -> Result<(), PipeError>;
    fn query_end(&mut self, handle: QueryHandle) -> Result<(), PipeError>;
    /// Polls (or, with `wait`, blocks for) the result of an ended query.
    /// `Ok(None)` means "not ready yet" and is only possible when `wait` is
    /// false.
    fn query_result(
        &mut self,
        handle: QueryHandle,
        wait: bool,
    ) -> Result<Option<QueryResult>, PipeError>;

    /// Makes all submitted work observable. Backends that buffer internally
    /// must drain here.
    fn flush(&mut self);
}
