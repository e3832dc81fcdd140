//! In-memory recording [`Pipe`] implementation.
//!
//! `TracePipe` executes nothing. It records every call into a replayable
//! trace so tests can assert on exactly what reached the backend and in what
//! order, and it simulates the asynchronous query model: a query's result
//! becomes available once it has been ended *and* the pipe has been flushed
//! (or immediately on a blocking wait), which is enough to exercise the
//! not-ready/wait paths of the query state machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::{
    ClearFlags, IndexBinding, Pipe, PipeCaps, PipeError, PipeQueryType, PrimitiveTopology,
    QueryCaps, QueryHandle, QueryResult, Rect, ResourceDesc, ResourceHandle, ShaderKey,
    ShaderStage, VertexElement, VertexStreamBinding, Viewport,
};

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceCall {
    CreateResource(ResourceDesc, ResourceHandle),
    DestroyResource(ResourceHandle),
    SetRenderState { state_id: u32, value: u32 },
    SetSamplerState { sampler: u32, state_id: u32, value: u32 },
    BindTexture { sampler: u32, texture: Option<ResourceHandle> },
    BindVertexStream { stream: u32, binding: Option<VertexStreamBinding> },
    BindIndexBuffer(Option<IndexBinding>),
    BindShader { stage: ShaderStage, shader: Option<ShaderKey> },
    SetVertexDeclaration(Option<Vec<VertexElement>>),
    SetClipPlane { index: u32, plane: [f32; 4] },
    SetConstantsF { stage: ShaderStage, start_register: u32, data: Vec<f32> },
    SetConstantsI { stage: ShaderStage, start_register: u32, data: Vec<i32> },
    SetConstantsB { stage: ShaderStage, start_register: u32, data: Vec<u32> },
    SetViewport(Viewport),
    SetScissor(Rect),
    Clear { flags: ClearFlags, color: u32, depth: f32, stencil: u32 },
    Draw { topology: PrimitiveTopology, start_vertex: u32, vertex_count: u32 },
    DrawIndexed {
        topology: PrimitiveTopology,
        base_vertex: i32,
        start_index: u32,
        index_count: u32,
    },
    QueryCreate(PipeQueryType, QueryHandle),
    QueryDestroy(QueryHandle),
    QueryBegin(QueryHandle),
    QueryEnd(QueryHandle),
    Flush,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimQueryState {
    Idle,
    Active,
    Ended { flushed: bool },
}

#[derive(Debug)]
struct SimQuery {
    kind: PipeQueryType,
    state: SimQueryState,
    /// Counter snapshotted at `query_end`.
    value: u64,
}

/// Shared view of a [`TracePipe`]'s recorded calls. Lets a test keep
/// asserting after the pipe itself has moved into a worker thread.
#[derive(Clone, Debug, Default)]
pub struct TraceLog(Arc<Mutex<Vec<TraceCall>>>);

impl TraceLog {
    pub fn snapshot(&self) -> Vec<TraceCall> {
        self.0.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<TraceCall> {
        std::mem::take(&mut self.0.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }

    pub fn contains(&self, call: &TraceCall) -> bool {
        self.0.lock().unwrap().contains(call)
    }

    fn push(&self, call: TraceCall) {
        self.0.lock().unwrap().push(call);
    }
}

/// Recording pipe with simulated query completion.
#[derive(Debug, Default)]
pub struct TracePipe {
    log: TraceLog,
    caps: PipeCaps,
    next_resource: u32,
    next_query: u32,
    live_resources: HashMap<ResourceHandle, ResourceDesc>,
    queries: HashMap<QueryHandle, SimQuery>,
    /// Monotonic counter fed to occlusion/timestamp results so successive
    /// queries observe distinct values.
    ticks: u64,
    /// When set, the next `create_resource` fails once. Tests use this to
    /// exercise the caller's evict-and-retry policy.
    fail_next_create: bool,
}

impl TracePipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(caps: PipeCaps) -> Self {
        Self {
            caps,
            ..Self::default()
        }
    }

    /// Handle for reading the recorded calls, usable from outside after
    /// the pipe has been handed to a context.
    pub fn log(&self) -> TraceLog {
        self.log.clone()
    }

    pub fn calls(&self) -> Vec<TraceCall> {
        self.log.snapshot()
    }

    pub fn live_resource_count(&self) -> usize {
        self.live_resources.len()
    }

    pub fn fail_next_create(&mut self) {
        self.fail_next_create = true;
    }

    fn query_supported(&self, kind: PipeQueryType) -> bool {
        let needed = match kind {
            PipeQueryType::Event => QueryCaps::EVENT,
            PipeQueryType::Occlusion => QueryCaps::OCCLUSION,
            PipeQueryType::Timestamp | PipeQueryType::TimestampDisjoint => QueryCaps::TIMESTAMP,
            PipeQueryType::PipelineStatistics => QueryCaps::PIPELINE_STATISTICS,
        };
        self.caps.queries.contains(needed)
    }

    fn decode(kind: PipeQueryType, value: u64) -> QueryResult {
        match kind {
            PipeQueryType::Event => QueryResult::Signaled,
            PipeQueryType::Occlusion => QueryResult::Occlusion(value),
            PipeQueryType::Timestamp => QueryResult::Timestamp(value),
            PipeQueryType::TimestampDisjoint => QueryResult::TimestampDisjoint(false),
            PipeQueryType::PipelineStatistics => QueryResult::PipelineStatistics {
                vertices_invoked: value,
                primitives_generated: value / 3,
            },
        }
    }
}

impl Pipe for TracePipe {
    fn caps(&self) -> PipeCaps {
        self.caps
    }

    fn create_resource(&mut self, desc: &ResourceDesc) -> Result<ResourceHandle, PipeError> {
        if self.fail_next_create {
            self.fail_next_create = false;
            return Err(PipeError::OutOfMemory {
                kind: desc.kind,
                size: desc.size,
            });
        }
        let handle = ResourceHandle(self.next_resource);
        self.next_resource += 1;
        self.live_resources.insert(handle, *desc);
        self.log.push(TraceCall::CreateResource(*desc, handle));
        trace!(?handle, kind = ?desc.kind, "trace pipe resource created");
        Ok(handle)
    }

    fn destroy_resource(&mut self, handle: ResourceHandle) {
        self.live_resources.remove(&handle);
        self.log.push(TraceCall::DestroyResource(handle));
    }

    fn set_render_state(&mut self, state_id: u32, value: u32) {
        self.log.push(TraceCall::SetRenderState { state_id, value });
    }

    fn set_sampler_state(&mut self, sampler: u32, state_id: u32, value: u32) {
        self.log.push(TraceCall::SetSamplerState {
            sampler,
            state_id,
            value,
        });
    }

    fn bind_texture(&mut self, sampler: u32, texture: Option<ResourceHandle>) {
        self.log.push(TraceCall::BindTexture { sampler, texture });
    }

    fn bind_vertex_stream(&mut self, stream: u32, binding: Option<VertexStreamBinding>) {
        self.log.push(TraceCall::BindVertexStream { stream, binding });
    }

    fn bind_index_buffer(&mut self, binding: Option<IndexBinding>) {
        self.log.push(TraceCall::BindIndexBuffer(binding));
    }

    fn bind_shader(&mut self, stage: ShaderStage, shader: Option<ShaderKey>) {
        self.log.push(TraceCall::BindShader { stage, shader });
    }

    fn set_vertex_declaration(&mut self, elements: Option<&[VertexElement]>) {
        self.log.push(TraceCall::SetVertexDeclaration(elements.map(<[_]>::to_vec)));
    }

    fn set_clip_plane(&mut self, index: u32, plane: &[f32; 4]) {
        self.log.push(TraceCall::SetClipPlane {
            index,
            plane: *plane,
        });
    }

    fn set_constants_f(&mut self, stage: ShaderStage, start_register: u32, data: &[f32]) {
        self.log.push(TraceCall::SetConstantsF {
            stage,
            start_register,
            data: data.to_vec(),
        });
    }

    fn set_constants_i(&mut self, stage: ShaderStage, start_register: u32, data: &[i32]) {
        self.log.push(TraceCall::SetConstantsI {
            stage,
            start_register,
            data: data.to_vec(),
        });
    }

    fn set_constants_b(&mut self, stage: ShaderStage, start_register: u32, data: &[u32]) {
        self.log.push(TraceCall::SetConstantsB {
            stage,
            start_register,
            data: data.to_vec(),
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.log.push(TraceCall::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, rect: &Rect) {
        self.log.push(TraceCall::SetScissor(*rect));
    }

    fn clear(&mut self, flags: ClearFlags, color: u32, depth: f32, stencil: u32) {
        self.log.push(TraceCall::Clear {
            flags,
            color,
            depth,
            stencil,
        });
    }

    fn draw(&mut self, topology: PrimitiveTopology, start_vertex: u32, vertex_count: u32) {
        self.ticks += u64::from(vertex_count);
        self.log.push(TraceCall::Draw {
            topology,
            start_vertex,
            vertex_count,
        });
    }

    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        base_vertex: i32,
        start_index: u32,
        index_count: u32,
    ) {
        self.ticks += u64::from(index_count);
        self.log.push(TraceCall::DrawIndexed {
            topology,
            base_vertex,
            start_index,
            index_count,
        });
    }

    fn query_create(&mut self, kind: PipeQueryType) -> Result<QueryHandle, PipeError> {
        if !self.query_supported(kind) {
            return Err(PipeError::UnsupportedQueryType(kind));
        }
        let handle = QueryHandle(self.next_query);
        self.next_query += 1;
        self.queries.insert(
            handle,
            SimQuery {
                kind,
                state: SimQueryState::Idle,
                value: 0,
            },
        );
        self.log.push(TraceCall::QueryCreate(kind, handle));
        Ok(handle)
    }

    fn query_destroy(&mut self, handle: QueryHandle) {
        self.queries.remove(&handle);
        self.log.push(TraceCall::QueryDestroy(handle));
    }

    fn query_begin(&mut self, handle: QueryHandle) -> Result<(), PipeError> {
        let query = self
            .queries
            .get_mut(&handle)
            .ok_or(PipeError::UnknownQuery(handle))?;
        query.state = SimQueryState::Active;
        self.log.push(TraceCall::QueryBegin(handle));
        Ok(())
    }

    fn query_end(&mut self, handle: QueryHandle) -> Result<(), PipeError> {
        self.ticks += 1;
        let ticks = self.ticks;
        let query = self
            .queries
            .get_mut(&handle)
            .ok_or(PipeError::UnknownQuery(handle))?;
        query.state = SimQueryState::Ended { flushed: false };
        query.value = ticks;
        self.log.push(TraceCall::QueryEnd(handle));
        Ok(())
    }

    fn query_result(
        &mut self,
        handle: QueryHandle,
        wait: bool,
    ) -> Result<Option<QueryResult>, PipeError> {
        let query = self
            .queries
            .get_mut(&handle)
            .ok_or(PipeError::UnknownQuery(handle))?;
        match query.state {
            SimQueryState::Idle | SimQueryState::Active => Ok(None),
            SimQueryState::Ended { flushed } => {
                if flushed || wait {
                    // A blocking wait forces completion, like a fence wait
                    // would on a real backend.
                    query.state = SimQueryState::Ended { flushed: true };
                    Ok(Some(Self::decode(query.kind, query.value)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn flush(&mut self) {
        for query in self.queries.values_mut() {
            if let SimQueryState::Ended { flushed } = &mut query.state {
                *flushed = true;
            }
        }
        self.log.push(TraceCall::Flush);
    }
}
