//! The single funnel between device state and the backend pipe.
//!
//! Every state-affecting operation becomes a [`ContextCmd`] submitted here.
//! In immediate mode commands execute inline on the calling thread; in
//! threaded (CSMT) mode they are queued to a worker that drains them in
//! FIFO order. Either way, nothing in the core touches the pipe except
//! through this module, and every payload is owned: a queued command must
//! stay valid past the caller's stack frame and past the originating
//! object's last reference.

mod cmd;
mod csmt;
mod shadow;

pub use cmd::{ContextCmd, StreamBinding};
pub use shadow::Executor;

use std::sync::mpsc;
use std::sync::Mutex;

use novem_pipe::{
    ClearFlags, IndexBinding, Pipe, PipeCaps, PipeError, PipeQueryType, QueryHandle, QueryResult,
    Rect, ResourceDesc, ResourceHandle, ShaderKey, ShaderStage, VertexElement, Viewport,
};

use crate::abi::{ts, Light, Material, Matrix, PrimitiveType};
use crate::limits::{MAX_APPLIED_WORLD_MATRIX, MAX_SAMPLERS, RS_WORDS, TRANSFORM_WORDS};
use crate::range::RangePool;
use crate::state::{DeviceState, StateChanges, StateGroup};

use csmt::{CsmtWorker, WorkerMsg};

enum Sink {
    Immediate(Mutex<Executor>),
    Threaded(CsmtWorker),
}

/// Shared, cloneable handle to the command sink. Device objects keep one so
/// destruction can return backend resources through the same ordered path
/// as everything else.
pub struct Context {
    caps: PipeCaps,
    sink: Sink,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("caps", &self.caps)
            .field(
                "mode",
                &match self.sink {
                    Sink::Immediate(_) => "immediate",
                    Sink::Threaded(_) => "csmt",
                },
            )
            .finish()
    }
}

impl Context {
    /// Commands execute inline on the calling thread.
    pub fn immediate(pipe: Box<dyn Pipe>) -> Self {
        let caps = pipe.caps();
        Self {
            caps,
            sink: Sink::Immediate(Mutex::new(Executor::new(pipe))),
        }
    }

    /// Commands execute on a dedicated worker thread.
    pub fn threaded(pipe: Box<dyn Pipe>) -> Self {
        let caps = pipe.caps();
        Self {
            caps,
            sink: Sink::Threaded(CsmtWorker::spawn(Executor::new(pipe))),
        }
    }

    pub fn caps(&self) -> PipeCaps {
        self.caps
    }

    pub fn submit(&self, cmd: ContextCmd) {
        match &self.sink {
            Sink::Immediate(executor) => executor.lock().unwrap().execute(cmd),
            Sink::Threaded(worker) => worker.send(WorkerMsg::Cmd(cmd)),
        }
    }

    /// Synchronous resource creation: queues behind everything already
    /// submitted, then waits for the handle.
    pub fn create_resource(&self, desc: &ResourceDesc) -> Result<ResourceHandle, PipeError> {
        match &self.sink {
            Sink::Immediate(executor) => executor.lock().unwrap().create_resource(desc),
            Sink::Threaded(worker) => {
                let (reply, rx) = mpsc::channel();
                worker.send(WorkerMsg::CreateResource { desc: *desc, reply });
                rx.recv().unwrap_or(Err(PipeError::OutOfMemory {
                    kind: desc.kind,
                    size: desc.size,
                }))
            }
        }
    }

    pub fn destroy_resource(&self, handle: ResourceHandle) {
        self.submit(ContextCmd::DestroyResource(handle));
    }

    pub fn create_query(&self, kind: PipeQueryType) -> Result<QueryHandle, PipeError> {
        match &self.sink {
            Sink::Immediate(executor) => executor.lock().unwrap().create_query(kind),
            Sink::Threaded(worker) => {
                let (reply, rx) = mpsc::channel();
                worker.send(WorkerMsg::CreateQuery { kind, reply });
                rx.recv()
                    .unwrap_or(Err(PipeError::UnsupportedQueryType(kind)))
            }
        }
    }

    pub fn destroy_query(&self, handle: QueryHandle) {
        self.submit(ContextCmd::DestroyQuery(handle));
    }

    /// Polls (or blocks on) a query result. Ordered after all previously
    /// submitted commands, so an end that was still queued is executed
    /// before the poll runs.
    pub fn query_result(
        &self,
        handle: QueryHandle,
        wait: bool,
        flush: bool,
    ) -> Result<Option<QueryResult>, PipeError> {
        match &self.sink {
            Sink::Immediate(executor) => executor.lock().unwrap().query_result(handle, wait, flush),
            Sink::Threaded(worker) => {
                let (reply, rx) = mpsc::channel();
                worker.send(WorkerMsg::QueryResult {
                    handle,
                    wait,
                    flush,
                    reply,
                });
                rx.recv().unwrap_or(Ok(None))
            }
        }
    }

    /// Drains the queue and the backend. Returns once every previously
    /// submitted command has executed.
    pub fn flush(&self) {
        match &self.sink {
            Sink::Immediate(executor) => executor.lock().unwrap().flush(),
            Sink::Threaded(worker) => {
                let (reply, rx) = mpsc::channel();
                worker.send(WorkerMsg::Flush { reply });
                let _ = rx.recv();
            }
        }
    }

    /// Replays a state block's recorded delta through the funnel as one
    /// atomic command. `state` is the block's captured state, `mask` its
    /// recorded dirty set.
    pub fn apply_state_block(&self, state: &DeviceState, mask: &StateChanges, pool: &RangePool) {
        let cmds = build_apply_commands(state, mask, pool);
        if !cmds.is_empty() {
            self.submit(ContextCmd::ApplyStateBlock(cmds));
        }
    }
}

/// Walks a recorded dirty set and emits the equivalent command sequence.
/// This is the reconciliation between block-level applies and the context's
/// shadow state: the same per-field paths run, just batched.
fn build_apply_commands(
    state: &DeviceState,
    mask: &StateChanges,
    pool: &RangePool,
) -> Vec<ContextCmd> {
    let mut out = Vec::new();

    for word in 0..RS_WORDS {
        let mut bits = mask.rs[word];
        while bits != 0 {
            let bit = bits.trailing_zeros();
            bits &= bits - 1;
            let state_id = (word * 32) as u32 + bit;
            out.push(ContextCmd::SetRenderState {
                state_id,
                value: state.rs[state_id as usize],
            });
        }
    }

    let mut texture_bits = mask.texture;
    while texture_bits != 0 {
        let sampler = texture_bits.trailing_zeros();
        texture_bits &= texture_bits - 1;
        out.push(ContextCmd::SetTexture {
            sampler,
            texture: state.textures[sampler as usize]
                .as_ref()
                .map(|t| t.resource_handle()),
        });
    }

    if mask.group.contains(StateGroup::SAMPLER) {
        for sampler in 0..MAX_SAMPLERS {
            let mut bits = u32::from(mask.sampler[sampler]);
            while bits != 0 {
                let state_id = bits.trailing_zeros();
                bits &= bits - 1;
                out.push(ContextCmd::SetSamplerState {
                    sampler: sampler as u32,
                    state_id,
                    value: state.sampler_states[sampler][state_id as usize],
                });
            }
        }
    }

    let mut stream_bits = mask.vtxbuf | mask.stream_freq;
    while stream_bits != 0 {
        let stream = stream_bits.trailing_zeros();
        stream_bits &= stream_bits - 1;
        if mask.vtxbuf & (1 << stream) != 0 {
            out.push(ContextCmd::SetStreamSource {
                stream,
                binding: state.streams[stream as usize].as_ref().map(|vb| {
                    StreamBinding {
                        buffer: vb.resource_handle(),
                        offset: state.stream_offset[stream as usize],
                        stride: state.stream_stride[stream as usize],
                    }
                }),
            });
        }
        if mask.stream_freq & (1 << stream) != 0 {
            out.push(ContextCmd::SetStreamFreq {
                stream,
                setting: state.stream_freq[stream as usize],
            });
        }
    }

    if mask.group.contains(StateGroup::IDXBUF) {
        out.push(ContextCmd::SetIndices {
            binding: state.idxbuf.as_ref().map(|ib| ib.index_binding()),
        });
    }

    if mask.group.contains(StateGroup::VDECL) {
        if let Some(decl) = &state.vdecl {
            out.push(ContextCmd::SetVertexDeclaration {
                elements: Some(decl.elements().to_vec()),
            });
        }
    }

    if mask.group.contains(StateGroup::VS) {
        out.push(ContextCmd::SetVertexShader {
            shader: state.vs.as_ref().map(|s| s.key()),
        });
    }
    if mask.group.contains(StateGroup::PS) {
        out.push(ContextCmd::SetPixelShader {
            shader: state.ps.as_ref().map(|s| s.key()),
        });
    }

    if mask.group.contains(StateGroup::VS_CONST) {
        for (begin, end) in pool.iter(&mask.vs_const_f) {
            out.push(ContextCmd::SetConstantsF {
                stage: ShaderStage::Vertex,
                start_register: begin,
                data: state.vs_const_f[begin as usize * 4..end as usize * 4].to_vec(),
            });
        }
        for (begin, end) in pool.iter(&mask.vs_const_i) {
            out.push(ContextCmd::SetConstantsI {
                stage: ShaderStage::Vertex,
                start_register: begin,
                data: state.vs_const_i[begin as usize * 4..end as usize * 4].to_vec(),
            });
        }
        for (begin, end) in pool.iter(&mask.vs_const_b) {
            out.push(ContextCmd::SetConstantsB {
                stage: ShaderStage::Vertex,
                start_register: begin,
                data: state.vs_const_b[begin as usize..end as usize].to_vec(),
            });
        }
    }

    if mask.group.contains(StateGroup::PS_CONST) {
        for (begin, end) in pool.iter(&mask.ps_const_f) {
            out.push(ContextCmd::SetConstantsF {
                stage: ShaderStage::Pixel,
                start_register: begin,
                data: state.ps_const_f[begin as usize * 4..end as usize * 4].to_vec(),
            });
        }
        let mut bits = u32::from(mask.ps_const_i);
        while bits != 0 {
            let reg = bits.trailing_zeros();
            bits &= bits - 1;
            out.push(ContextCmd::SetConstantsI {
                stage: ShaderStage::Pixel,
                start_register: reg,
                data: state.ps_const_i[reg as usize * 4..reg as usize * 4 + 4].to_vec(),
            });
        }
        let mut bits = u32::from(mask.ps_const_b);
        while bits != 0 {
            let reg = bits.trailing_zeros();
            bits &= bits - 1;
            out.push(ContextCmd::SetConstantsB {
                stage: ShaderStage::Pixel,
                start_register: reg,
                data: vec![state.ps_const_b[reg as usize]],
            });
        }
    }

    if mask.group.contains(StateGroup::VIEWPORT) {
        out.push(ContextCmd::SetViewport(state.viewport));
    }
    if mask.group.contains(StateGroup::SCISSOR) {
        out.push(ContextCmd::SetScissor(state.scissor));
    }

    let mut ucp_bits = mask.ucp;
    while ucp_bits != 0 {
        let index = ucp_bits.trailing_zeros();
        ucp_bits &= ucp_bits - 1;
        out.push(ContextCmd::SetClipPlane {
            index,
            plane: state.clip_planes[index as usize],
        });
    }

    if !mask.group.intersects(StateGroup::FF) {
        return out;
    }

    if mask.group.contains(StateGroup::FF_MATERIAL) {
        out.push(ContextCmd::SetMaterial(state.ff.material));
    }

    if mask.group.contains(StateGroup::FF_PS_CONSTS) {
        for (stage, words) in mask.ff.tex_stage.iter().enumerate() {
            for (word, &bits) in words.iter().enumerate() {
                let mut bits = bits;
                while bits != 0 {
                    let bit = bits.trailing_zeros();
                    bits &= bits - 1;
                    let state_id = (word * 32) as u32 + bit;
                    if (state_id as usize) < state.ff.tex_stage[stage].len() {
                        out.push(ContextCmd::SetTextureStageState {
                            stage: stage as u32,
                            state_id,
                            value: state.ff.tex_stage[stage][state_id as usize],
                        });
                    }
                }
            }
        }
    }

    if mask.group.contains(StateGroup::FF_LIGHTING) {
        for (index, light) in state.ff.lights.iter().enumerate() {
            if light.kind != crate::abi::light::INVALID {
                out.push(ContextCmd::SetLight {
                    index: index as u32,
                    light: *light,
                });
            }
        }
        out.push(ContextCmd::SetActiveLights {
            indices: state.ff.active_lights.clone(),
        });
    }

    if mask.group.contains(StateGroup::FF_VSTRANSF) {
        for word in 0..TRANSFORM_WORDS {
            let mut bits = mask.ff.transform[word];
            while bits != 0 {
                let bit = bits.trailing_zeros();
                bits &= bits - 1;
                let transform_state = (word * 32) as u32 + bit;
                // The vertex-blend path only consumes the first few world
                // matrices; don't replay the long tail.
                if transform_state > ts::world_matrix(MAX_APPLIED_WORLD_MATRIX) {
                    break;
                }
                out.push(ContextCmd::SetTransform {
                    state: transform_state,
                    matrix: state.ff.transform(transform_state),
                });
            }
        }
    }

    out
}

/// Funnel operations mirroring the per-field device mutations. Thin by
/// design: the value of this surface is that it is the *only* way state
/// reaches the pipe, not that it transforms anything.
impl Context {
    pub fn set_render_state(&self, state_id: u32, value: u32) {
        self.submit(ContextCmd::SetRenderState { state_id, value });
    }

    pub fn set_sampler_state(&self, sampler: u32, state_id: u32, value: u32) {
        self.submit(ContextCmd::SetSamplerState {
            sampler,
            state_id,
            value,
        });
    }

    pub fn set_texture(&self, sampler: u32, texture: Option<ResourceHandle>) {
        self.submit(ContextCmd::SetTexture { sampler, texture });
    }

    pub fn set_stream_source(&self, stream: u32, binding: Option<StreamBinding>) {
        self.submit(ContextCmd::SetStreamSource { stream, binding });
    }

    pub fn set_stream_freq(&self, stream: u32, setting: u32) {
        self.submit(ContextCmd::SetStreamFreq { stream, setting });
    }

    pub fn set_indices(&self, binding: Option<IndexBinding>) {
        self.submit(ContextCmd::SetIndices { binding });
    }

    pub fn set_vertex_shader(&self, shader: Option<ShaderKey>) {
        self.submit(ContextCmd::SetVertexShader { shader });
    }

    pub fn set_pixel_shader(&self, shader: Option<ShaderKey>) {
        self.submit(ContextCmd::SetPixelShader { shader });
    }

    pub fn set_vertex_declaration(&self, elements: Option<Vec<VertexElement>>) {
        self.submit(ContextCmd::SetVertexDeclaration { elements });
    }

    pub fn set_constants_f(&self, stage: ShaderStage, start_register: u32, data: Vec<f32>) {
        self.submit(ContextCmd::SetConstantsF {
            stage,
            start_register,
            data,
        });
    }

    pub fn set_constants_i(&self, stage: ShaderStage, start_register: u32, data: Vec<i32>) {
        self.submit(ContextCmd::SetConstantsI {
            stage,
            start_register,
            data,
        });
    }

    pub fn set_constants_b(&self, stage: ShaderStage, start_register: u32, data: Vec<u32>) {
        self.submit(ContextCmd::SetConstantsB {
            stage,
            start_register,
            data,
        });
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.submit(ContextCmd::SetViewport(viewport));
    }

    pub fn set_scissor(&self, rect: Rect) {
        self.submit(ContextCmd::SetScissor(rect));
    }

    pub fn set_clip_plane(&self, index: u32, plane: [f32; 4]) {
        self.submit(ContextCmd::SetClipPlane { index, plane });
    }

    pub fn set_material(&self, material: Material) {
        self.submit(ContextCmd::SetMaterial(material));
    }

    pub fn set_light(&self, index: u32, light: Light) {
        self.submit(ContextCmd::SetLight { index, light });
    }

    pub fn light_enable(&self, index: u32, enable: bool) {
        self.submit(ContextCmd::LightEnable { index, enable });
    }

    pub fn set_transform(&self, state: u32, matrix: Matrix) {
        self.submit(ContextCmd::SetTransform { state, matrix });
    }

    pub fn set_texture_stage_state(&self, stage: u32, state_id: u32, value: u32) {
        self.submit(ContextCmd::SetTextureStageState {
            stage,
            state_id,
            value,
        });
    }

    pub fn clear(&self, flags: ClearFlags, color: u32, depth: f32, stencil: u32) {
        self.submit(ContextCmd::Clear {
            flags,
            color,
            depth,
            stencil,
        });
    }

    pub fn draw_primitive(&self, primitive: PrimitiveType, start_vertex: u32, primitive_count: u32) {
        self.submit(ContextCmd::DrawPrimitive {
            primitive,
            start_vertex,
            primitive_count,
        });
    }

    pub fn draw_indexed_primitive(
        &self,
        primitive: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    ) {
        self.submit(ContextCmd::DrawIndexedPrimitive {
            primitive,
            base_vertex,
            start_index,
            primitive_count,
        });
    }

    pub fn query_begin(&self, handle: QueryHandle) {
        self.submit(ContextCmd::QueryBegin(handle));
    }

    pub fn query_end(&self, handle: QueryHandle) {
        self.submit(ContextCmd::QueryEnd(handle));
    }
}
