//! Context-side shadow state and command execution.
//!
//! The executor owns the backend pipe and a mirror of every piece of state
//! the pipe has been told about. The mirror exists for redundant-set
//! elision: a command whose value matches what the pipe already holds is
//! dropped here instead of reaching the backend. Fixed-function commands
//! update only the mirror; consuming them (shader generation) is a
//! separate concern behind the pipe.

use novem_pipe::{
    IndexBinding, Pipe, PipeError, PipeQueryType, QueryHandle, QueryResult, Rect, ResourceDesc,
    ResourceHandle, ShaderKey, ShaderStage, VertexElement, VertexStreamBinding, Viewport,
};
use tracing::warn;

use super::cmd::{ContextCmd, StreamBinding};
use crate::abi::PrimitiveType;
use crate::limits::{
    MAX_CLIP_PLANES, MAX_SAMPLERS, MAX_STREAMS, RS_COUNT, SAMPLER_STATE_COUNT,
};
use crate::state::ff::FixedFunctionState;

fn topology(primitive: PrimitiveType) -> novem_pipe::PrimitiveTopology {
    use novem_pipe::PrimitiveTopology as T;
    match primitive {
        PrimitiveType::PointList => T::PointList,
        PrimitiveType::LineList => T::LineList,
        PrimitiveType::LineStrip => T::LineStrip,
        PrimitiveType::TriangleList => T::TriangleList,
        PrimitiveType::TriangleStrip => T::TriangleStrip,
        PrimitiveType::TriangleFan => T::TriangleFan,
    }
}

#[derive(Debug)]
struct ShadowState {
    rs: Vec<u32>,
    samplers: [[u32; SAMPLER_STATE_COUNT]; MAX_SAMPLERS],
    textures: [Option<ResourceHandle>; MAX_SAMPLERS],
    streams: [Option<StreamBinding>; MAX_STREAMS],
    stream_freq: [u32; MAX_STREAMS],
    indices: Option<IndexBinding>,
    vs: Option<ShaderKey>,
    ps: Option<ShaderKey>,
    vdecl: Option<Vec<VertexElement>>,
    viewport: Viewport,
    scissor: Rect,
    clip_planes: [[f32; 4]; MAX_CLIP_PLANES],
    ff: FixedFunctionState,
}

impl Default for ShadowState {
    fn default() -> Self {
        Self {
            rs: vec![0; RS_COUNT],
            samplers: [[0; SAMPLER_STATE_COUNT]; MAX_SAMPLERS],
            textures: [None; MAX_SAMPLERS],
            streams: [None; MAX_STREAMS],
            stream_freq: [1; MAX_STREAMS],
            indices: None,
            vs: None,
            ps: None,
            vdecl: None,
            viewport: Viewport::default(),
            scissor: Rect::default(),
            clip_planes: [[0.0; 4]; MAX_CLIP_PLANES],
            ff: FixedFunctionState::default(),
        }
    }
}

/// Executes commands against the pipe, in submission order.
pub struct Executor {
    pipe: Box<dyn Pipe>,
    shadow: ShadowState,
}

impl Executor {
    pub fn new(pipe: Box<dyn Pipe>) -> Self {
        Self {
            pipe,
            shadow: ShadowState::default(),
        }
    }

    pub fn pipe_mut(&mut self) -> &mut dyn Pipe {
        self.pipe.as_mut()
    }

    pub fn create_resource(&mut self, desc: &ResourceDesc) -> Result<ResourceHandle, PipeError> {
        self.pipe.create_resource(desc)
    }

    pub fn create_query(&mut self, kind: PipeQueryType) -> Result<QueryHandle, PipeError> {
        self.pipe.query_create(kind)
    }

    pub fn query_result(
        &mut self,
        handle: QueryHandle,
        wait: bool,
        flush: bool,
    ) -> Result<Option<QueryResult>, PipeError> {
        if flush {
            self.pipe.flush();
        }
        self.pipe.query_result(handle, wait)
    }

    pub fn flush(&mut self) {
        self.pipe.flush();
    }

    pub fn execute(&mut self, cmd: ContextCmd) {
        match cmd {
            ContextCmd::SetRenderState { state_id, value } => {
                let slot = &mut self.shadow.rs[state_id as usize];
                if *slot != value {
                    *slot = value;
                    self.pipe.set_render_state(state_id, value);
                }
            }
            ContextCmd::SetSamplerState {
                sampler,
                state_id,
                value,
            } => {
                let slot = &mut self.shadow.samplers[sampler as usize][state_id as usize];
                if *slot != value {
                    *slot = value;
                    self.pipe.set_sampler_state(sampler, state_id, value);
                }
            }
            ContextCmd::SetTexture { sampler, texture } => {
                let slot = &mut self.shadow.textures[sampler as usize];
                if *slot != texture {
                    *slot = texture;
                    self.pipe.bind_texture(sampler, texture);
                }
            }
            ContextCmd::SetStreamSource { stream, binding } => {
                let slot = &mut self.shadow.streams[stream as usize];
                if *slot != binding {
                    *slot = binding;
                    self.pipe.bind_vertex_stream(
                        stream,
                        binding.map(|b| VertexStreamBinding {
                            buffer: b.buffer,
                            offset: u64::from(b.offset),
                            stride: b.stride,
                        }),
                    );
                }
            }
            ContextCmd::SetStreamFreq { stream, setting } => {
                self.shadow.stream_freq[stream as usize] = setting;
            }
            ContextCmd::SetIndices { binding } => {
                if self.shadow.indices != binding {
                    self.shadow.indices = binding;
                    self.pipe.bind_index_buffer(binding);
                }
            }
            ContextCmd::SetVertexShader { shader } => {
                if self.shadow.vs != shader {
                    self.shadow.vs = shader;
                    self.pipe.bind_shader(ShaderStage::Vertex, shader);
                }
            }
            ContextCmd::SetPixelShader { shader } => {
                if self.shadow.ps != shader {
                    self.shadow.ps = shader;
                    self.pipe.bind_shader(ShaderStage::Pixel, shader);
                }
            }
            ContextCmd::SetVertexDeclaration { elements } => {
                if self.shadow.vdecl != elements {
                    self.pipe.set_vertex_declaration(elements.as_deref());
                    self.shadow.vdecl = elements;
                }
            }
            ContextCmd::SetConstantsF {
                stage,
                start_register,
                data,
            } => {
                self.pipe.set_constants_f(stage, start_register, &data);
            }
            ContextCmd::SetConstantsI {
                stage,
                start_register,
                data,
            } => {
                self.pipe.set_constants_i(stage, start_register, &data);
            }
            ContextCmd::SetConstantsB {
                stage,
                start_register,
                data,
            } => {
                self.pipe.set_constants_b(stage, start_register, &data);
            }
            ContextCmd::SetViewport(viewport) => {
                if self.shadow.viewport != viewport {
                    self.shadow.viewport = viewport;
                    self.pipe.set_viewport(&viewport);
                }
            }
            ContextCmd::SetScissor(rect) => {
                if self.shadow.scissor != rect {
                    self.shadow.scissor = rect;
                    self.pipe.set_scissor(&rect);
                }
            }
            ContextCmd::SetClipPlane { index, plane } => {
                self.shadow.clip_planes[index as usize] = plane;
                self.pipe.set_clip_plane(index, &plane);
            }
            ContextCmd::SetMaterial(material) => {
                self.shadow.ff.material = material;
            }
            ContextCmd::SetLight { index, light } => {
                // Already validated at the device layer; a failure here
                // would mean the command was built from unvalidated input.
                if self.shadow.ff.set_light(index, &light).is_err() {
                    warn!(index, "dropping out-of-range light update");
                }
            }
            ContextCmd::LightEnable { index, enable } => {
                if self.shadow.ff.light_enable(index, enable).is_err() {
                    warn!(index, "dropping enable for undefined light");
                }
            }
            ContextCmd::SetActiveLights { indices } => {
                self.shadow.ff.active_lights = indices;
            }
            ContextCmd::SetTransform { state, matrix } => {
                if let Some(slot) = self.shadow.ff.transform_mut(state) {
                    *slot = matrix;
                }
            }
            ContextCmd::SetTextureStageState {
                stage,
                state_id,
                value,
            } => {
                self.shadow.ff.tex_stage[stage as usize][state_id as usize] = value;
            }
            ContextCmd::Clear {
                flags,
                color,
                depth,
                stencil,
            } => {
                self.pipe.clear(flags, color, depth, stencil);
            }
            ContextCmd::DrawPrimitive {
                primitive,
                start_vertex,
                primitive_count,
            } => {
                self.pipe.draw(
                    topology(primitive),
                    start_vertex,
                    primitive.vertex_count(primitive_count),
                );
            }
            ContextCmd::DrawIndexedPrimitive {
                primitive,
                base_vertex,
                start_index,
                primitive_count,
            } => {
                self.pipe.draw_indexed(
                    topology(primitive),
                    base_vertex,
                    start_index,
                    primitive.vertex_count(primitive_count),
                );
            }
            ContextCmd::QueryBegin(handle) => {
                if let Err(err) = self.pipe.query_begin(handle) {
                    warn!(%err, "query begin failed on backend");
                }
            }
            ContextCmd::QueryEnd(handle) => {
                if let Err(err) = self.pipe.query_end(handle) {
                    warn!(%err, "query end failed on backend");
                }
            }
            ContextCmd::DestroyResource(handle) => {
                // Drop any shadow bindings first so a recycled handle can't
                // be elided against the dead one.
                for (sampler, slot) in self.shadow.textures.iter_mut().enumerate() {
                    if *slot == Some(handle) {
                        *slot = None;
                        self.pipe.bind_texture(sampler as u32, None);
                    }
                }
                for (stream, slot) in self.shadow.streams.iter_mut().enumerate() {
                    if slot.map(|b| b.buffer) == Some(handle) {
                        *slot = None;
                        self.pipe.bind_vertex_stream(stream as u32, None);
                    }
                }
                if self.shadow.indices.map(|b| b.buffer) == Some(handle) {
                    self.shadow.indices = None;
                    self.pipe.bind_index_buffer(None);
                }
                self.pipe.destroy_resource(handle);
            }
            ContextCmd::DestroyQuery(handle) => {
                self.pipe.query_destroy(handle);
            }
            ContextCmd::ApplyStateBlock(cmds) => {
                for cmd in cmds {
                    self.execute(cmd);
                }
            }
        }
    }
}
