//! Device-level orchestration.
//!
//! The device owns the live state record, the (at most one) recording
//! state block, the shared range pool, and the context funnel. Every public
//! operation follows the same shape:
//!
//! 1. validate arguments (status code, not panic),
//! 2. if a state block is recording, write value + dirty bit into the
//!    block's state and stop (recorded mutations never reach the context),
//! 3. otherwise skip redundant sets, update live state, and forward the
//!    fully resolved values through the context funnel.
//!
//! Reads (`get_*`) always answer from the live state, even mid-recording.

use std::sync::{Arc, Mutex};

use novem_pipe::{
    ClearFlags, IndexFormat, Pipe, QueryCaps, Rect, ResourceDesc, ResourceHandle, ResourceKind,
    ShaderKey, ShaderStage, VertexElement, Viewport,
};
use tracing::{debug, warn};

use crate::abi::{
    Light, Material, Matrix, PrimitiveType, QueryType, StateBlockKind, DMAP_SAMPLER,
    STREAM_SOURCE_INDEXED_DATA, STREAM_SOURCE_INSTANCE_DATA, VERTEX_TEXTURE_SAMPLER3,
};
use crate::context::{Context, StreamBinding};
use crate::error::{user_assert, D3dError, D3dResult};
use crate::limits::{
    MAX_CLIP_PLANES, MAX_CONST_B, MAX_CONST_I, MAX_PS_CONST_F, MAX_SAMPLERS_PS, MAX_STREAMS,
    MAX_TEXTURE_STAGES, RS_COUNT, SAMPLER_STATE_COUNT, TEXTURE_STAGE_STATE_COUNT,
};
use crate::query::Query9;
use crate::range::RangePool;
use crate::resource::{
    IndexBuffer9, Surface9, SurfaceDesc, SwapChain9, Texture9, TextureDesc, VertexBuffer9,
};
use crate::shader::{PixelShader9, VertexDeclaration9, VertexShader9};
use crate::state::copy::{copy_state, copy_state_all};
use crate::state::{DeviceState, StateGroup};
use crate::stateblock::{seed_predefined_mask, StateBlock9};
use crate::unknown::{bind_slot, UnknownExt};

/// Feature envelope the device advertises, derived from the pipe.
#[derive(Clone, Copy, Debug)]
pub struct DeviceCaps {
    pub max_streams: u32,
    pub max_stream_stride: u32,
    pub max_vs_const_f: u32,
    pub queries: QueryCaps,
}

/// Creation-time knobs (the relevant slice of the D3D9 behavior flags and
/// presentation parameters).
#[derive(Clone, Copy, Debug)]
pub struct DeviceParams {
    /// Execute backend commands on a dedicated worker thread.
    pub csmt: bool,
    /// Size of the implicit swap chain's backbuffer.
    pub backbuffer_width: u32,
    pub backbuffer_height: u32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            csmt: false,
            backbuffer_width: 640,
            backbuffer_height: 480,
        }
    }
}

/// Maps an application-facing sampler stage onto the dense sampler array:
/// pixel samplers first, then the displacement-map sampler and the four
/// vertex texture samplers.
fn sampler_slot(stage: u32) -> D3dResult<usize> {
    if stage < MAX_SAMPLERS_PS as u32 {
        Ok(stage as usize)
    } else if (DMAP_SAMPLER..=VERTEX_TEXTURE_SAMPLER3).contains(&stage) {
        Ok(MAX_SAMPLERS_PS + (stage - DMAP_SAMPLER) as usize)
    } else {
        Err(D3dError::InvalidCall)
    }
}

pub struct Device9 {
    ctx: Arc<Context>,
    caps: DeviceCaps,
    pool: Arc<Mutex<RangePool>>,
    state: DeviceState,
    record: Option<Arc<StateBlock9>>,
    swapchains: Vec<Arc<SwapChain9>>,
    next_shader_key: u32,
}

impl Device9 {
    pub fn new(pipe: Box<dyn Pipe>, params: DeviceParams) -> D3dResult<Self> {
        let pipe_caps = pipe.caps();
        let ctx = Arc::new(if params.csmt {
            Context::threaded(pipe)
        } else {
            Context::immediate(pipe)
        });
        let caps = DeviceCaps {
            max_streams: pipe_caps.max_streams.min(MAX_STREAMS as u32),
            max_stream_stride: crate::limits::MAX_STREAM_STRIDE,
            max_vs_const_f: pipe_caps.max_vs_const_f,
            queries: pipe_caps.queries,
        };

        let mut state = DeviceState::new(caps.max_vs_const_f as usize);
        state.set_defaults();

        let mut device = Self {
            ctx,
            caps,
            pool: Arc::new(Mutex::new(RangePool::new())),
            state,
            record: None,
            swapchains: Vec::new(),
            next_shader_key: 1,
        };

        let swapchain = device.create_swap_chain_inner(
            params.backbuffer_width,
            params.backbuffer_height,
        )?;
        device.swapchains.push(swapchain);
        Ok(device)
    }

    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    /// Blocks until every queued command has executed on the backend.
    pub fn flush(&self) {
        self.ctx.flush();
    }

    fn is_recording(&self) -> bool {
        self.record.is_some()
    }

    /// Backend resource creation with the free-and-retry policy: a first
    /// failure (fragmentation, budget) drains outstanding work, which
    /// completes any deferred destroys, then tries once more.
    fn create_pipe_resource(&self, desc: &ResourceDesc) -> D3dResult<ResourceHandle> {
        match self.ctx.create_resource(desc) {
            Ok(handle) => Ok(handle),
            Err(first) => {
                warn!(%first, "resource creation failed, draining and retrying");
                self.ctx.flush();
                self.ctx
                    .create_resource(desc)
                    .map_err(|_| D3dError::OutOfMemory)
            }
        }
    }

    fn next_shader_key(&mut self) -> ShaderKey {
        let key = ShaderKey(self.next_shader_key);
        self.next_shader_key += 1;
        key
    }

    fn create_swap_chain_inner(&mut self, width: u32, height: u32) -> D3dResult<Arc<SwapChain9>> {
        user_assert!(width != 0 && height != 0, D3dError::InvalidCall);
        let handle = self.create_pipe_resource(&ResourceDesc::texture(
            ResourceKind::RenderTarget,
            width,
            height,
            1,
        ))?;
        Ok(SwapChain9::new(
            self.ctx.clone(),
            vec![(
                handle,
                SurfaceDesc {
                    width,
                    height,
                    level: 0,
                },
            )],
        ))
    }
}

/// Resource and object creation.
impl Device9 {
    pub fn create_vertex_buffer(&mut self, size: u64) -> D3dResult<Arc<VertexBuffer9>> {
        user_assert!(size != 0, D3dError::InvalidCall);
        let handle =
            self.create_pipe_resource(&ResourceDesc::buffer(ResourceKind::VertexBuffer, size))?;
        Ok(VertexBuffer9::new(self.ctx.clone(), handle, size))
    }

    pub fn create_index_buffer(
        &mut self,
        size: u64,
        format: IndexFormat,
    ) -> D3dResult<Arc<IndexBuffer9>> {
        user_assert!(size != 0, D3dError::InvalidCall);
        let handle =
            self.create_pipe_resource(&ResourceDesc::buffer(ResourceKind::IndexBuffer, size))?;
        Ok(IndexBuffer9::new(self.ctx.clone(), handle, size, format))
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> D3dResult<Arc<Texture9>> {
        user_assert!(
            desc.width != 0 && desc.height != 0 && desc.levels != 0,
            D3dError::InvalidCall
        );
        let handle = self.create_pipe_resource(&ResourceDesc::texture(
            ResourceKind::Texture,
            desc.width,
            desc.height,
            desc.levels,
        ))?;
        Ok(Texture9::new(self.ctx.clone(), handle, desc))
    }

    pub fn create_render_target(&mut self, width: u32, height: u32) -> D3dResult<Arc<Surface9>> {
        user_assert!(width != 0 && height != 0, D3dError::InvalidCall);
        let handle = self.create_pipe_resource(&ResourceDesc::texture(
            ResourceKind::RenderTarget,
            width,
            height,
            1,
        ))?;
        Ok(Surface9::standalone(
            self.ctx.clone(),
            handle,
            SurfaceDesc {
                width,
                height,
                level: 0,
            },
        ))
    }

    pub fn create_vertex_shader(&mut self, byte_code: &[u32]) -> D3dResult<Arc<VertexShader9>> {
        user_assert!(!byte_code.is_empty(), D3dError::InvalidCall);
        let key = self.next_shader_key();
        Ok(VertexShader9::new(key, byte_code.to_vec()))
    }

    pub fn create_pixel_shader(&mut self, byte_code: &[u32]) -> D3dResult<Arc<PixelShader9>> {
        user_assert!(!byte_code.is_empty(), D3dError::InvalidCall);
        let key = self.next_shader_key();
        Ok(PixelShader9::new(key, byte_code.to_vec()))
    }

    pub fn create_vertex_declaration(
        &mut self,
        elements: &[VertexElement],
    ) -> D3dResult<Arc<VertexDeclaration9>> {
        user_assert!(!elements.is_empty(), D3dError::InvalidCall);
        Ok(VertexDeclaration9::new(elements.to_vec()))
    }

    pub fn query_supported(&self, kind: QueryType) -> bool {
        Query9::supported(&self.ctx, kind)
    }

    pub fn create_query(&mut self, kind: QueryType) -> D3dResult<Arc<Query9>> {
        Query9::new(self.ctx.clone(), kind)
    }

    pub fn create_additional_swap_chain(
        &mut self,
        width: u32,
        height: u32,
    ) -> D3dResult<Arc<SwapChain9>> {
        let swapchain = self.create_swap_chain_inner(width, height)?;
        swapchain.add_ref();
        self.swapchains.push(swapchain.clone());
        Ok(swapchain)
    }

    pub fn swap_chain_count(&self) -> u32 {
        self.swapchains.len() as u32
    }

    pub fn swap_chain(&self, index: u32) -> D3dResult<Arc<SwapChain9>> {
        let swapchain = self
            .swapchains
            .get(index as usize)
            .ok_or(D3dError::InvalidCall)?;
        swapchain.add_ref();
        Ok(swapchain.clone())
    }

    /// Drains outstanding work; the flip itself is a windowing concern.
    pub fn present(&self) -> D3dResult<()> {
        for swapchain in &self.swapchains {
            swapchain.present();
        }
        Ok(())
    }

    /// Completes deferred destroys so their memory is actually reusable.
    pub fn evict_managed_resources(&self) -> D3dResult<()> {
        self.ctx.flush();
        Ok(())
    }
}

/// Render, sampler, and texture-stage state.
impl Device9 {
    pub fn set_render_state(&mut self, state_id: u32, value: u32) -> D3dResult<()> {
        // Out-of-range ids are accepted and dropped, as the original
        // runtime does.
        if state_id as usize >= RS_COUNT {
            return Ok(());
        }

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.rs[state_id as usize] = value;
            state.changed.mark_rs(state_id);
            return Ok(());
        }

        if self.state.rs[state_id as usize] == value {
            return Ok(());
        }
        self.state.rs[state_id as usize] = value;
        self.ctx.set_render_state(state_id, value);
        Ok(())
    }

    pub fn get_render_state(&self, state_id: u32) -> D3dResult<u32> {
        if state_id as usize >= RS_COUNT {
            return Ok(0);
        }
        Ok(self.state.rs[state_id as usize])
    }

    pub fn set_sampler_state(&mut self, stage: u32, state_id: u32, value: u32) -> D3dResult<()> {
        let slot = sampler_slot(stage)?;
        user_assert!(
            (state_id as usize) < SAMPLER_STATE_COUNT,
            D3dError::InvalidCall
        );

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.sampler_states[slot][state_id as usize] = value;
            state.changed.group |= StateGroup::SAMPLER;
            state.changed.sampler[slot] |= 1 << state_id;
            return Ok(());
        }

        if self.state.sampler_states[slot][state_id as usize] == value {
            return Ok(());
        }
        self.state.sampler_states[slot][state_id as usize] = value;
        self.ctx.set_sampler_state(slot as u32, state_id, value);
        Ok(())
    }

    pub fn get_sampler_state(&self, stage: u32, state_id: u32) -> D3dResult<u32> {
        let slot = sampler_slot(stage)?;
        user_assert!(
            (state_id as usize) < SAMPLER_STATE_COUNT,
            D3dError::InvalidCall
        );
        Ok(self.state.sampler_states[slot][state_id as usize])
    }

    pub fn set_texture(&mut self, stage: u32, texture: Option<&Arc<Texture9>>) -> D3dResult<()> {
        let slot = sampler_slot(stage)?;

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.changed.texture |= 1 << slot;
            bind_slot(&mut state.textures[slot], texture);
            return Ok(());
        }

        let same = match (&self.state.textures[slot], texture) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }

        bind_slot(&mut self.state.textures[slot], texture);
        self.ctx
            .set_texture(slot as u32, texture.map(|t| t.resource_handle()));
        Ok(())
    }

    pub fn get_texture(&self, stage: u32) -> D3dResult<Option<Arc<Texture9>>> {
        let slot = sampler_slot(stage)?;
        Ok(self.state.textures[slot].as_ref().map(|t| {
            t.add_ref();
            t.clone()
        }))
    }

    pub fn set_texture_stage_state(
        &mut self,
        stage: u32,
        state_id: u32,
        value: u32,
    ) -> D3dResult<()> {
        user_assert!((stage as usize) < MAX_TEXTURE_STAGES, D3dError::InvalidCall);
        user_assert!(
            (state_id as usize) < TEXTURE_STAGE_STATE_COUNT,
            D3dError::InvalidCall
        );

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ff.tex_stage[stage as usize][state_id as usize] = value;
            state.changed.group |= StateGroup::FF_PS_CONSTS;
            state.changed.ff.mark_tex_stage(stage as usize, state_id);
            return Ok(());
        }

        self.state.ff.tex_stage[stage as usize][state_id as usize] = value;
        self.ctx.set_texture_stage_state(stage, state_id, value);
        Ok(())
    }

    pub fn get_texture_stage_state(&self, stage: u32, state_id: u32) -> D3dResult<u32> {
        user_assert!((stage as usize) < MAX_TEXTURE_STAGES, D3dError::InvalidCall);
        user_assert!(
            (state_id as usize) < TEXTURE_STAGE_STATE_COUNT,
            D3dError::InvalidCall
        );
        Ok(self.state.ff.tex_stage[stage as usize][state_id as usize])
    }
}

/// Geometry bindings.
impl Device9 {
    pub fn set_stream_source(
        &mut self,
        stream: u32,
        buffer: Option<&Arc<VertexBuffer9>>,
        offset: u32,
        stride: u32,
    ) -> D3dResult<()> {
        user_assert!(stream < self.caps.max_streams, D3dError::InvalidCall);
        user_assert!(stride <= self.caps.max_stream_stride, D3dError::InvalidCall);
        let i = stream as usize;

        if let Some(record) = &self.record {
            let mut state = record.state();
            bind_slot(&mut state.streams[i], buffer);
            state.changed.vtxbuf |= 1 << stream;
            state.stream_stride[i] = stride;
            state.stream_offset[i] = offset;
            return Ok(());
        }

        let same = match (&self.state.streams[i], buffer) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if same && self.state.stream_stride[i] == stride && self.state.stream_offset[i] == offset {
            return Ok(());
        }

        self.state.stream_stride[i] = stride;
        self.state.stream_offset[i] = offset;
        bind_slot(&mut self.state.streams[i], buffer);
        self.ctx.set_stream_source(
            stream,
            buffer.map(|vb| StreamBinding {
                buffer: vb.resource_handle(),
                offset,
                stride,
            }),
        );
        Ok(())
    }

    pub fn get_stream_source(&self, stream: u32) -> D3dResult<(Option<Arc<VertexBuffer9>>, u32, u32)> {
        user_assert!(stream < self.caps.max_streams, D3dError::InvalidCall);
        let i = stream as usize;
        let buffer = self.state.streams[i].as_ref().map(|vb| {
            vb.add_ref();
            vb.clone()
        });
        Ok((buffer, self.state.stream_offset[i], self.state.stream_stride[i]))
    }

    pub fn set_stream_source_freq(&mut self, stream: u32, setting: u32) -> D3dResult<()> {
        user_assert!(stream < self.caps.max_streams, D3dError::InvalidCall);
        user_assert!(
            stream != 0 || setting & STREAM_SOURCE_INSTANCE_DATA == 0,
            D3dError::InvalidCall
        );
        user_assert!(
            setting & STREAM_SOURCE_INSTANCE_DATA == 0
                || setting & STREAM_SOURCE_INDEXED_DATA == 0,
            D3dError::InvalidCall
        );
        user_assert!(setting != 0, D3dError::InvalidCall);

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.stream_freq[stream as usize] = setting;
            state.changed.stream_freq |= 1 << stream;
            return Ok(());
        }

        if self.state.stream_freq[stream as usize] == setting {
            return Ok(());
        }
        self.state.stream_freq[stream as usize] = setting;
        self.ctx.set_stream_freq(stream, setting);
        Ok(())
    }

    pub fn get_stream_source_freq(&self, stream: u32) -> D3dResult<u32> {
        user_assert!(stream < self.caps.max_streams, D3dError::InvalidCall);
        Ok(self.state.stream_freq[stream as usize])
    }

    pub fn set_indices(&mut self, buffer: Option<&Arc<IndexBuffer9>>) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            bind_slot(&mut state.idxbuf, buffer);
            state.changed.group |= StateGroup::IDXBUF;
            return Ok(());
        }

        let same = match (&self.state.idxbuf, buffer) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        bind_slot(&mut self.state.idxbuf, buffer);
        self.ctx.set_indices(buffer.map(|ib| ib.index_binding()));
        Ok(())
    }

    pub fn get_indices(&self) -> Option<Arc<IndexBuffer9>> {
        self.state.idxbuf.as_ref().map(|ib| {
            ib.add_ref();
            ib.clone()
        })
    }

    pub fn set_vertex_declaration(
        &mut self,
        decl: Option<&Arc<VertexDeclaration9>>,
    ) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            bind_slot(&mut state.vdecl, decl);
            state.changed.group |= StateGroup::VDECL;
            return Ok(());
        }

        let same = match (&self.state.vdecl, decl) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        bind_slot(&mut self.state.vdecl, decl);
        self.ctx
            .set_vertex_declaration(decl.map(|d| d.elements().to_vec()));
        Ok(())
    }

    pub fn get_vertex_declaration(&self) -> Option<Arc<VertexDeclaration9>> {
        self.state.vdecl.as_ref().map(|d| {
            d.add_ref();
            d.clone()
        })
    }
}

/// Shaders and shader constants.
impl Device9 {
    pub fn set_vertex_shader(&mut self, shader: Option<&Arc<VertexShader9>>) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            bind_slot(&mut state.vs, shader);
            state.changed.group |= StateGroup::VS;
            return Ok(());
        }

        let same = match (&self.state.vs, shader) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        bind_slot(&mut self.state.vs, shader);
        self.ctx.set_vertex_shader(shader.map(|s| s.key()));
        Ok(())
    }

    pub fn get_vertex_shader(&self) -> Option<Arc<VertexShader9>> {
        self.state.vs.as_ref().map(|s| {
            s.add_ref();
            s.clone()
        })
    }

    pub fn set_pixel_shader(&mut self, shader: Option<&Arc<PixelShader9>>) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            bind_slot(&mut state.ps, shader);
            state.changed.group |= StateGroup::PS;
            return Ok(());
        }

        let same = match (&self.state.ps, shader) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }
        bind_slot(&mut self.state.ps, shader);
        self.ctx.set_pixel_shader(shader.map(|s| s.key()));
        Ok(())
    }

    pub fn get_pixel_shader(&self) -> Option<Arc<PixelShader9>> {
        self.state.ps.as_ref().map(|s| {
            s.add_ref();
            s.clone()
        })
    }

    pub fn set_vertex_shader_constant_f(
        &mut self,
        start_register: u32,
        data: &[f32],
    ) -> D3dResult<()> {
        user_assert!(data.len() % 4 == 0, D3dError::InvalidCall);
        let count = (data.len() / 4) as u32;
        user_assert!(start_register < self.caps.max_vs_const_f, D3dError::InvalidCall);
        user_assert!(
            start_register + count <= self.caps.max_vs_const_f,
            D3dError::InvalidCall
        );
        if count == 0 {
            return Ok(());
        }
        let lo = start_register as usize * 4;
        let hi = lo + data.len();

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.vs_const_f[lo..hi].copy_from_slice(data);
            let mut pool = self.pool.lock().unwrap();
            pool.insert(
                &mut state.changed.vs_const_f,
                start_register,
                start_register + count,
            );
            state.changed.group |= StateGroup::VS_CONST;
            return Ok(());
        }

        if self.state.vs_const_f[lo..hi] == *data {
            return Ok(());
        }
        self.state.vs_const_f[lo..hi].copy_from_slice(data);
        self.ctx
            .set_constants_f(ShaderStage::Vertex, start_register, data.to_vec());
        Ok(())
    }

    pub fn get_vertex_shader_constant_f(
        &self,
        start_register: u32,
        out: &mut [f32],
    ) -> D3dResult<()> {
        user_assert!(out.len() % 4 == 0, D3dError::InvalidCall);
        let count = (out.len() / 4) as u32;
        user_assert!(
            start_register + count <= self.caps.max_vs_const_f,
            D3dError::InvalidCall
        );
        let lo = start_register as usize * 4;
        out.copy_from_slice(&self.state.vs_const_f[lo..lo + out.len()]);
        Ok(())
    }

    pub fn set_vertex_shader_constant_i(
        &mut self,
        start_register: u32,
        data: &[i32],
    ) -> D3dResult<()> {
        user_assert!(data.len() % 4 == 0, D3dError::InvalidCall);
        let count = (data.len() / 4) as u32;
        user_assert!(
            start_register + count <= MAX_CONST_I as u32,
            D3dError::InvalidCall
        );
        if count == 0 {
            return Ok(());
        }
        let lo = start_register as usize * 4;
        let hi = lo + data.len();

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.vs_const_i[lo..hi].copy_from_slice(data);
            let mut pool = self.pool.lock().unwrap();
            pool.insert(
                &mut state.changed.vs_const_i,
                start_register,
                start_register + count,
            );
            state.changed.group |= StateGroup::VS_CONST;
            return Ok(());
        }

        if self.state.vs_const_i[lo..hi] == *data {
            return Ok(());
        }
        self.state.vs_const_i[lo..hi].copy_from_slice(data);
        self.ctx
            .set_constants_i(ShaderStage::Vertex, start_register, data.to_vec());
        Ok(())
    }

    pub fn set_vertex_shader_constant_b(
        &mut self,
        start_register: u32,
        data: &[u32],
    ) -> D3dResult<()> {
        let count = data.len() as u32;
        user_assert!(
            start_register + count <= MAX_CONST_B as u32,
            D3dError::InvalidCall
        );
        if count == 0 {
            return Ok(());
        }
        let lo = start_register as usize;

        // Bools are stored normalized so captures and comparisons treat
        // every nonzero input identically.
        let normalized: Vec<u32> = data.iter().map(|&b| if b != 0 { !0 } else { 0 }).collect();

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.vs_const_b[lo..lo + data.len()].copy_from_slice(&normalized);
            let mut pool = self.pool.lock().unwrap();
            pool.insert(
                &mut state.changed.vs_const_b,
                start_register,
                start_register + count,
            );
            state.changed.group |= StateGroup::VS_CONST;
            return Ok(());
        }

        if self.state.vs_const_b[lo..lo + data.len()] == normalized[..] {
            return Ok(());
        }
        self.state.vs_const_b[lo..lo + data.len()].copy_from_slice(&normalized);
        self.ctx
            .set_constants_b(ShaderStage::Vertex, start_register, normalized);
        Ok(())
    }

    pub fn get_vertex_shader_constant_i(&self, start_register: u32, out: &mut [i32]) -> D3dResult<()> {
        user_assert!(out.len() % 4 == 0, D3dError::InvalidCall);
        let count = (out.len() / 4) as u32;
        user_assert!(
            start_register + count <= MAX_CONST_I as u32,
            D3dError::InvalidCall
        );
        let lo = start_register as usize * 4;
        out.copy_from_slice(&self.state.vs_const_i[lo..lo + out.len()]);
        Ok(())
    }

    pub fn get_vertex_shader_constant_b(&self, start_register: u32, out: &mut [u32]) -> D3dResult<()> {
        user_assert!(
            start_register as usize + out.len() <= MAX_CONST_B,
            D3dError::InvalidCall
        );
        let lo = start_register as usize;
        for (value, &stored) in out.iter_mut().zip(&self.state.vs_const_b[lo..]) {
            *value = u32::from(stored != 0);
        }
        Ok(())
    }

    pub fn get_pixel_shader_constant_f(&self, start_register: u32, out: &mut [f32]) -> D3dResult<()> {
        user_assert!(out.len() % 4 == 0, D3dError::InvalidCall);
        let count = (out.len() / 4) as u32;
        user_assert!(
            start_register + count <= MAX_PS_CONST_F as u32,
            D3dError::InvalidCall
        );
        let lo = start_register as usize * 4;
        out.copy_from_slice(&self.state.ps_const_f[lo..lo + out.len()]);
        Ok(())
    }

    pub fn get_pixel_shader_constant_i(&self, start_register: u32, out: &mut [i32]) -> D3dResult<()> {
        user_assert!(out.len() % 4 == 0, D3dError::InvalidCall);
        let count = (out.len() / 4) as u32;
        user_assert!(
            start_register + count <= MAX_CONST_I as u32,
            D3dError::InvalidCall
        );
        let lo = start_register as usize * 4;
        out.copy_from_slice(&self.state.ps_const_i[lo..lo + out.len()]);
        Ok(())
    }

    pub fn get_pixel_shader_constant_b(&self, start_register: u32, out: &mut [u32]) -> D3dResult<()> {
        user_assert!(
            start_register as usize + out.len() <= MAX_CONST_B,
            D3dError::InvalidCall
        );
        let lo = start_register as usize;
        for (value, &stored) in out.iter_mut().zip(&self.state.ps_const_b[lo..]) {
            *value = u32::from(stored != 0);
        }
        Ok(())
    }

    pub fn set_pixel_shader_constant_f(
        &mut self,
        start_register: u32,
        data: &[f32],
    ) -> D3dResult<()> {
        user_assert!(data.len() % 4 == 0, D3dError::InvalidCall);
        let count = (data.len() / 4) as u32;
        user_assert!(
            start_register + count <= MAX_PS_CONST_F as u32,
            D3dError::InvalidCall
        );
        if count == 0 {
            return Ok(());
        }
        let lo = start_register as usize * 4;
        let hi = lo + data.len();

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ps_const_f[lo..hi].copy_from_slice(data);
            let mut pool = self.pool.lock().unwrap();
            pool.insert(
                &mut state.changed.ps_const_f,
                start_register,
                start_register + count,
            );
            state.changed.group |= StateGroup::PS_CONST;
            return Ok(());
        }

        if self.state.ps_const_f[lo..hi] == *data {
            return Ok(());
        }
        self.state.ps_const_f[lo..hi].copy_from_slice(data);
        self.ctx
            .set_constants_f(ShaderStage::Pixel, start_register, data.to_vec());
        Ok(())
    }

    pub fn set_pixel_shader_constant_i(
        &mut self,
        start_register: u32,
        data: &[i32],
    ) -> D3dResult<()> {
        user_assert!(data.len() % 4 == 0, D3dError::InvalidCall);
        let count = (data.len() / 4) as u32;
        user_assert!(
            start_register + count <= MAX_CONST_I as u32,
            D3dError::InvalidCall
        );
        if count == 0 {
            return Ok(());
        }
        let lo = start_register as usize * 4;
        let hi = lo + data.len();

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ps_const_i[lo..hi].copy_from_slice(data);
            for register in start_register..start_register + count {
                state.changed.ps_const_i |= 1 << register;
            }
            state.changed.group |= StateGroup::PS_CONST;
            return Ok(());
        }

        if self.state.ps_const_i[lo..hi] == *data {
            return Ok(());
        }
        self.state.ps_const_i[lo..hi].copy_from_slice(data);
        self.ctx
            .set_constants_i(ShaderStage::Pixel, start_register, data.to_vec());
        Ok(())
    }

    pub fn set_pixel_shader_constant_b(
        &mut self,
        start_register: u32,
        data: &[u32],
    ) -> D3dResult<()> {
        let count = data.len() as u32;
        user_assert!(
            start_register + count <= MAX_CONST_B as u32,
            D3dError::InvalidCall
        );
        if count == 0 {
            return Ok(());
        }
        let lo = start_register as usize;
        let normalized: Vec<u32> = data.iter().map(|&b| if b != 0 { !0 } else { 0 }).collect();

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ps_const_b[lo..lo + data.len()].copy_from_slice(&normalized);
            for register in start_register..start_register + count {
                state.changed.ps_const_b |= 1 << register;
            }
            state.changed.group |= StateGroup::PS_CONST;
            return Ok(());
        }

        if self.state.ps_const_b[lo..lo + data.len()] == normalized[..] {
            return Ok(());
        }
        self.state.ps_const_b[lo..lo + data.len()].copy_from_slice(&normalized);
        self.ctx
            .set_constants_b(ShaderStage::Pixel, start_register, normalized);
        Ok(())
    }
}

/// Viewport, scissor, clip planes, fixed function.
impl Device9 {
    pub fn set_viewport(&mut self, viewport: Viewport) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            state.viewport = viewport;
            state.changed.group |= StateGroup::VIEWPORT;
            return Ok(());
        }

        if self.state.viewport == viewport {
            return Ok(());
        }
        self.state.viewport = viewport;
        self.ctx.set_viewport(viewport);
        Ok(())
    }

    pub fn get_viewport(&self) -> Viewport {
        self.state.viewport
    }

    pub fn set_scissor_rect(&mut self, rect: Rect) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            state.scissor = rect;
            state.changed.group |= StateGroup::SCISSOR;
            return Ok(());
        }

        if self.state.scissor == rect {
            return Ok(());
        }
        self.state.scissor = rect;
        self.ctx.set_scissor(rect);
        Ok(())
    }

    pub fn get_scissor_rect(&self) -> Rect {
        self.state.scissor
    }

    pub fn set_clip_plane(&mut self, index: u32, plane: &[f32; 4]) -> D3dResult<()> {
        user_assert!((index as usize) < MAX_CLIP_PLANES, D3dError::InvalidCall);

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.clip_planes[index as usize] = *plane;
            state.changed.ucp |= 1 << index;
            return Ok(());
        }

        self.state.clip_planes[index as usize] = *plane;
        self.ctx.set_clip_plane(index, *plane);
        Ok(())
    }

    pub fn get_clip_plane(&self, index: u32) -> D3dResult<[f32; 4]> {
        user_assert!((index as usize) < MAX_CLIP_PLANES, D3dError::InvalidCall);
        Ok(self.state.clip_planes[index as usize])
    }

    pub fn set_material(&mut self, material: &Material) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ff.material = *material;
            state.changed.group |= StateGroup::FF_MATERIAL;
            return Ok(());
        }

        self.state.ff.material = *material;
        self.ctx.set_material(*material);
        Ok(())
    }

    pub fn get_material(&self) -> Material {
        self.state.ff.material
    }

    pub fn set_light(&mut self, index: u32, light: &Light) -> D3dResult<()> {
        user_assert!(light.kind >= crate::abi::light::POINT, D3dError::InvalidCall);
        user_assert!(
            light.kind < crate::abi::light::INVALID,
            D3dError::InvalidCall
        );

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ff.set_light(index, light)?;
            state.changed.group |= StateGroup::FF_LIGHTING;
            return Ok(());
        }

        self.state.ff.set_light(index, light)?;
        self.ctx.set_light(index, *light);
        Ok(())
    }

    pub fn get_light(&self, index: u32) -> D3dResult<Light> {
        user_assert!(self.state.ff.light_defined(index), D3dError::InvalidCall);
        Ok(self.state.ff.lights[index as usize])
    }

    pub fn light_enable(&mut self, index: u32, enable: bool) -> D3dResult<()> {
        // Enabling an undefined index creates a default directional light
        // first.
        let defined = if let Some(record) = &self.record {
            record.state().ff.light_defined(index)
        } else {
            self.state.ff.light_defined(index)
        };
        if !defined {
            self.set_light(index, &Light::default_directional())?;
        }

        if let Some(record) = &self.record {
            let mut state = record.state();
            state.ff.light_enable(index, enable)?;
            state.changed.group |= StateGroup::FF_LIGHTING;
            return Ok(());
        }

        self.state.ff.light_enable(index, enable)?;
        self.ctx.light_enable(index, enable);
        Ok(())
    }

    pub fn get_light_enable(&self, index: u32) -> D3dResult<bool> {
        user_assert!(self.state.ff.light_defined(index), D3dError::InvalidCall);
        Ok(self.state.ff.light_enabled(index))
    }

    pub fn set_transform(&mut self, transform_state: u32, matrix: &Matrix) -> D3dResult<()> {
        if let Some(record) = &self.record {
            let mut state = record.state();
            let slot = state
                .ff
                .transform_mut(transform_state)
                .ok_or(D3dError::InvalidCall)?;
            *slot = *matrix;
            state.changed.ff.mark_transform(transform_state);
            state.changed.group |= StateGroup::FF_VSTRANSF;
            return Ok(());
        }

        let slot = self
            .state
            .ff
            .transform_mut(transform_state)
            .ok_or(D3dError::InvalidCall)?;
        *slot = *matrix;
        self.ctx.set_transform(transform_state, *matrix);
        Ok(())
    }

    pub fn get_transform(&self, transform_state: u32) -> D3dResult<Matrix> {
        user_assert!(
            crate::state::ff::transform_index(transform_state).is_some(),
            D3dError::InvalidCall
        );
        Ok(self.state.ff.transform(transform_state))
    }
}

/// Draws and clears.
impl Device9 {
    pub fn draw_primitive(
        &mut self,
        primitive: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    ) -> D3dResult<()> {
        user_assert!(primitive_count != 0, D3dError::InvalidCall);
        self.ctx
            .draw_primitive(primitive, start_vertex, primitive_count);
        Ok(())
    }

    pub fn draw_indexed_primitive(
        &mut self,
        primitive: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    ) -> D3dResult<()> {
        user_assert!(primitive_count != 0, D3dError::InvalidCall);
        user_assert!(self.state.idxbuf.is_some(), D3dError::InvalidCall);
        user_assert!(self.state.vdecl.is_some(), D3dError::InvalidCall);
        self.ctx
            .draw_indexed_primitive(primitive, base_vertex, start_index, primitive_count);
        Ok(())
    }

    pub fn clear(
        &mut self,
        flags: ClearFlags,
        color: u32,
        depth: f32,
        stencil: u32,
    ) -> D3dResult<()> {
        user_assert!(!flags.is_empty(), D3dError::InvalidCall);
        self.ctx.clear(flags, color, depth, stencil);
        Ok(())
    }
}

/// State blocks.
impl Device9 {
    pub fn begin_state_block(&mut self) -> D3dResult<()> {
        user_assert!(self.record.is_none(), D3dError::InvalidCall);

        let block = StateBlock9::new(
            StateBlockKind::Custom,
            self.pool.clone(),
            DeviceState::new(self.caps.max_vs_const_f as usize),
        );
        // The device's hold while recording is internal ownership, not an
        // application reference.
        block.convert_ref_to_bind();
        self.record = Some(block);
        debug!("state block recording started");
        Ok(())
    }

    pub fn end_state_block(&mut self) -> D3dResult<Arc<StateBlock9>> {
        let block = self.record.take().ok_or(D3dError::InvalidCall)?;
        block.add_ref();
        block.unbind();
        debug!("state block recording finished");
        Ok(block)
    }

    pub fn create_state_block(&mut self, kind: StateBlockKind) -> D3dResult<Arc<StateBlock9>> {
        user_assert!(!self.is_recording(), D3dError::InvalidCall);
        user_assert!(
            !matches!(kind, StateBlockKind::Custom),
            D3dError::InvalidCall
        );

        let block = StateBlock9::new(
            kind,
            self.pool.clone(),
            DeviceState::new(self.caps.max_vs_const_f as usize),
        );
        {
            let mut state = block.state();
            let mut pool = self.pool.lock().unwrap();
            seed_predefined_mask(
                &mut state,
                kind,
                self.state.ff.lights.len(),
                self.caps.max_vs_const_f,
                &mut pool,
            );
        }
        self.capture_state_block(&block)?;
        Ok(block)
    }

    /// Re-captures the block's recorded slice from the live state.
    pub fn capture_state_block(&mut self, block: &Arc<StateBlock9>) -> D3dResult<()> {
        user_assert!(!self.is_recording(), D3dError::InvalidCall);

        let mut pool = self.pool.lock().unwrap();
        let mut block_state = block.state();
        if block.kind() == StateBlockKind::All {
            copy_state_all(&mut block_state, &self.state, false, &mut pool);
        } else {
            let mask = block_state.changed;
            copy_state(&mut block_state, &self.state, &mask, false, &mut pool);
        }
        if block_state.changed.group.contains(StateGroup::VDECL) {
            bind_slot(&mut block_state.vdecl, self.state.vdecl.as_ref());
        }
        Ok(())
    }

    /// Replays the block's recorded slice onto the live state, then hands
    /// the same delta to the context so the backend catches up.
    pub fn apply_state_block(&mut self, block: &Arc<StateBlock9>) -> D3dResult<()> {
        user_assert!(!self.is_recording(), D3dError::InvalidCall);

        let mut pool = self.pool.lock().unwrap();
        let block_state = block.state();
        let mask = block_state.changed;
        // The device-side copy has to come first: the context walk reads
        // the block's state, and callers expect get_* to observe applied
        // values synchronously.
        if block.kind() == StateBlockKind::All {
            copy_state_all(&mut self.state, &block_state, true, &mut pool);
        } else {
            copy_state(&mut self.state, &block_state, &mask, true, &mut pool);
        }
        self.ctx.apply_state_block(&block_state, &mask, &pool);
        if mask.group.contains(StateGroup::VDECL) && block_state.vdecl.is_some() {
            bind_slot(&mut self.state.vdecl, block_state.vdecl.as_ref());
        }
        Ok(())
    }
}

impl Drop for Device9 {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            record.unbind();
        }
        self.state.unbind_all();
        {
            let mut pool = self.pool.lock().unwrap();
            self.state.changed.release_ranges(&mut pool);
        }
        for swapchain in self.swapchains.drain(..) {
            swapchain.release();
        }
        // Let the backend finish deferred destroys before the context (and
        // with it a CSMT worker) goes away.
        self.ctx.flush();
    }
}
