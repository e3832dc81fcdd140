//! Serialized entry points for multithread-created devices.
//!
//! A device created with the multithread behavior flag promises that any
//! thread may call any entry point. The contract is one coarse lock per
//! device held for the full duration of each call, not finer-grained
//! locking, which would change observable ordering. Object destruction has
//! the same need: a `Release` that drops the last reference tears down
//! backend state, so it must run under the device lock too
//! ([`LockedDevice::release_object`]).
//!
//! Wrappers delegate 1:1; behavior lives in [`Device9`].

use std::sync::{Arc, Mutex, MutexGuard};

use novem_pipe::{ClearFlags, IndexFormat, Pipe, Rect, VertexElement, Viewport};

use crate::abi::{Light, Material, Matrix, PrimitiveType, QueryType, StateBlockKind};
use crate::device::{Device9, DeviceCaps, DeviceParams};
use crate::error::D3dResult;
use crate::query::{GetData, GetDataFlags, Query9};
use crate::resource::{IndexBuffer9, Surface9, SwapChain9, Texture9, TextureDesc, VertexBuffer9};
use crate::shader::{PixelShader9, VertexDeclaration9, VertexShader9};
use crate::stateblock::StateBlock9;
use crate::unknown::{Unknown, UnknownExt};

/// Thread-safe wrapper around a device. Clones share the same device and
/// the same lock.
#[derive(Clone)]
pub struct LockedDevice {
    inner: Arc<Mutex<Device9>>,
}

impl LockedDevice {
    pub fn new(pipe: Box<dyn Pipe>, params: DeviceParams) -> D3dResult<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Device9::new(pipe, params)?)),
        })
    }

    /// Escape hatch for compound operations that must stay atomic across
    /// several calls.
    pub fn lock(&self) -> MutexGuard<'_, Device9> {
        self.inner.lock().unwrap()
    }

    /// Drops an external reference with the device lock held, so a
    /// destruction triggered by this release cannot race backend work
    /// issued from another thread.
    pub fn release_object<T: Unknown + ?Sized>(&self, object: &T) -> u32 {
        let _guard = self.lock();
        object.release()
    }

    pub fn caps(&self) -> DeviceCaps {
        self.lock().caps()
    }

    pub fn flush(&self) {
        self.lock().flush()
    }

    pub fn create_vertex_buffer(&self, size: u64) -> D3dResult<Arc<VertexBuffer9>> {
        self.lock().create_vertex_buffer(size)
    }

    pub fn create_index_buffer(
        &self,
        size: u64,
        format: IndexFormat,
    ) -> D3dResult<Arc<IndexBuffer9>> {
        self.lock().create_index_buffer(size, format)
    }

    pub fn create_texture(&self, desc: TextureDesc) -> D3dResult<Arc<Texture9>> {
        self.lock().create_texture(desc)
    }

    pub fn create_render_target(&self, width: u32, height: u32) -> D3dResult<Arc<Surface9>> {
        self.lock().create_render_target(width, height)
    }

    pub fn create_vertex_shader(&self, byte_code: &[u32]) -> D3dResult<Arc<VertexShader9>> {
        self.lock().create_vertex_shader(byte_code)
    }

    pub fn create_pixel_shader(&self, byte_code: &[u32]) -> D3dResult<Arc<PixelShader9>> {
        self.lock().create_pixel_shader(byte_code)
    }

    pub fn create_vertex_declaration(
        &self,
        elements: &[VertexElement],
    ) -> D3dResult<Arc<VertexDeclaration9>> {
        self.lock().create_vertex_declaration(elements)
    }

    pub fn create_query(&self, kind: QueryType) -> D3dResult<Arc<Query9>> {
        self.lock().create_query(kind)
    }

    pub fn query_supported(&self, kind: QueryType) -> bool {
        self.lock().query_supported(kind)
    }

    pub fn create_additional_swap_chain(
        &self,
        width: u32,
        height: u32,
    ) -> D3dResult<Arc<SwapChain9>> {
        self.lock().create_additional_swap_chain(width, height)
    }

    pub fn swap_chain(&self, index: u32) -> D3dResult<Arc<SwapChain9>> {
        self.lock().swap_chain(index)
    }

    pub fn present(&self) -> D3dResult<()> {
        self.lock().present()
    }

    pub fn set_render_state(&self, state_id: u32, value: u32) -> D3dResult<()> {
        self.lock().set_render_state(state_id, value)
    }

    pub fn get_render_state(&self, state_id: u32) -> D3dResult<u32> {
        self.lock().get_render_state(state_id)
    }

    pub fn set_sampler_state(&self, stage: u32, state_id: u32, value: u32) -> D3dResult<()> {
        self.lock().set_sampler_state(stage, state_id, value)
    }

    pub fn get_sampler_state(&self, stage: u32, state_id: u32) -> D3dResult<u32> {
        self.lock().get_sampler_state(stage, state_id)
    }

    pub fn set_texture(&self, stage: u32, texture: Option<&Arc<Texture9>>) -> D3dResult<()> {
        self.lock().set_texture(stage, texture)
    }

    pub fn get_texture(&self, stage: u32) -> D3dResult<Option<Arc<Texture9>>> {
        self.lock().get_texture(stage)
    }

    pub fn set_texture_stage_state(&self, stage: u32, state_id: u32, value: u32) -> D3dResult<()> {
        self.lock().set_texture_stage_state(stage, state_id, value)
    }

    pub fn set_stream_source(
        &self,
        stream: u32,
        buffer: Option<&Arc<VertexBuffer9>>,
        offset: u32,
        stride: u32,
    ) -> D3dResult<()> {
        self.lock().set_stream_source(stream, buffer, offset, stride)
    }

    pub fn set_stream_source_freq(&self, stream: u32, setting: u32) -> D3dResult<()> {
        self.lock().set_stream_source_freq(stream, setting)
    }

    pub fn set_indices(&self, buffer: Option<&Arc<IndexBuffer9>>) -> D3dResult<()> {
        self.lock().set_indices(buffer)
    }

    pub fn set_vertex_declaration(&self, decl: Option<&Arc<VertexDeclaration9>>) -> D3dResult<()> {
        self.lock().set_vertex_declaration(decl)
    }

    pub fn set_vertex_shader(&self, shader: Option<&Arc<VertexShader9>>) -> D3dResult<()> {
        self.lock().set_vertex_shader(shader)
    }

    pub fn set_pixel_shader(&self, shader: Option<&Arc<PixelShader9>>) -> D3dResult<()> {
        self.lock().set_pixel_shader(shader)
    }

    pub fn set_vertex_shader_constant_f(&self, start_register: u32, data: &[f32]) -> D3dResult<()> {
        self.lock().set_vertex_shader_constant_f(start_register, data)
    }

    pub fn set_vertex_shader_constant_i(&self, start_register: u32, data: &[i32]) -> D3dResult<()> {
        self.lock().set_vertex_shader_constant_i(start_register, data)
    }

    pub fn set_vertex_shader_constant_b(&self, start_register: u32, data: &[u32]) -> D3dResult<()> {
        self.lock().set_vertex_shader_constant_b(start_register, data)
    }

    pub fn set_pixel_shader_constant_f(&self, start_register: u32, data: &[f32]) -> D3dResult<()> {
        self.lock().set_pixel_shader_constant_f(start_register, data)
    }

    pub fn set_viewport(&self, viewport: Viewport) -> D3dResult<()> {
        self.lock().set_viewport(viewport)
    }

    pub fn set_scissor_rect(&self, rect: Rect) -> D3dResult<()> {
        self.lock().set_scissor_rect(rect)
    }

    pub fn set_clip_plane(&self, index: u32, plane: &[f32; 4]) -> D3dResult<()> {
        self.lock().set_clip_plane(index, plane)
    }

    pub fn set_material(&self, material: &Material) -> D3dResult<()> {
        self.lock().set_material(material)
    }

    pub fn set_light(&self, index: u32, light: &Light) -> D3dResult<()> {
        self.lock().set_light(index, light)
    }

    pub fn light_enable(&self, index: u32, enable: bool) -> D3dResult<()> {
        self.lock().light_enable(index, enable)
    }

    pub fn set_transform(&self, transform_state: u32, matrix: &Matrix) -> D3dResult<()> {
        self.lock().set_transform(transform_state, matrix)
    }

    pub fn draw_primitive(
        &self,
        primitive: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    ) -> D3dResult<()> {
        self.lock()
            .draw_primitive(primitive, start_vertex, primitive_count)
    }

    pub fn draw_indexed_primitive(
        &self,
        primitive: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    ) -> D3dResult<()> {
        self.lock()
            .draw_indexed_primitive(primitive, base_vertex, start_index, primitive_count)
    }

    pub fn clear(&self, flags: ClearFlags, color: u32, depth: f32, stencil: u32) -> D3dResult<()> {
        self.lock().clear(flags, color, depth, stencil)
    }

    pub fn begin_state_block(&self) -> D3dResult<()> {
        self.lock().begin_state_block()
    }

    pub fn end_state_block(&self) -> D3dResult<Arc<StateBlock9>> {
        self.lock().end_state_block()
    }

    pub fn create_state_block(&self, kind: StateBlockKind) -> D3dResult<Arc<StateBlock9>> {
        self.lock().create_state_block(kind)
    }

    pub fn capture_state_block(&self, block: &Arc<StateBlock9>) -> D3dResult<()> {
        self.lock().capture_state_block(block)
    }

    pub fn apply_state_block(&self, block: &Arc<StateBlock9>) -> D3dResult<()> {
        self.lock().apply_state_block(block)
    }

    /// Query polls take the device lock like every other entry point; the
    /// blocking variant therefore stalls other callers, which is the
    /// documented cost of waiting on a multithreaded device.
    pub fn query_get_data(
        &self,
        query: &Arc<Query9>,
        out: &mut [u8],
        flags: GetDataFlags,
    ) -> D3dResult<GetData> {
        let _guard = self.lock();
        query.get_data(out, flags)
    }

    pub fn query_issue(&self, query: &Arc<Query9>, flags: u32) -> D3dResult<()> {
        let _guard = self.lock();
        query.issue(flags)
    }
}
