//! Owned-payload command representation crossing the device→context seam.
//!
//! Every state mutation or draw that must reach the backend becomes one of
//! these variants. Payloads are fully resolved at construction (copied
//! slices, raw backend handles, no object references), because a command may
//! be executed on the worker thread long after the caller's stack frame and
//! even after the originating object's last external reference are gone.

use novem_pipe::{
    ClearFlags, IndexBinding, QueryHandle, Rect, ResourceHandle, ShaderKey, VertexElement,
    Viewport,
};

use crate::abi::{Light, Material, Matrix, PrimitiveType};

/// A vertex stream binding, pre-resolved to the backend handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamBinding {
    pub buffer: ResourceHandle,
    pub offset: u32,
    pub stride: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContextCmd {
    SetRenderState {
        state_id: u32,
        value: u32,
    },
    SetSamplerState {
        sampler: u32,
        state_id: u32,
        value: u32,
    },
    SetTexture {
        sampler: u32,
        texture: Option<ResourceHandle>,
    },
    SetStreamSource {
        stream: u32,
        binding: Option<StreamBinding>,
    },
    SetStreamFreq {
        stream: u32,
        setting: u32,
    },
    SetIndices {
        binding: Option<IndexBinding>,
    },
    SetVertexShader {
        shader: Option<ShaderKey>,
    },
    SetPixelShader {
        shader: Option<ShaderKey>,
    },
    SetVertexDeclaration {
        elements: Option<Vec<VertexElement>>,
    },
    SetConstantsF {
        stage: novem_pipe::ShaderStage,
        start_register: u32,
        data: Vec<f32>,
    },
    SetConstantsI {
        stage: novem_pipe::ShaderStage,
        start_register: u32,
        data: Vec<i32>,
    },
    SetConstantsB {
        stage: novem_pipe::ShaderStage,
        start_register: u32,
        data: Vec<u32>,
    },
    SetViewport(Viewport),
    SetScissor(Rect),
    SetClipPlane {
        index: u32,
        plane: [f32; 4],
    },
    SetMaterial(Material),
    SetLight {
        index: u32,
        light: Light,
    },
    LightEnable {
        index: u32,
        enable: bool,
    },
    /// Wholesale replacement of the enabled-light list, used when a state
    /// block apply must restore the list exactly as recorded.
    SetActiveLights {
        indices: Vec<u32>,
    },
    SetTransform {
        state: u32,
        matrix: Matrix,
    },
    SetTextureStageState {
        stage: u32,
        state_id: u32,
        value: u32,
    },
    Clear {
        flags: ClearFlags,
        color: u32,
        depth: f32,
        stencil: u32,
    },
    DrawPrimitive {
        primitive: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    },
    DrawIndexedPrimitive {
        primitive: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        primitive_count: u32,
    },
    QueryBegin(QueryHandle),
    QueryEnd(QueryHandle),
    DestroyResource(ResourceHandle),
    DestroyQuery(QueryHandle),
    /// A state-block apply, executed as one unit so no observer on the
    /// worker side can see a half-applied block. The inner commands are the
    /// block's recorded delta, replayed through the ordinary paths.
    ApplyStateBlock(Vec<ContextCmd>),
}
