//! Shader and vertex-declaration objects.
//!
//! Translation of the token streams lives behind the pipe (a separate
//! concern); the device layer only owns the original bytes, a stable
//! [`ShaderKey`] the backend resolves, and the binding lifetime.

use std::sync::Arc;

use novem_pipe::{ShaderKey, VertexElement};

use crate::unknown::{iid, InitialOwner, ObjectCore, Tag, Unknown};

#[derive(Debug)]
pub struct VertexShader9 {
    core: ObjectCore,
    key: ShaderKey,
    byte_code: Vec<u32>,
}

impl VertexShader9 {
    pub(crate) fn new(key: ShaderKey, byte_code: Vec<u32>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            key,
            byte_code,
        })
    }

    pub fn key(&self) -> ShaderKey {
        self.key
    }

    /// The original token stream, as submitted by the application.
    pub fn byte_code(&self) -> &[u32] {
        &self.byte_code
    }
}

impl Unknown for VertexShader9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::VERTEX_SHADER]
    }
}

#[derive(Debug)]
pub struct PixelShader9 {
    core: ObjectCore,
    key: ShaderKey,
    byte_code: Vec<u32>,
}

impl PixelShader9 {
    pub(crate) fn new(key: ShaderKey, byte_code: Vec<u32>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            key,
            byte_code,
        })
    }

    pub fn key(&self) -> ShaderKey {
        self.key
    }

    pub fn byte_code(&self) -> &[u32] {
        &self.byte_code
    }
}

impl Unknown for PixelShader9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::PIXEL_SHADER]
    }
}

#[derive(Debug)]
pub struct VertexDeclaration9 {
    core: ObjectCore,
    elements: Vec<VertexElement>,
}

impl VertexDeclaration9 {
    pub(crate) fn new(elements: Vec<VertexElement>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            elements,
        })
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }
}

impl Unknown for VertexDeclaration9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::VERTEX_DECLARATION]
    }
}
