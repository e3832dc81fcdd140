//! Bindable resource objects: buffers, textures and their surfaces, and
//! swap chains.
//!
//! Each object pairs an [`ObjectCore`] with the backend handle it owns and
//! the context it must return that handle through. Destruction goes through
//! the context funnel like any other backend work, so a resource freed from
//! the API thread is torn down on the backend only after every command that
//! used it.
//!
//! Containment: a texture owns its mip surfaces (forwarding children: a
//! bound surface keeps the whole texture internally alive); a swap chain
//! owns its backbuffers as *non*-forwarding children, which are detached at
//! teardown.

use std::sync::{Arc, Weak};

use novem_pipe::{IndexBinding, IndexFormat, ResourceHandle};
use tracing::debug;

use crate::context::Context;
use crate::unknown::{destroy_child, iid, InitialOwner, ObjectCore, Tag, Unknown, UnknownExt};

#[derive(Debug)]
pub struct VertexBuffer9 {
    core: ObjectCore,
    ctx: Arc<Context>,
    handle: ResourceHandle,
    size: u64,
}

impl VertexBuffer9 {
    pub(crate) fn new(ctx: Arc<Context>, handle: ResourceHandle, size: u64) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            ctx,
            handle,
            size,
        })
    }

    pub fn resource_handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Unknown for VertexBuffer9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::RESOURCE, iid::VERTEX_BUFFER]
    }

    fn on_destroy(&self) {
        self.ctx.destroy_resource(self.handle);
    }
}

#[derive(Debug)]
pub struct IndexBuffer9 {
    core: ObjectCore,
    ctx: Arc<Context>,
    handle: ResourceHandle,
    size: u64,
    format: IndexFormat,
}

impl IndexBuffer9 {
    pub(crate) fn new(
        ctx: Arc<Context>,
        handle: ResourceHandle,
        size: u64,
        format: IndexFormat,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            ctx,
            handle,
            size,
            format,
        })
    }

    pub fn resource_handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn index_binding(&self) -> IndexBinding {
        IndexBinding {
            buffer: self.handle,
            format: self.format,
        }
    }
}

impl Unknown for IndexBuffer9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::RESOURCE, iid::INDEX_BUFFER]
    }

    fn on_destroy(&self) {
        self.ctx.destroy_resource(self.handle);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub level: u32,
}

/// A single 2D level. Either a view into a containing texture (no backend
/// handle of its own) or a standalone render target owning one.
#[derive(Debug)]
pub struct Surface9 {
    core: ObjectCore,
    ctx: Arc<Context>,
    handle: Option<ResourceHandle>,
    desc: SurfaceDesc,
}

impl Surface9 {
    fn for_container(ctx: Arc<Context>, desc: SurfaceDesc, forward: bool) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Contained, forward),
            ctx,
            handle: None,
            desc,
        })
    }

    pub(crate) fn standalone(
        ctx: Arc<Context>,
        handle: ResourceHandle,
        desc: SurfaceDesc,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            ctx,
            handle: Some(handle),
            desc,
        })
    }

    pub fn desc(&self) -> SurfaceDesc {
        self.desc
    }
}

impl Unknown for Surface9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::RESOURCE, iid::SURFACE]
    }

    fn on_destroy(&self) {
        if let Some(handle) = self.handle {
            self.ctx.destroy_resource(handle);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub levels: u32,
}

/// A mip-mapped 2D texture; container of its level surfaces.
#[derive(Debug)]
pub struct Texture9 {
    core: ObjectCore,
    ctx: Arc<Context>,
    handle: ResourceHandle,
    desc: TextureDesc,
    surfaces: Vec<Arc<Surface9>>,
}

impl Texture9 {
    pub(crate) fn new(ctx: Arc<Context>, handle: ResourceHandle, desc: TextureDesc) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let surfaces = (0..desc.levels)
                .map(|level| {
                    let surface = Surface9::for_container(
                        ctx.clone(),
                        SurfaceDesc {
                            width: (desc.width >> level).max(1),
                            height: (desc.height >> level).max(1),
                            level,
                        },
                        true,
                    );
                    surface.core().set_container(weak.clone());
                    surface
                })
                .collect();
            Self {
                core: ObjectCore::new(InitialOwner::Referenced, false),
                ctx,
                handle,
                desc,
                surfaces,
            }
        })
    }

    pub fn resource_handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub fn level_count(&self) -> u32 {
        self.desc.levels
    }

    /// Hands out a level surface with a fresh external reference, COM
    /// style.
    pub fn surface_level(&self, level: u32) -> Option<Arc<Surface9>> {
        let surface = self.surfaces.get(level as usize)?;
        surface.add_ref();
        Some(surface.clone())
    }
}

impl Unknown for Texture9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::RESOURCE, iid::BASE_TEXTURE, iid::TEXTURE]
    }

    fn on_destroy(&self) {
        debug!(handle = ?self.handle, "texture teardown");
        for surface in &self.surfaces {
            destroy_child(surface.as_ref());
        }
        self.ctx.destroy_resource(self.handle);
    }
}

/// A presentation target. Out-of-scope windowing means presenting reduces
/// to draining outstanding work; the object exists for its ownership
/// semantics (non-forwarding, detachable backbuffers) and the backbuffer
/// surface it exposes.
#[derive(Debug)]
pub struct SwapChain9 {
    core: ObjectCore,
    ctx: Arc<Context>,
    backbuffers: Vec<Arc<Surface9>>,
}

impl SwapChain9 {
    pub(crate) fn new(ctx: Arc<Context>, backbuffers: Vec<(ResourceHandle, SurfaceDesc)>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let backbuffers = backbuffers
                .into_iter()
                .map(|(handle, desc)| {
                    let surface = Arc::new(Surface9 {
                        core: ObjectCore::new(InitialOwner::Contained, false),
                        ctx: ctx.clone(),
                        handle: Some(handle),
                        desc,
                    });
                    surface.core().set_container(weak.clone());
                    surface
                })
                .collect();
            Self {
                core: ObjectCore::new(InitialOwner::Referenced, false),
                ctx,
                backbuffers,
            }
        })
    }

    pub fn back_buffer(&self, index: u32) -> Option<Arc<Surface9>> {
        let surface = self.backbuffers.get(index as usize)?;
        surface.add_ref();
        Some(surface.clone())
    }

    /// Flips are a windowing concern; what remains here is the ordering
    /// guarantee that everything submitted so far has executed.
    pub fn present(&self) {
        self.ctx.flush();
    }
}

impl Unknown for SwapChain9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::SWAP_CHAIN]
    }

    fn on_destroy(&self) {
        for surface in &self.backbuffers {
            // Non-forwarding children: sever the relationship first; any
            // surface the application still holds survives on its own
            // counts and is destroyed by its last release.
            if !surface.core().is_destroyed() {
                surface.detach();
            }
        }
    }
}
