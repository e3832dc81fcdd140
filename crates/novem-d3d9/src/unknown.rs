//! COM-style object lifetime: external references, internal binds, and
//! container forwarding.
//!
//! Every device object owns an [`ObjectCore`] and implements [`Unknown`].
//! Two counters govern logical lifetime:
//!
//! - `refs`: external, application-visible ownership (`AddRef`/`Release`).
//! - `bind`: internal ownership, meaning "referenced by live device state"
//!   (bound as a texture, stream source, recorded in a state block, ...).
//!
//! An object is destroyed exactly once, at the decrement that makes both
//! counters zero while no container relationship remains. Sub-resources that
//! *forward* (a surface inside a texture) propagate their bind count's
//! 0↔1 transitions to the container, so a texture stays internally alive
//! while any of its surfaces is bound somewhere.
//!
//! All four count operations live on [`UnknownExt`] so the forwarding rule
//! cannot be bypassed by touching a counter directly. Rust's `Arc` handles
//! memory; these counters handle the *semantic* lifetime (when the backend
//! resource is released), which is why "destroyed" is observable state and
//! not deallocation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, Weak};

use hashbrown::HashMap;
use thiserror::Error;
use tracing::trace;

/// 128-bit interface/private-data tag, the COM GUID equivalent.
pub type Tag = u128;

pub mod iid {
    use super::Tag;

    pub const UNKNOWN: Tag = 0x0000_0001;
    pub const DEVICE: Tag = 0x0000_0002;
    pub const RESOURCE: Tag = 0x0000_0003;
    pub const BASE_TEXTURE: Tag = 0x0000_0004;
    pub const TEXTURE: Tag = 0x0000_0005;
    pub const SURFACE: Tag = 0x0000_0006;
    pub const VERTEX_BUFFER: Tag = 0x0000_0007;
    pub const INDEX_BUFFER: Tag = 0x0000_0008;
    pub const VERTEX_SHADER: Tag = 0x0000_0009;
    pub const PIXEL_SHADER: Tag = 0x0000_000a;
    pub const VERTEX_DECLARATION: Tag = 0x0000_000b;
    pub const STATE_BLOCK: Tag = 0x0000_000c;
    pub const QUERY: Tag = 0x0000_000d;
    pub const SWAP_CHAIN: Tag = 0x0000_000e;
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PrivateDataError {
    #[error("no private data stored under this tag")]
    NotFound,
    #[error("destination buffer too small, {required} bytes required")]
    BufferTooSmall { required: usize },
}

/// Which counter receives the construction-time unit of ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialOwner {
    /// Handed to the application: starts with one external reference.
    Referenced,
    /// Kept internal to the device: starts with one bind.
    Bound,
    /// Held structurally by a container: both counters start at zero and
    /// the container relationship alone keeps the object alive.
    Contained,
}

#[derive(Debug, Default)]
pub struct ObjectCore {
    refs: AtomicU32,
    bind: AtomicU32,
    forward: bool,
    container: Mutex<Option<Weak<dyn Unknown>>>,
    destroyed: AtomicBool,
    private_data: Mutex<HashMap<Tag, Box<[u8]>>>,
}

impl ObjectCore {
    pub fn new(owner: InitialOwner, forward: bool) -> Self {
        let (refs, bind) = match owner {
            InitialOwner::Referenced => (1, 0),
            InitialOwner::Bound => (0, 1),
            InitialOwner::Contained => (0, 0),
        };
        Self {
            refs: AtomicU32::new(refs),
            bind: AtomicU32::new(bind),
            forward,
            container: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            private_data: Mutex::new(HashMap::new()),
        }
    }

    /// Establishes the container relationship. Called once by the container
    /// while it constructs its children.
    pub fn set_container(&self, container: Weak<dyn Unknown>) {
        let mut slot = self.container.lock().unwrap();
        debug_assert!(slot.is_none(), "container set twice");
        *slot = Some(container);
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub fn bind_count(&self) -> u32 {
        self.bind.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn has_container(&self) -> bool {
        self.container.lock().unwrap().is_some()
    }

    fn container(&self) -> Option<std::sync::Arc<dyn Unknown>> {
        self.container
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

/// Implemented by every device object. `interfaces` is the closed set of
/// tags `query_interface` answers to; `on_destroy` releases backend-facing
/// state and runs exactly once.
pub trait Unknown: Send + Sync {
    fn core(&self) -> &ObjectCore;

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN]
    }

    fn on_destroy(&self) {}
}

pub trait UnknownExt: Unknown {
    /// Increments the external reference count and returns the new count.
    fn add_ref(&self) -> u32 {
        let core = self.core();
        debug_assert!(!core.is_destroyed(), "AddRef on destroyed object");
        core.refs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the external reference count. Destroys the object when
    /// both counters are zero and no container holds it. Returns the new
    /// count.
    fn release(&self) -> u32 {
        let core = self.core();
        let prev = core.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "reference count underflow");
        let refs = prev - 1;
        if refs == 0 && core.bind_count() == 0 && !core.has_container() {
            destroy_once(self);
        }
        refs
    }

    /// Marks the object as referenced by live device state. The first bind
    /// (0→1) propagates one bind to the container when forwarding.
    fn bind(&self) -> u32 {
        let core = self.core();
        debug_assert!(!core.is_destroyed(), "Bind on destroyed object");
        let bind = core.bind.fetch_add(1, Ordering::AcqRel) + 1;
        if bind == 1 && core.forward {
            if let Some(container) = core.container() {
                container.bind();
            }
        }
        bind
    }

    /// Releases one bind. The last unbind (1→0) propagates to the container
    /// when forwarding, and otherwise destroys the object if it is also
    /// externally unreferenced.
    fn unbind(&self) -> u32 {
        let core = self.core();
        let prev = core.bind.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "bind count underflow");
        let bind = prev - 1;
        if bind == 0 {
            if core.forward {
                if let Some(container) = core.container() {
                    container.unbind();
                }
            } else if core.ref_count() == 0 && !core.has_container() {
                destroy_once(self);
            }
        }
        bind
    }

    /// Transfers one unit of ownership from the reference domain to the
    /// bind domain without letting liveness dip to zero in between.
    fn convert_ref_to_bind(&self) {
        self.bind();
        self.release();
    }

    /// Clears the container relationship. Only valid for non-forwarding
    /// children; if the object is already unreferenced and unbound it is
    /// destroyed on the spot.
    fn detach(&self) {
        let core = self.core();
        debug_assert!(!core.forward, "detach on a forwarding object");
        let had = core.container.lock().unwrap().take();
        debug_assert!(had.is_some(), "detach without container");
        if core.ref_count() == 0 && core.bind_count() == 0 {
            destroy_once(self);
        }
    }

    /// COM-style interface probe: on a supported tag, takes a reference and
    /// reports success.
    fn query_interface(&self, tag: Tag) -> bool {
        if self.interfaces().contains(&tag) {
            self.add_ref();
            true
        } else {
            false
        }
    }

    /// Stores `data` under `tag`, replacing any prior value.
    fn set_private_data(&self, tag: Tag, data: &[u8]) {
        self.core()
            .private_data
            .lock()
            .unwrap()
            .insert(tag, data.into());
    }

    /// Copies the value stored under `tag` into `out` and returns the byte
    /// count. A too-small buffer reports the required size without copying.
    fn get_private_data(&self, tag: Tag, out: &mut [u8]) -> Result<usize, PrivateDataError> {
        let store = self.core().private_data.lock().unwrap();
        let data = store.get(&tag).ok_or(PrivateDataError::NotFound)?;
        if out.len() < data.len() {
            return Err(PrivateDataError::BufferTooSmall {
                required: data.len(),
            });
        }
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn free_private_data(&self, tag: Tag) -> Result<(), PrivateDataError> {
        self.core()
            .private_data
            .lock()
            .unwrap()
            .remove(&tag)
            .map(|_| ())
            .ok_or(PrivateDataError::NotFound)
    }
}

impl<T: Unknown + ?Sized> UnknownExt for T {}

fn destroy_once<T: Unknown + ?Sized>(obj: &T) {
    if obj.core().destroyed.swap(true, Ordering::AcqRel) {
        debug_assert!(false, "object destroyed twice");
        return;
    }
    trace!("destroying device object");
    obj.on_destroy();
}

/// Tears a child down as part of its container's destruction. Forwarding
/// children are never detached; they die exactly here.
pub fn destroy_child<T: Unknown + ?Sized>(child: &T) {
    child.core().container.lock().unwrap().take();
    if !child.core().is_destroyed() {
        destroy_once(child);
    }
}

/// Rebinds `slot` to `new`, taking a bind on the new object before dropping
/// the old one so a self-assign can never hit zero.
pub fn bind_slot<T: Unknown + ?Sized>(
    slot: &mut Option<std::sync::Arc<T>>,
    new: Option<&std::sync::Arc<T>>,
) {
    if let Some(new) = new {
        new.bind();
    }
    let old = std::mem::replace(slot, new.cloned());
    if let Some(old) = old {
        old.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Default)]
    struct Probe {
        core: ObjectCore,
        destroys: AtomicUsize,
    }

    impl Probe {
        fn referenced() -> Self {
            Self {
                core: ObjectCore::new(InitialOwner::Referenced, false),
                destroys: AtomicUsize::new(0),
            }
        }

        fn forwarding_child() -> Self {
            Self {
                core: ObjectCore::new(InitialOwner::Bound, true),
                destroys: AtomicUsize::new(0),
            }
        }
    }

    impl Unknown for Probe {
        fn core(&self) -> &ObjectCore {
            &self.core
        }

        fn on_destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_ref_release_round_trip() {
        let obj = Probe::referenced();
        assert_eq!(obj.add_ref(), 2);
        assert_eq!(obj.release(), 1);
        assert!(!obj.core.is_destroyed());
        assert_eq!(obj.release(), 0);
        assert!(obj.core.is_destroyed());
        assert_eq!(obj.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bind_keeps_unreferenced_object_alive() {
        let obj = Probe::referenced();
        obj.bind();
        assert_eq!(obj.release(), 0);
        assert!(!obj.core.is_destroyed(), "bind must keep it alive");
        assert_eq!(obj.unbind(), 0);
        assert!(obj.core.is_destroyed());
        assert_eq!(obj.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn convert_ref_to_bind_preserves_liveness() {
        let obj = Probe::referenced();
        obj.convert_ref_to_bind();
        assert!(!obj.core.is_destroyed());
        assert_eq!(obj.core.ref_count(), 0);
        assert_eq!(obj.core.bind_count(), 1);
        obj.unbind();
        assert!(obj.core.is_destroyed());
    }

    #[test]
    fn forwarding_binds_container_on_edge_transitions_only() {
        let container: Arc<Probe> = Arc::new(Probe::referenced());
        let child = Probe::forwarding_child();
        child
            .core()
            .set_container(Arc::<Probe>::downgrade(&container));

        // Construction seeded bind=1 without going through bind(), so the
        // container hasn't been touched yet; drop to zero first.
        child.unbind();
        let base = container.core().bind_count();

        child.bind(); // 0 -> 1 forwards
        assert_eq!(container.core().bind_count(), base + 1);
        child.bind(); // 1 -> 2 does not
        assert_eq!(container.core().bind_count(), base + 1);
        child.unbind(); // 2 -> 1 does not
        assert_eq!(container.core().bind_count(), base + 1);
        child.unbind(); // 1 -> 0 forwards
        assert_eq!(container.core().bind_count(), base);
    }

    #[test]
    fn container_presence_defers_destruction_until_detach() {
        let container: Arc<Probe> = Arc::new(Probe::referenced());
        let child = Probe {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            destroys: AtomicUsize::new(0),
        };
        child
            .core()
            .set_container(Arc::<Probe>::downgrade(&container));

        assert_eq!(child.release(), 0);
        assert!(!child.core.is_destroyed(), "container keeps it alive");

        child.detach();
        assert!(child.core.is_destroyed());
        assert_eq!(child.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bind_slot_is_self_assign_safe() {
        let obj = Arc::new(Probe::referenced());
        let mut slot: Option<Arc<Probe>> = None;
        bind_slot(&mut slot, Some(&obj));
        assert_eq!(obj.core.bind_count(), 1);

        let same = obj.clone();
        bind_slot(&mut slot, Some(&same));
        assert_eq!(obj.core.bind_count(), 1);
        assert!(!obj.core.is_destroyed());

        bind_slot(&mut slot, None);
        assert_eq!(obj.core.bind_count(), 0);
    }

    #[test]
    fn private_data_store_semantics() {
        let obj = Probe::referenced();
        const TAG: Tag = 0xfeed_beef;

        assert_eq!(
            obj.get_private_data(TAG, &mut []),
            Err(PrivateDataError::NotFound)
        );

        obj.set_private_data(TAG, b"hello");
        let mut small = [0u8; 3];
        assert_eq!(
            obj.get_private_data(TAG, &mut small),
            Err(PrivateDataError::BufferTooSmall { required: 5 })
        );
        assert_eq!(small, [0u8; 3], "failed get must not copy");

        let mut buf = [0u8; 8];
        assert_eq!(obj.get_private_data(TAG, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");

        obj.set_private_data(TAG, b"x");
        let mut buf = [0u8; 8];
        assert_eq!(obj.get_private_data(TAG, &mut buf), Ok(1));

        assert_eq!(obj.free_private_data(TAG), Ok(()));
        assert_eq!(obj.free_private_data(TAG), Err(PrivateDataError::NotFound));
    }

    #[test]
    fn query_interface_takes_a_reference_on_success() {
        let obj = Probe::referenced();
        assert!(obj.query_interface(iid::UNKNOWN));
        assert_eq!(obj.core.ref_count(), 2);
        assert!(!obj.query_interface(iid::TEXTURE));
        assert_eq!(obj.core.ref_count(), 2);
    }
}
