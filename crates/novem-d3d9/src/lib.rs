//! Direct3D 9 device-state translation layer.
//!
//! This crate applies D3D9 semantics (COM-style reference/bind counting,
//! the mutable device-state record, state-block record/capture/apply, and
//! queued command submission) on top of the abstract immediate-mode pipe
//! defined by `novem-pipe`. It deliberately contains no GPU code: the pipe
//! is the seam where a real backend (or the recording test double) plugs
//! in.
//!
//! Layering, bottom up:
//!
//! - [`unknown`]: the two-counter object lifetime model with container
//!   forwarding.
//! - [`range`]: pooled dirty-range tracking for shader constants.
//! - [`state`]: the device state record, change tracking, and the
//!   diff/copy engine.
//! - [`context`]: the command funnel and the optional CSMT worker thread.
//! - [`stateblock`], [`query`], [`resource`], [`shader`]: the object
//!   kinds built on the above.
//! - [`device`]: orchestration (validation, recording dispatch, redundant
//!   set elision).
//! - [`lock`]: the serialize-everything wrapper for multithread-created
//!   devices.

pub mod abi;
pub mod context;
pub mod device;
pub mod error;
pub mod limits;
pub mod lock;
pub mod query;
pub mod range;
pub mod resource;
pub mod shader;
pub mod state;
pub mod stateblock;
pub mod unknown;

pub use abi::{Light, Material, Matrix, PrimitiveType, QueryType, StateBlockKind};
pub use device::{Device9, DeviceCaps, DeviceParams};
pub use error::{D3dError, D3dResult};
pub use lock::LockedDevice;
pub use query::{GetData, GetDataFlags, Query9};
pub use resource::{IndexBuffer9, Surface9, SwapChain9, Texture9, TextureDesc, VertexBuffer9};
pub use shader::{PixelShader9, VertexDeclaration9, VertexShader9};
pub use stateblock::StateBlock9;
pub use unknown::{Unknown, UnknownExt};
