//! D3D9-level status codes.
//!
//! Everything the public surface can report maps onto this closed set; the
//! backend's richer [`novem_pipe::PipeError`] collapses into it at the
//! device boundary. "Not ready yet" is deliberately *not* in here: polling
//! a still-running query is a successful call with no data (see
//! `query::GetData`), matching the caller retry pattern.

use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum D3dError {
    /// Contract violation by the caller: bad enum value, out-of-range index,
    /// operation invalid in the current state.
    #[error("invalid call")]
    InvalidCall,
    /// Allocation failed, after the create-retry policy already ran.
    #[error("out of video memory")]
    OutOfMemory,
    /// The requested feature is not supported by the backend.
    #[error("feature not available")]
    NotAvailable,
    /// Reserved for device-loss propagation from the backend.
    #[error("device lost")]
    DeviceLost,
}

pub type D3dResult<T> = Result<T, D3dError>;

/// Returns `Err($err)` unless `$cond` holds.
///
/// The D3D9 flavor of input validation: caller mistakes surface as a status
/// code, never as a panic or silent acceptance.
macro_rules! user_assert {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use user_assert;
