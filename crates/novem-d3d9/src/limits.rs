//! Fixed dimensions of the device state.
//!
//! These mirror the D3D9 feature envelope the translation layer advertises.
//! Shader constant banks use vec4 granularity for float/int registers and a
//! single scalar per bool register; code relying on that difference points
//! back here.

/// Pixel shader sampler slots (s0-s15).
pub const MAX_SAMPLERS_PS: usize = 16;
/// Vertex sampler slots: the displacement-map sampler plus s0-s3.
pub const MAX_SAMPLERS_VS: usize = 5;
/// Total sampler slots tracked by the device state. Vertex samplers are
/// remapped to the tail of the array (see `sampler_slot`).
pub const MAX_SAMPLERS: usize = MAX_SAMPLERS_PS + MAX_SAMPLERS_VS;

/// Sampler state ids run 1..=13 (`abi::samp`).
pub const SAMPLER_STATE_COUNT: usize = 14;

pub const MAX_STREAMS: usize = 16;
pub const MAX_STREAM_STRIDE: u32 = 508;

pub const MAX_CLIP_PLANES: usize = 8;

pub const MAX_TEXTURE_STAGES: usize = 8;
/// Texture stage state ids run 1..=32; two dirty words per stage.
pub const TEXTURE_STAGE_STATE_COUNT: usize = 33;
pub const TEXTURE_STAGE_STATE_WORDS: usize = 2;

/// Vertex float constant registers (vec4 each).
pub const MAX_VS_CONST_F: usize = 256;
/// Pixel float constant registers at the ps_3_0 level (vec4 each).
pub const MAX_PS_CONST_F: usize = 224;
/// Integer constant registers per stage (vec4 each).
pub const MAX_CONST_I: usize = 16;
/// Bool constant registers per stage (one scalar each).
pub const MAX_CONST_B: usize = 16;

/// Simultaneously enabled lights. The light *array* itself grows without
/// bound; only the active list is capped.
pub const MAX_LIGHTS_ACTIVE: usize = 8;
/// Sanity cap on light indices (the array is sparse-grown up to this).
pub const MAX_LIGHTS: u32 = 65536;

/// Highest world matrix replayed by a state-block apply. Matches the
/// MaxVertexBlendMatrixIndex limit of 8.
pub const MAX_APPLIED_WORLD_MATRIX: u32 = 8;

/// Render state ids run 0..=209; seven dirty words cover them.
pub const RS_COUNT: usize = 210;
pub const RS_WORDS: usize = RS_COUNT.div_ceil(32);

/// Dirty words for the transform mask, indexed by raw transform-state id
/// (world matrices occupy 256..511).
pub const TRANSFORM_WORDS: usize = 16;
