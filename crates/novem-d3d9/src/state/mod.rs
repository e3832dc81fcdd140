//! The device state record: everything the GPU-facing side of a device can
//! observe, plus the parallel dirty tracking that drives captures, applies,
//! and context resubmission.
//!
//! One live `DeviceState` belongs to the device; each state block owns an
//! independent one. The `changed` structure is only meaningful relative to
//! a specific diff direction: a block's dirty set names "what this block
//! recorded", the live state's names "what the context must be re-told".

pub mod copy;
pub mod ff;

use std::sync::Arc;

use bitflags::bitflags;
use novem_pipe::{Rect, Viewport};

use crate::limits::{
    MAX_CLIP_PLANES, MAX_CONST_B, MAX_CONST_I, MAX_PS_CONST_F, MAX_SAMPLERS, MAX_STREAMS,
    RS_COUNT, RS_WORDS, SAMPLER_STATE_COUNT,
};
use crate::range::{RangeList, RangePool};
use crate::resource::{IndexBuffer9, Texture9, VertexBuffer9};
use crate::shader::{PixelShader9, VertexDeclaration9, VertexShader9};

use ff::{FixedFunctionChanges, FixedFunctionState};

bitflags! {
    /// Coarse dirty groups. Fine-grained masks (render-state words, sampler
    /// bits, constant ranges) qualify these; a group bit without its fine
    /// mask means "nothing", not "everything".
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct StateGroup: u32 {
        const VIEWPORT     = 1 << 0;
        const SCISSOR      = 1 << 1;
        const VS           = 1 << 2;
        const PS           = 1 << 3;
        const VS_CONST     = 1 << 4;
        const PS_CONST     = 1 << 5;
        const VDECL        = 1 << 6;
        const IDXBUF       = 1 << 7;
        const SAMPLER      = 1 << 8;
        const FF_MATERIAL  = 1 << 9;
        const FF_LIGHTING  = 1 << 10;
        const FF_PS_CONSTS = 1 << 11;
        const FF_VSTRANSF  = 1 << 12;

        const FF = Self::FF_MATERIAL.bits()
            | Self::FF_LIGHTING.bits()
            | Self::FF_PS_CONSTS.bits()
            | Self::FF_VSTRANSF.bits();
    }
}

/// Per-category dirty tracking. Constant registers use pooled range lists
/// for the large float/int banks; the small fixed pixel int/bool banks use
/// plain bitmasks instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct StateChanges {
    pub group: StateGroup,
    pub rs: [u32; RS_WORDS],
    pub sampler: [u16; MAX_SAMPLERS],
    pub vtxbuf: u32,
    pub stream_freq: u32,
    pub ucp: u32,
    pub texture: u32,
    pub vs_const_f: RangeList,
    pub vs_const_i: RangeList,
    pub vs_const_b: RangeList,
    pub ps_const_f: RangeList,
    pub ps_const_i: u16,
    pub ps_const_b: u16,
    pub ff: FixedFunctionChanges,
}

impl StateChanges {
    pub fn mark_rs(&mut self, state_id: u32) {
        self.rs[(state_id / 32) as usize] |= 1 << (state_id % 32);
    }

    pub fn rs_marked(&self, state_id: u32) -> bool {
        self.rs[(state_id / 32) as usize] & (1 << (state_id % 32)) != 0
    }

    pub fn mark_all_rs(&mut self) {
        for word in &mut self.rs {
            *word = !0;
        }
        // Bits past the last render state stay clear so set-bit walks never
        // index out of the table.
        self.rs[RS_WORDS - 1] = (1u32 << (RS_COUNT % 32)) - 1;
    }

    /// Returns every pooled range list to `pool`. Must run before the
    /// tracking is dropped or reused for a fresh recording.
    pub fn release_ranges(&mut self, pool: &mut RangePool) {
        pool.release(&mut self.vs_const_f);
        pool.release(&mut self.vs_const_i);
        pool.release(&mut self.vs_const_b);
        pool.release(&mut self.ps_const_f);
    }
}

/// The complete mutable GPU-facing state of a device at a point in time.
///
/// Bound objects are held through their bind count (never plain clones), so
/// "referenced by a state snapshot" participates in the object lifetime
/// rules like any other internal use.
#[derive(Debug)]
pub struct DeviceState {
    pub viewport: Viewport,
    pub scissor: Rect,

    pub vs: Option<Arc<VertexShader9>>,
    pub ps: Option<Arc<PixelShader9>>,
    pub vdecl: Option<Arc<VertexDeclaration9>>,

    /// `4 * max_vs_const_f` scalars, vec4 per register.
    pub vs_const_f: Vec<f32>,
    pub vs_const_i: Vec<i32>,
    pub vs_const_b: Vec<u32>,
    pub ps_const_f: Vec<f32>,
    pub ps_const_i: Vec<i32>,
    pub ps_const_b: Vec<u32>,

    pub rs: Vec<u32>,
    pub sampler_states: [[u32; SAMPLER_STATE_COUNT]; MAX_SAMPLERS],

    pub streams: [Option<Arc<VertexBuffer9>>; MAX_STREAMS],
    pub stream_offset: [u32; MAX_STREAMS],
    pub stream_stride: [u32; MAX_STREAMS],
    pub stream_freq: [u32; MAX_STREAMS],
    pub idxbuf: Option<Arc<IndexBuffer9>>,

    pub textures: [Option<Arc<Texture9>>; MAX_SAMPLERS],

    pub clip_planes: [[f32; 4]; MAX_CLIP_PLANES],

    pub ff: FixedFunctionState,

    pub changed: StateChanges,
}

impl DeviceState {
    /// A zeroed state sized for `max_vs_const_f` float registers. State
    /// blocks start from this; the device's live state additionally gets
    /// [`set_defaults`](Self::set_defaults).
    pub fn new(max_vs_const_f: usize) -> Self {
        Self {
            viewport: Viewport::default(),
            scissor: Rect::default(),
            vs: None,
            ps: None,
            vdecl: None,
            vs_const_f: vec![0.0; max_vs_const_f * 4],
            vs_const_i: vec![0; MAX_CONST_I * 4],
            vs_const_b: vec![0; MAX_CONST_B],
            ps_const_f: vec![0.0; MAX_PS_CONST_F * 4],
            ps_const_i: vec![0; MAX_CONST_I * 4],
            ps_const_b: vec![0; MAX_CONST_B],
            rs: vec![0; RS_COUNT],
            sampler_states: [[0; SAMPLER_STATE_COUNT]; MAX_SAMPLERS],
            streams: std::array::from_fn(|_| None),
            stream_offset: [0; MAX_STREAMS],
            stream_stride: [0; MAX_STREAMS],
            stream_freq: [1; MAX_STREAMS],
            idxbuf: None,
            textures: std::array::from_fn(|_| None),
            clip_planes: [[0.0; 4]; MAX_CLIP_PLANES],
            ff: FixedFunctionState::default(),
            changed: StateChanges::default(),
        }
    }

    /// Installs the D3D9 power-on values for render and sampler states.
    pub fn set_defaults(&mut self) {
        use crate::abi::{rs, samp};

        for (state_id, value) in [
            (rs::ZENABLE, 1),
            (rs::FILLMODE, 3),              // solid
            (rs::SHADEMODE, 2),             // gouraud
            (rs::ZWRITEENABLE, 1),
            (rs::ALPHATESTENABLE, 0),
            (rs::LASTPIXEL, 1),
            (rs::SRCBLEND, 2),              // one
            (rs::DESTBLEND, 1),             // zero
            (rs::CULLMODE, 3),              // ccw
            (rs::ZFUNC, crate::abi::cmp::LESSEQUAL),
            (rs::ALPHAFUNC, crate::abi::cmp::ALWAYS),
            (rs::FOGEND, 1.0f32.to_bits()),
            (rs::FOGDENSITY, 1.0f32.to_bits()),
            (rs::STENCILFAIL, 1),           // keep
            (rs::STENCILZFAIL, 1),
            (rs::STENCILPASS, 1),
            (rs::STENCILFUNC, crate::abi::cmp::ALWAYS),
            (rs::STENCILMASK, !0),
            (rs::STENCILWRITEMASK, !0),
            (rs::TEXTUREFACTOR, !0),
            (rs::CLIPPING, 1),
            (rs::LIGHTING, 1),
            (rs::COLORVERTEX, 1),
            (rs::LOCALVIEWER, 1),
            (rs::DIFFUSEMATERIALSOURCE, 1), // color1
            (rs::SPECULARMATERIALSOURCE, 2),// color2
            (rs::POINTSIZE, 1.0f32.to_bits()),
            (rs::POINTSIZE_MIN, 1.0f32.to_bits()),
            (rs::POINTSCALE_A, 1.0f32.to_bits()),
            (rs::MULTISAMPLEANTIALIAS, 1),
            (rs::MULTISAMPLEMASK, !0),
            (rs::POINTSIZE_MAX, 64.0f32.to_bits()),
            (rs::COLORWRITEENABLE, 0xf),
            (rs::BLENDOP, 1),               // add
            (rs::CCW_STENCILFAIL, 1),
            (rs::CCW_STENCILZFAIL, 1),
            (rs::CCW_STENCILPASS, 1),
            (rs::CCW_STENCILFUNC, crate::abi::cmp::ALWAYS),
            (rs::COLORWRITEENABLE1, 0xf),
            (rs::COLORWRITEENABLE2, 0xf),
            (rs::COLORWRITEENABLE3, 0xf),
            (rs::BLENDFACTOR, !0),
            (rs::SRCBLENDALPHA, 2),
            (rs::DESTBLENDALPHA, 1),
            (rs::BLENDOPALPHA, 1),
        ] {
            self.rs[state_id as usize] = value;
        }

        for sampler in &mut self.sampler_states {
            sampler[samp::ADDRESSU as usize] = 1; // wrap
            sampler[samp::ADDRESSV as usize] = 1;
            sampler[samp::ADDRESSW as usize] = 1;
            sampler[samp::MAGFILTER as usize] = 1; // point
            sampler[samp::MINFILTER as usize] = 1;
            sampler[samp::MAXANISOTROPY as usize] = 1;
        }
    }

    /// Drops every object binding held by this state. Used at teardown and
    /// by state-block destruction; returns the state to "nothing bound".
    pub fn unbind_all(&mut self) {
        use crate::unknown::bind_slot;

        bind_slot(&mut self.vs, None);
        bind_slot(&mut self.ps, None);
        bind_slot(&mut self.vdecl, None);
        bind_slot(&mut self.idxbuf, None);
        for slot in &mut self.streams {
            bind_slot(slot, None);
        }
        for slot in &mut self.textures {
            bind_slot(slot, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::rs;

    #[test]
    fn rs_dirty_words_cover_exactly_the_table() {
        let mut changes = StateChanges::default();
        changes.mark_all_rs();
        let total: u32 = changes.rs.iter().map(|w| w.count_ones()).sum();
        assert_eq!(total as usize, RS_COUNT);
    }

    #[test]
    fn mark_rs_sets_the_right_bit() {
        let mut changes = StateChanges::default();
        changes.mark_rs(rs::ZENABLE);
        changes.mark_rs(rs::BLENDOPALPHA);
        assert!(changes.rs_marked(rs::ZENABLE));
        assert!(changes.rs_marked(rs::BLENDOPALPHA));
        assert!(!changes.rs_marked(rs::ZFUNC));
    }

    #[test]
    fn defaults_cover_the_concrete_scenario_states() {
        let mut state = DeviceState::new(8);
        state.set_defaults();
        assert_eq!(state.rs[rs::ZENABLE as usize], 1);
        assert_eq!(state.rs[rs::ZFUNC as usize], crate::abi::cmp::LESSEQUAL);
        assert_eq!(state.stream_freq, [1; MAX_STREAMS]);
    }
}
