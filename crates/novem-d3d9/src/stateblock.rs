//! Recorded state snapshots.
//!
//! A state block owns an independent `DeviceState` plus the dirty set
//! describing which slice of it is meaningful. Custom blocks accumulate
//! that set while they are the device's recording target; predefined kinds
//! (ALL / vertex / pixel) get it seeded up front and then capture
//! immediately. Capture and apply both run the shared diff/copy engine;
//! see `state::copy` for the direction conventions.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::abi::StateBlockKind;
use crate::limits::{MAX_CLIP_PLANES, MAX_CONST_B, MAX_CONST_I, MAX_PS_CONST_F, MAX_SAMPLERS, MAX_STREAMS};
use crate::range::RangePool;
use crate::state::{DeviceState, StateGroup};
use crate::unknown::{iid, InitialOwner, ObjectCore, Tag, Unknown};

#[derive(Debug)]
pub struct StateBlock9 {
    core: ObjectCore,
    kind: StateBlockKind,
    pool: Arc<Mutex<RangePool>>,
    state: Mutex<DeviceState>,
}

impl StateBlock9 {
    pub(crate) fn new(
        kind: StateBlockKind,
        pool: Arc<Mutex<RangePool>>,
        state: DeviceState,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::new(InitialOwner::Referenced, false),
            kind,
            pool,
            state: Mutex::new(state),
        })
    }

    pub fn kind(&self) -> StateBlockKind {
        self.kind
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }
}

impl Unknown for StateBlock9 {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn interfaces(&self) -> &'static [Tag] {
        &[iid::UNKNOWN, iid::STATE_BLOCK]
    }

    fn on_destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.unbind_all();
        let mut pool = self.pool.lock().unwrap();
        state.changed.release_ranges(&mut pool);
    }
}

/// Seeds the dirty set a predefined block kind captures. Mirrors the fixed
/// D3D9 tables: vertex state, pixel state, or the union plus every
/// remaining category for ALL.
pub(crate) fn seed_predefined_mask(
    state: &mut DeviceState,
    kind: StateBlockKind,
    device_light_count: usize,
    max_vs_const_f: u32,
    pool: &mut RangePool,
) {
    use crate::abi::{samp, PIXEL_RENDER_STATES, VERTEX_RENDER_STATES};

    let changed = &mut state.changed;
    changed.group |= StateGroup::SAMPLER;

    if matches!(kind, StateBlockKind::All | StateBlockKind::VertexState) {
        changed.group |=
            StateGroup::FF_LIGHTING | StateGroup::VS | StateGroup::VS_CONST | StateGroup::VDECL;
        for &state_id in VERTEX_RENDER_STATES {
            changed.mark_rs(state_id);
        }
        pool.insert(&mut changed.vs_const_f, 0, max_vs_const_f);
        pool.insert(&mut changed.vs_const_i, 0, MAX_CONST_I as u32);
        pool.insert(&mut changed.vs_const_b, 0, MAX_CONST_B as u32);
        for sampler in &mut changed.sampler {
            *sampler |= 1 << samp::DMAPOFFSET;
        }
        if device_light_count != 0 {
            // Zeroed slots (kind 0, not the sentinel) so every light the
            // device currently defines is captured.
            state.ff.lights = vec![Default::default(); device_light_count];
        }
    }

    let changed = &mut state.changed;
    if matches!(kind, StateBlockKind::All | StateBlockKind::PixelState) {
        changed.group |= StateGroup::PS | StateGroup::PS_CONST | StateGroup::FF_PS_CONSTS;
        for &state_id in PIXEL_RENDER_STATES {
            changed.mark_rs(state_id);
        }
        pool.insert(&mut changed.ps_const_f, 0, MAX_PS_CONST_F as u32);
        changed.ps_const_i = !0;
        changed.ps_const_b = !0;
        for sampler in &mut changed.sampler {
            // Every pixel-relevant sampler state: ids 1..=12.
            *sampler |= 0x1ffe;
        }
        changed.ff.mark_all_tex_stages();
    }

    if matches!(kind, StateBlockKind::All) {
        changed.group |= StateGroup::VIEWPORT
            | StateGroup::SCISSOR
            | StateGroup::IDXBUF
            | StateGroup::FF_MATERIAL
            | StateGroup::FF_VSTRANSF;
        changed.mark_all_rs();
        changed.vtxbuf = (1 << MAX_STREAMS) - 1;
        changed.stream_freq = changed.vtxbuf;
        changed.ucp = (1 << MAX_CLIP_PLANES) - 1;
        changed.texture = (1 << MAX_SAMPLERS) - 1;
        // View, projection, the eight texture matrices, and every world
        // matrix. The docs name only the first set; applications expect the
        // world matrices saved too.
        changed.ff.transform[0] = 0x00ff_000c;
        for word in 8..16 {
            changed.ff.transform[word] = !0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::rs;

    #[test]
    fn vertex_kind_seeds_vertex_states_only() {
        let mut pool = RangePool::new();
        let mut state = DeviceState::new(256);
        seed_predefined_mask(&mut state, StateBlockKind::VertexState, 0, 256, &mut pool);

        assert!(state.changed.rs_marked(rs::CULLMODE));
        assert!(state.changed.rs_marked(rs::LIGHTING));
        assert!(!state.changed.rs_marked(rs::ZENABLE));
        assert!(!state.changed.group.contains(StateGroup::PS));
        assert!(state.changed.group.contains(StateGroup::VS_CONST));
        assert_eq!(
            pool.iter(&state.changed.vs_const_f).collect::<Vec<_>>(),
            vec![(0, 256)]
        );
        assert!(state.changed.ps_const_f.is_empty());
    }

    #[test]
    fn pixel_kind_seeds_pixel_states_only() {
        let mut pool = RangePool::new();
        let mut state = DeviceState::new(256);
        seed_predefined_mask(&mut state, StateBlockKind::PixelState, 0, 256, &mut pool);

        assert!(state.changed.rs_marked(rs::ZENABLE));
        assert!(state.changed.rs_marked(rs::ALPHABLENDENABLE));
        assert!(!state.changed.rs_marked(rs::LIGHTING));
        assert_eq!(state.changed.ps_const_i, !0);
        assert_eq!(state.changed.sampler[0] & 0x1ffe, 0x1ffe);
        assert!(state.changed.vs_const_f.is_empty());
    }

    #[test]
    fn all_kind_seeds_everything() {
        let mut pool = RangePool::new();
        let mut state = DeviceState::new(256);
        seed_predefined_mask(&mut state, StateBlockKind::All, 2, 256, &mut pool);

        assert!(state.changed.rs_marked(rs::BLENDOPALPHA));
        assert_eq!(state.changed.vtxbuf, (1 << MAX_STREAMS) - 1);
        assert_eq!(state.changed.texture, (1 << MAX_SAMPLERS) - 1);
        assert_eq!(state.changed.ff.transform[0], 0x00ff_000c);
        assert_eq!(state.changed.ff.transform[8], !0);
        assert_eq!(state.ff.lights.len(), 2, "existing lights pre-allocated");
        assert!(state.changed.group.contains(StateGroup::VIEWPORT));
    }
}
