//! The state diff/copy engine.
//!
//! `copy_state` moves exactly the entries a mask marks dirty from one state
//! record into another. Both state-block directions run through it:
//!
//! - capture: `dst` = block, `src` = live state, `apply = false`. The
//!   block's own tracking is the mask and is left untouched.
//! - apply:   `dst` = live state, `src` = block, `apply = true`. The copy
//!   additionally marks `dst.changed`, because the live device's context
//!   must later be told what to resubmit.
//!
//! `copy_state_all` ignores fine-grained masks: an ALL-kind block always
//! means "everything", and walking dirty bits would only add work.
//!
//! Float and int constant registers copy at vec4 granularity (4 scalars per
//! register); bool registers are a single scalar each. The asymmetry is
//! load-bearing; register arithmetic below multiplies by 4 exactly where
//! the banks do.

use crate::abi::{light, ts, Light, Matrix};
use crate::limits::{
    MAX_CLIP_PLANES, MAX_SAMPLERS, MAX_STREAMS, RS_WORDS, SAMPLER_STATE_COUNT, TRANSFORM_WORDS,
};
use crate::range::{RangeList, RangePool};
use crate::state::{DeviceState, StateChanges, StateGroup};
use crate::unknown::bind_slot;

/// Maps a dense transform-array index back to its transform-state id.
fn transform_state_from_index(index: usize) -> u32 {
    match index {
        0 => ts::VIEW,
        1 => ts::PROJECTION,
        2..=9 => ts::TEXTURE0 + (index as u32 - 2),
        _ => ts::WORLD + (index as u32 - 10),
    }
}

fn copy_ranges(
    dst: &mut [f32],
    src: &[f32],
    list: &RangeList,
    pool: &RangePool,
    scalars_per_register: usize,
) -> Vec<(u32, u32)> {
    let spans: Vec<(u32, u32)> = pool.iter(list).collect();
    for &(begin, end) in &spans {
        let lo = begin as usize * scalars_per_register;
        let hi = end as usize * scalars_per_register;
        dst[lo..hi].copy_from_slice(&src[lo..hi]);
    }
    spans
}

fn copy_ranges_i(dst: &mut [i32], src: &[i32], list: &RangeList, pool: &RangePool) -> Vec<(u32, u32)> {
    let spans: Vec<(u32, u32)> = pool.iter(list).collect();
    for &(begin, end) in &spans {
        let lo = begin as usize * 4;
        let hi = end as usize * 4;
        dst[lo..hi].copy_from_slice(&src[lo..hi]);
    }
    spans
}

fn copy_ranges_b(dst: &mut [u32], src: &[u32], list: &RangeList, pool: &RangePool) -> Vec<(u32, u32)> {
    let spans: Vec<(u32, u32)> = pool.iter(list).collect();
    for &(begin, end) in &spans {
        dst[begin as usize..end as usize].copy_from_slice(&src[begin as usize..end as usize]);
    }
    spans
}

fn reinsert(pool: &mut RangePool, dst: &mut RangeList, spans: &[(u32, u32)]) {
    for &(begin, end) in spans {
        pool.insert(dst, begin, end);
    }
}

/// Copies the entries `mask` marks from `src` into `dst`.
///
/// `mask` must be a snapshot of the state block's tracking (callers copy it
/// out first; `StateChanges` is plain data). With `apply` set, `dst.changed`
/// accumulates everything copied.
pub fn copy_state(
    dst: &mut DeviceState,
    src: &DeviceState,
    mask: &StateChanges,
    apply: bool,
    pool: &mut RangePool,
) {
    if mask.group.contains(StateGroup::VIEWPORT) {
        dst.viewport = src.viewport;
    }
    if mask.group.contains(StateGroup::SCISSOR) {
        dst.scissor = src.scissor;
    }
    if mask.group.contains(StateGroup::VS) {
        bind_slot(&mut dst.vs, src.vs.as_ref());
    }
    if mask.group.contains(StateGroup::PS) {
        bind_slot(&mut dst.ps, src.ps.as_ref());
    }

    if mask.group.contains(StateGroup::VS_CONST) {
        let f = copy_ranges(&mut dst.vs_const_f, &src.vs_const_f, &mask.vs_const_f, pool, 4);
        let i = copy_ranges_i(&mut dst.vs_const_i, &src.vs_const_i, &mask.vs_const_i, pool);
        let b = copy_ranges_b(&mut dst.vs_const_b, &src.vs_const_b, &mask.vs_const_b, pool);
        if apply {
            reinsert(pool, &mut dst.changed.vs_const_f, &f);
            reinsert(pool, &mut dst.changed.vs_const_i, &i);
            reinsert(pool, &mut dst.changed.vs_const_b, &b);
        }
    }

    if mask.group.contains(StateGroup::PS_CONST) {
        let f = copy_ranges(&mut dst.ps_const_f, &src.ps_const_f, &mask.ps_const_f, pool, 4);
        if apply {
            reinsert(pool, &mut dst.changed.ps_const_f, &f);
        }
        let mut bits = u32::from(mask.ps_const_i);
        while bits != 0 {
            let reg = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            dst.ps_const_i[reg * 4..reg * 4 + 4]
                .copy_from_slice(&src.ps_const_i[reg * 4..reg * 4 + 4]);
        }
        let mut bits = u32::from(mask.ps_const_b);
        while bits != 0 {
            let reg = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            dst.ps_const_b[reg] = src.ps_const_b[reg];
        }
        if apply {
            dst.changed.ps_const_i |= mask.ps_const_i;
            dst.changed.ps_const_b |= mask.ps_const_b;
        }
    }

    for word in 0..RS_WORDS {
        let mut bits = mask.rs[word];
        while bits != 0 {
            let bit = bits.trailing_zeros();
            bits &= bits - 1;
            let state_id = (word * 32) as usize + bit as usize;
            dst.rs[state_id] = src.rs[state_id];
        }
        if apply {
            dst.changed.rs[word] |= mask.rs[word];
        }
    }

    let mut ucp_bits = mask.ucp;
    while ucp_bits != 0 {
        let index = ucp_bits.trailing_zeros() as usize;
        ucp_bits &= ucp_bits - 1;
        dst.clip_planes[index] = src.clip_planes[index];
    }
    if apply {
        dst.changed.ucp |= mask.ucp;
    }

    if mask.group.contains(StateGroup::SAMPLER) {
        for sampler in 0..MAX_SAMPLERS {
            let mut bits = u32::from(mask.sampler[sampler]);
            while bits != 0 {
                let state_id = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                dst.sampler_states[sampler][state_id] = src.sampler_states[sampler][state_id];
            }
            if apply {
                dst.changed.sampler[sampler] |= mask.sampler[sampler];
            }
        }
    }

    if mask.group.contains(StateGroup::IDXBUF) {
        bind_slot(&mut dst.idxbuf, src.idxbuf.as_ref());
    }

    let mut stream_bits = mask.vtxbuf;
    while stream_bits != 0 {
        let stream = stream_bits.trailing_zeros() as usize;
        stream_bits &= stream_bits - 1;
        dst.stream_stride[stream] = src.stream_stride[stream];
        dst.stream_offset[stream] = src.stream_offset[stream];
        bind_slot(&mut dst.streams[stream], src.streams[stream].as_ref());
    }
    let mut freq_bits = mask.stream_freq;
    while freq_bits != 0 {
        let stream = freq_bits.trailing_zeros() as usize;
        freq_bits &= freq_bits - 1;
        dst.stream_freq[stream] = src.stream_freq[stream];
    }
    if apply {
        dst.changed.vtxbuf |= mask.vtxbuf;
        dst.changed.stream_freq |= mask.stream_freq;
    }

    let mut texture_bits = mask.texture;
    while texture_bits != 0 {
        let sampler = texture_bits.trailing_zeros() as usize;
        texture_bits &= texture_bits - 1;
        bind_slot(&mut dst.textures[sampler], src.textures[sampler].as_ref());
    }
    if apply {
        dst.changed.texture |= mask.texture;
    }

    if mask.group.intersects(StateGroup::FF) {
        copy_fixed_function(dst, src, mask, apply);
    }

    if apply {
        dst.changed.group |= mask.group;
        dst.changed.ff.transform = merge_words(&dst.changed.ff.transform, &mask.ff.transform);
        for (stage, words) in mask.ff.tex_stage.iter().enumerate() {
            for (word, bits) in words.iter().enumerate() {
                dst.changed.ff.tex_stage[stage][word] |= bits;
            }
        }
    }
}

fn merge_words<const N: usize>(a: &[u32; N], b: &[u32; N]) -> [u32; N] {
    std::array::from_fn(|i| a[i] | b[i])
}

fn copy_fixed_function(dst: &mut DeviceState, src: &DeviceState, mask: &StateChanges, apply: bool) {
    if mask.group.contains(StateGroup::FF_MATERIAL) {
        dst.ff.material = src.ff.material;
    }

    if mask.group.contains(StateGroup::FF_PS_CONSTS) {
        for stage in 0..dst.ff.tex_stage.len() {
            for (word, &bits) in mask.ff.tex_stage[stage].iter().enumerate() {
                let mut bits = bits;
                while bits != 0 {
                    let bit = bits.trailing_zeros();
                    bits &= bits - 1;
                    let state_id = (word * 32) + bit as usize;
                    if state_id < dst.ff.tex_stage[stage].len() {
                        dst.ff.tex_stage[stage][state_id] = src.ff.tex_stage[stage][state_id];
                    }
                }
            }
        }
    }

    if mask.group.contains(StateGroup::FF_LIGHTING) {
        // Either side may have grown lights the other never saw: new lights
        // defined on the device since the block's capture, or recorded in
        // the block and since unknown to the device. Grow to the larger
        // count, then copy only slots the *mask* side actually recorded;
        // sentinel slots must not clobber unrelated lights.
        let num_lights = dst.ff.lights.len().max(src.ff.lights.len());
        dst.ff.grow_lights(num_lights);
        let invalid = Light {
            kind: light::INVALID,
            ..Light::default()
        };
        for i in 0..num_lights {
            let src_light = src.ff.lights.get(i).copied().unwrap_or(invalid);
            let recorded = if apply {
                src_light.kind != light::INVALID
            } else {
                dst.ff.lights[i].kind != light::INVALID
            };
            if recorded {
                dst.ff.lights[i] = src_light;
            }
        }
        dst.ff.active_lights = src.ff.active_lights.clone();
    }

    if mask.group.contains(StateGroup::FF_VSTRANSF) {
        for word in 0..TRANSFORM_WORDS {
            let mut bits = mask.ff.transform[word];
            while bits != 0 {
                let bit = bits.trailing_zeros();
                bits &= bits - 1;
                let state = (word * 32) as u32 + bit;
                let value = src.ff.transform(state);
                if let Some(slot) = dst.ff.transform_mut(state) {
                    *slot = value;
                }
            }
        }
    }
}

/// Unconditional whole-state copy, for ALL-kind blocks. `apply` marks the
/// destination's tracking for every category, the same way the masked copy
/// would with a fully seeded mask.
pub fn copy_state_all(dst: &mut DeviceState, src: &DeviceState, apply: bool, pool: &mut RangePool) {
    dst.viewport = src.viewport;
    dst.scissor = src.scissor;
    bind_slot(&mut dst.vs, src.vs.as_ref());
    bind_slot(&mut dst.ps, src.ps.as_ref());

    dst.vs_const_f.copy_from_slice(&src.vs_const_f);
    dst.vs_const_i.copy_from_slice(&src.vs_const_i);
    dst.vs_const_b.copy_from_slice(&src.vs_const_b);
    dst.ps_const_f.copy_from_slice(&src.ps_const_f);
    dst.ps_const_i.copy_from_slice(&src.ps_const_i);
    dst.ps_const_b.copy_from_slice(&src.ps_const_b);

    dst.rs.copy_from_slice(&src.rs);
    dst.sampler_states = src.sampler_states;
    dst.clip_planes = src.clip_planes;

    for stream in 0..MAX_STREAMS {
        dst.stream_stride[stream] = src.stream_stride[stream];
        dst.stream_offset[stream] = src.stream_offset[stream];
        dst.stream_freq[stream] = src.stream_freq[stream];
        bind_slot(&mut dst.streams[stream], src.streams[stream].as_ref());
    }
    bind_slot(&mut dst.idxbuf, src.idxbuf.as_ref());
    for sampler in 0..MAX_SAMPLERS {
        bind_slot(&mut dst.textures[sampler], src.textures[sampler].as_ref());
    }

    dst.ff.material = src.ff.material;
    dst.ff.tex_stage = src.ff.tex_stage;

    dst.ff.grow_lights(src.ff.lights.len());
    dst.ff.lights[..src.ff.lights.len()].copy_from_slice(&src.ff.lights);
    dst.ff.active_lights = src.ff.active_lights.clone();

    if dst.ff.transforms.len() < src.ff.transforms.len() {
        dst.ff.transforms.resize(src.ff.transforms.len(), Matrix::IDENTITY);
    }
    dst.ff.transforms[..src.ff.transforms.len()].copy_from_slice(&src.ff.transforms);

    if apply {
        let changed = &mut dst.changed;
        changed.group |= StateGroup::all();
        changed.mark_all_rs();
        for sampler in &mut changed.sampler {
            *sampler = ((1 << SAMPLER_STATE_COUNT) - 2) as u16;
        }
        changed.vtxbuf = (1 << MAX_STREAMS) - 1;
        changed.stream_freq = changed.vtxbuf;
        changed.ucp = (1 << MAX_CLIP_PLANES) - 1;
        changed.texture = (1 << MAX_SAMPLERS) - 1;
        changed.ff.mark_all_tex_stages();
        for i in 0..src.ff.transforms.len() {
            changed.ff.mark_transform(transform_state_from_index(i));
        }

        let vs_f_regs = (dst.vs_const_f.len() / 4) as u32;
        let ps_f_regs = (dst.ps_const_f.len() / 4) as u32;
        let i_regs = (dst.vs_const_i.len() / 4) as u32;
        let b_regs = dst.vs_const_b.len() as u32;
        pool.insert(&mut changed.vs_const_f, 0, vs_f_regs);
        pool.insert(&mut changed.vs_const_i, 0, i_regs);
        pool.insert(&mut changed.vs_const_b, 0, b_regs);
        pool.insert(&mut changed.ps_const_f, 0, ps_f_regs);
        changed.ps_const_i = !0;
        changed.ps_const_b = !0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::rs;

    fn fresh(n: usize) -> DeviceState {
        DeviceState::new(n)
    }

    #[test]
    fn float_constant_ranges_copy_exactly_the_marked_registers() {
        let mut pool = RangePool::new();
        let mut src = fresh(16);
        let mut dst = fresh(16);
        for (i, v) in src.vs_const_f.iter_mut().enumerate() {
            *v = i as f32;
        }

        let mut mask = StateChanges {
            group: StateGroup::VS_CONST,
            ..StateChanges::default()
        };
        pool.insert(&mut mask.vs_const_f, 2, 5);
        pool.insert(&mut mask.vs_const_f, 10, 12);

        copy_state(&mut dst, &src, &mask.clone(), false, &mut pool);

        for reg in 0..16 {
            let copied = (2..5).contains(&reg) || (10..12).contains(&reg);
            for c in 0..4 {
                let idx = reg * 4 + c;
                let expect = if copied { idx as f32 } else { 0.0 };
                assert_eq!(dst.vs_const_f[idx], expect, "register {reg} scalar {c}");
            }
        }
    }

    #[test]
    fn bool_constants_copy_per_register_not_per_vec4() {
        let mut pool = RangePool::new();
        let mut src = fresh(16);
        let mut dst = fresh(16);
        src.vs_const_b = (0..src.vs_const_b.len() as u32).collect();

        let mut mask = StateChanges {
            group: StateGroup::VS_CONST,
            ..StateChanges::default()
        };
        pool.insert(&mut mask.vs_const_b, 3, 6);

        copy_state(&mut dst, &src, &mask.clone(), false, &mut pool);
        assert_eq!(dst.vs_const_b[2], 0);
        assert_eq!(&dst.vs_const_b[3..6], &[3, 4, 5]);
        assert_eq!(dst.vs_const_b[6], 0);
    }

    #[test]
    fn masked_render_states_copy_without_touching_others() {
        let mut pool = RangePool::new();
        let mut src = fresh(8);
        let mut dst = fresh(8);
        src.rs[rs::ZENABLE as usize] = 1;
        src.rs[rs::ZFUNC as usize] = 7;
        dst.rs[rs::ZFUNC as usize] = 3;

        let mut mask = StateChanges::default();
        mask.mark_rs(rs::ZENABLE);

        copy_state(&mut dst, &src, &mask.clone(), false, &mut pool);
        assert_eq!(dst.rs[rs::ZENABLE as usize], 1);
        assert_eq!(dst.rs[rs::ZFUNC as usize], 3, "unmarked state clobbered");
    }

    #[test]
    fn apply_accumulates_destination_tracking() {
        let mut pool = RangePool::new();
        let src = fresh(8);
        let mut dst = fresh(8);

        let mut mask = StateChanges::default();
        mask.mark_rs(rs::CULLMODE);
        mask.group |= StateGroup::VIEWPORT;

        copy_state(&mut dst, &src, &mask.clone(), true, &mut pool);
        assert!(dst.changed.rs_marked(rs::CULLMODE));
        assert!(dst.changed.group.contains(StateGroup::VIEWPORT));

        let mut capture_dst = fresh(8);
        copy_state(&mut capture_dst, &src, &mask.clone(), false, &mut pool);
        assert!(!capture_dst.changed.rs_marked(rs::CULLMODE));
        assert!(capture_dst.changed.group.is_empty());
    }

    #[test]
    fn light_growth_preserves_lower_indices_and_sentinels_new_slots() {
        let mut pool = RangePool::new();
        let mut src = fresh(8);
        let mut dst = fresh(8);

        // Block (dst) recorded one light; the device grew two more since.
        let mut recorded = Light::default_directional();
        recorded.range = 1.0;
        dst.ff.set_light(0, &recorded).unwrap();
        src.ff.set_light(0, &Light::default_directional()).unwrap();
        src.ff
            .set_light(2, &Light { kind: light::POINT, ..Light::default() })
            .unwrap();

        let mask = StateChanges {
            group: StateGroup::FF_LIGHTING,
            ..StateChanges::default()
        };

        // Capture: only slot 0 (recorded in the block) is refreshed.
        copy_state(&mut dst, &src, &mask.clone(), false, &mut pool);
        assert_eq!(dst.ff.lights.len(), 3);
        assert_eq!(dst.ff.lights[0].range, 0.0, "slot 0 recaptured from src");
        assert_eq!(dst.ff.lights[1].kind, light::INVALID);
        assert_eq!(dst.ff.lights[2].kind, light::INVALID, "unrecorded slot untouched");
    }

    #[test]
    fn whole_state_copy_round_trips() {
        let mut pool = RangePool::new();
        let mut src = fresh(8);
        src.set_defaults();
        src.rs[rs::ZFUNC as usize] = 5;
        src.vs_const_f[12] = 2.5;
        src.ff.set_light(1, &Light::default_directional()).unwrap();

        let mut dst = fresh(8);
        copy_state_all(&mut dst, &src, false, &mut pool);
        assert_eq!(dst.rs, src.rs);
        assert_eq!(dst.vs_const_f, src.vs_const_f);
        assert_eq!(dst.ff.lights.len(), src.ff.lights.len());
    }
}
