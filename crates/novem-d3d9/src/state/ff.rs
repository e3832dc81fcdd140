//! Fixed-function state: material, lights, transforms, texture stages.
//!
//! Lights and transforms are variable-length: applications address them by
//! sparse index and the arrays grow on first touch. Grown-past light slots
//! are marked with the `INVALID` sentinel kind so later copies can tell
//! "slot exists but was never defined" from a real light; grown-past
//! transform slots are identity-filled.

use crate::abi::{light, ts, Light, Material, Matrix};
use crate::error::{user_assert, D3dError, D3dResult};
use crate::limits::{
    MAX_LIGHTS, MAX_LIGHTS_ACTIVE, MAX_TEXTURE_STAGES, TEXTURE_STAGE_STATE_COUNT,
    TEXTURE_STAGE_STATE_WORDS, TRANSFORM_WORDS,
};

/// Maps a raw transform-state id onto the dense transform array index.
/// Returns `None` for ids outside the D3D9 encoding.
pub fn transform_index(state: u32) -> Option<usize> {
    match state {
        ts::VIEW => Some(0),
        ts::PROJECTION => Some(1),
        ts::TEXTURE0..=ts::TEXTURE7 => Some(2 + (state - ts::TEXTURE0) as usize),
        s if (ts::WORLD..ts::WORLD + 256).contains(&s) => Some(10 + (s - ts::WORLD) as usize),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct FixedFunctionState {
    pub material: Material,
    /// Sparse-grown light array; slots past the last defined index hold the
    /// `INVALID` sentinel.
    pub lights: Vec<Light>,
    /// Indices of enabled lights, in enable order, at most
    /// [`MAX_LIGHTS_ACTIVE`].
    pub active_lights: Vec<u32>,
    /// Dense transform array, grown on demand (see [`transform_index`]).
    pub transforms: Vec<Matrix>,
    pub tex_stage: [[u32; TEXTURE_STAGE_STATE_COUNT]; MAX_TEXTURE_STAGES],
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            material: Material::default(),
            lights: Vec::default(),
            active_lights: Vec::default(),
            transforms: Vec::default(),
            tex_stage: [[0u32; TEXTURE_STAGE_STATE_COUNT]; MAX_TEXTURE_STAGES],
        }
    }
}

impl FixedFunctionState {
    /// Reads the transform for `state`, defaulting to identity when the
    /// array has not grown that far.
    pub fn transform(&self, state: u32) -> Matrix {
        transform_index(state)
            .and_then(|i| self.transforms.get(i).copied())
            .unwrap_or(Matrix::IDENTITY)
    }

    /// Writable access to the transform for `state`, growing the array
    /// (identity-filled) as needed. `None` for an invalid id.
    pub fn transform_mut(&mut self, state: u32) -> Option<&mut Matrix> {
        let index = transform_index(state)?;
        if index >= self.transforms.len() {
            self.transforms.resize(index + 1, Matrix::IDENTITY);
        }
        Some(&mut self.transforms[index])
    }

    /// Grows the light array to `len` slots, sentinel-marking the new tail.
    pub fn grow_lights(&mut self, len: usize) {
        if len > self.lights.len() {
            self.lights.resize(
                len,
                Light {
                    kind: light::INVALID,
                    ..Light::default()
                },
            );
        }
    }

    /// Defines (or redefines) the light at `index`, growing the array.
    /// Spot lights with `theta > phi` are clamped rather than rejected.
    pub fn set_light(&mut self, index: u32, light_data: &Light) -> D3dResult<()> {
        user_assert!(index < MAX_LIGHTS, D3dError::InvalidCall);
        self.grow_lights(index as usize + 1);
        let slot = &mut self.lights[index as usize];
        *slot = *light_data;
        if light_data.kind == light::SPOT && light_data.theta >= light_data.phi {
            slot.theta = slot.phi;
        }
        Ok(())
    }

    /// Whether `index` holds a defined light.
    pub fn light_defined(&self, index: u32) -> bool {
        self.lights
            .get(index as usize)
            .is_some_and(|l| l.kind != light::INVALID)
    }

    /// Toggles a light on the active list. The light must already exist.
    /// Enabling is idempotent; disabling compacts the list preserving
    /// enable order.
    pub fn light_enable(&mut self, index: u32, enable: bool) -> D3dResult<()> {
        user_assert!((index as usize) < self.lights.len(), D3dError::InvalidCall);

        let pos = self.active_lights.iter().position(|&i| i == index);
        if enable {
            if pos.is_some() {
                return Ok(());
            }
            user_assert!(
                self.active_lights.len() < MAX_LIGHTS_ACTIVE,
                D3dError::InvalidCall
            );
            self.active_lights.push(index);
        } else if let Some(pos) = pos {
            self.active_lights.remove(pos);
        }
        Ok(())
    }

    pub fn light_enabled(&self, index: u32) -> bool {
        self.active_lights.contains(&index)
    }
}

/// Dirty tracking for the fixed-function block. The transform mask is
/// indexed by raw transform-state id (world matrices at 256+n), matching
/// the application-facing encoding rather than the dense array.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedFunctionChanges {
    pub transform: [u32; TRANSFORM_WORDS],
    pub tex_stage: [[u32; TEXTURE_STAGE_STATE_WORDS]; MAX_TEXTURE_STAGES],
}

impl FixedFunctionChanges {
    pub fn mark_transform(&mut self, state: u32) {
        let word = (state / 32) as usize;
        if word < TRANSFORM_WORDS {
            self.transform[word] |= 1 << (state % 32);
        }
    }

    pub fn transform_marked(&self, state: u32) -> bool {
        let word = (state / 32) as usize;
        word < TRANSFORM_WORDS && self.transform[word] & (1 << (state % 32)) != 0
    }

    pub fn mark_tex_stage(&mut self, stage: usize, state: u32) {
        self.tex_stage[stage][(state / 32) as usize] |= 1 << (state % 32);
    }

    pub fn mark_all_tex_stages(&mut self) {
        for stage in &mut self.tex_stage {
            for word in stage.iter_mut() {
                *word = !0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_index_covers_the_d3d_encoding() {
        assert_eq!(transform_index(ts::VIEW), Some(0));
        assert_eq!(transform_index(ts::PROJECTION), Some(1));
        assert_eq!(transform_index(ts::TEXTURE0), Some(2));
        assert_eq!(transform_index(ts::TEXTURE7), Some(9));
        assert_eq!(transform_index(ts::world_matrix(0)), Some(10));
        assert_eq!(transform_index(ts::world_matrix(255)), Some(265));
        assert_eq!(transform_index(0), None);
        assert_eq!(transform_index(24), None);
    }

    #[test]
    fn transforms_grow_identity_filled() {
        let mut ff = FixedFunctionState::default();
        assert_eq!(ff.transform(ts::world_matrix(3)), Matrix::IDENTITY);

        let m = ff.transform_mut(ts::world_matrix(3)).unwrap();
        m.m[3][0] = 5.0;
        assert_eq!(ff.transforms.len(), 14);
        assert_eq!(ff.transform(ts::world_matrix(2)), Matrix::IDENTITY);
        assert_eq!(ff.transform(ts::world_matrix(3)).m[3][0], 5.0);
    }

    #[test]
    fn sparse_set_light_sentinels_the_gap() {
        let mut ff = FixedFunctionState::default();
        let light_data = Light {
            kind: light::POINT,
            ..Light::default()
        };
        ff.set_light(4, &light_data).unwrap();
        assert_eq!(ff.lights.len(), 5);
        for i in 0..4 {
            assert_eq!(ff.lights[i].kind, light::INVALID);
            assert!(!ff.light_defined(i as u32));
        }
        assert!(ff.light_defined(4));
    }

    #[test]
    fn spot_theta_clamps_to_phi() {
        let mut ff = FixedFunctionState::default();
        let spot = Light {
            kind: light::SPOT,
            theta: 2.0,
            phi: 1.0,
            ..Light::default()
        };
        ff.set_light(0, &spot).unwrap();
        assert_eq!(ff.lights[0].theta, 1.0);
    }

    #[test]
    fn light_enable_requires_existing_light_and_compacts() {
        let mut ff = FixedFunctionState::default();
        assert_eq!(ff.light_enable(0, true), Err(D3dError::InvalidCall));

        for i in 0..3 {
            ff.set_light(i, &Light::default_directional()).unwrap();
            ff.light_enable(i, true).unwrap();
        }
        ff.light_enable(1, true).unwrap(); // idempotent
        assert_eq!(ff.active_lights, vec![0, 1, 2]);

        ff.light_enable(1, false).unwrap();
        assert_eq!(ff.active_lights, vec![0, 2]);
        ff.light_enable(1, false).unwrap(); // disabling again is a no-op
        assert_eq!(ff.active_lights, vec![0, 2]);
    }

    #[test]
    fn active_light_list_is_capped() {
        let mut ff = FixedFunctionState::default();
        for i in 0..=MAX_LIGHTS_ACTIVE as u32 {
            ff.set_light(i, &Light::default_directional()).unwrap();
        }
        for i in 0..MAX_LIGHTS_ACTIVE as u32 {
            ff.light_enable(i, true).unwrap();
        }
        assert_eq!(
            ff.light_enable(MAX_LIGHTS_ACTIVE as u32, true),
            Err(D3dError::InvalidCall)
        );
    }
}
