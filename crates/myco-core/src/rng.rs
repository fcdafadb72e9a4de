//! 32-bit linear congruential generator shared with the WGSL kernels.
//!
//! Each walker or agent owns one of these so its sequence does not depend on
//! dispatch order. The constants match `lcg_next` in the compute shaders.

use serde::{Deserialize, Serialize};

const MULTIPLIER: u32 = 1_664_525;
const INCREMENT: u32 = 1_013_904_223;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Lcg(u32);

impl Lcg {
    #[must_use]
    pub const fn new(state: u32) -> Self {
        Self(state)
    }

    #[must_use]
    pub const fn state(self) -> u32 {
        self.0
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        self.0
    }

    /// Uniform float in `[0, 1)` from the top 24 bits.
    pub fn next_unit(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16_777_216.0
    }

    /// Uniform angle in `[0, 2π)`.
    pub fn next_angle(&mut self) -> f32 {
        self.next_unit() * std::f32::consts::TAU
    }
}

#[cfg(test)]
mod tests {
    use super::Lcg;

    #[test]
    fn sequence_matches_reference_constants() {
        let mut rng = Lcg::new(0);
        assert_eq!(rng.next_u32(), 1_013_904_223);
        assert_eq!(
            rng.next_u32(),
            1_013_904_223u32
                .wrapping_mul(1_664_525)
                .wrapping_add(1_013_904_223)
        );
    }

    #[test]
    fn unit_samples_stay_in_range() {
        let mut rng = Lcg::new(0xDEAD_BEEF);
        for _ in 0..10_000 {
            let u = rng.next_unit();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
