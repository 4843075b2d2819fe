use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rtstudy_core::{Condition, StimulusColor};

/// Every random decision the study makes goes through here.
pub trait Randomizer {
    /// Uniform random permutation in place.
    fn shuffle_conditions(&mut self, conditions: &mut [Condition]);

    /// Uniform draw from `lo..=hi`.
    fn draw_delay_secs(&mut self, lo: u32, hi: u32) -> u32;

    /// Uniform draw from a non-empty palette.
    fn draw_color(&mut self, palette: &[StimulusColor]) -> StimulusColor;
}

/// `Randomizer` over any `rand` generator.
#[derive(Debug, Clone)]
pub struct RandomDraws<R>(pub R);

impl RandomDraws<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Randomizer for RandomDraws<R> {
    fn shuffle_conditions(&mut self, conditions: &mut [Condition]) {
        conditions.shuffle(&mut self.0);
    }

    fn draw_delay_secs(&mut self, lo: u32, hi: u32) -> u32 {
        self.0.random_range(lo..=hi.max(lo))
    }

    fn draw_color(&mut self, palette: &[StimulusColor]) -> StimulusColor {
        palette[self.0.random_range(0..palette.len())]
    }
}
