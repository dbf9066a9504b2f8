use std::f32::consts::PI;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Centre frequencies of the delta, theta, alpha, beta and gamma bands (Hz).
const BAND_FREQS: [f32; 5] = [2.5, 6.0, 10.0, 20.0, 40.0];

// Band weights by scalp region, repeated every 8 channels.
const REGION_WEIGHTS: [[f32; 5]; 4] = [
    [3.0, 1.5, 0.8, 0.4, 0.1], // frontal, more delta/theta
    [2.0, 1.2, 1.5, 0.6, 0.1], // central
    [1.5, 1.0, 2.5, 0.7, 0.1], // parietal, stronger alpha
    [1.2, 0.8, 3.0, 0.5, 0.1], // occipital, strongest alpha
];

/// Peak amplitude of a unit band weight, in volts.
const BAND_AMPLITUDE_V: f32 = 10e-6;

/// A generator for EEG-like signals in volts, one oscillator bank per channel.
#[derive(Debug, Clone)]
pub struct EegGenerator {
    sample_rate: u32,
    phases: Vec<[f32; 5]>,
    weights: Vec<[f32; 5]>,
    line_noise_phase: Vec<f32>,
    line_noise_amplitude: Vec<f32>,
    rng: StdRng,
}

impl EegGenerator {
    pub fn new(sample_rate: u32, num_channels: usize, seed: u64) -> Self {
        debug!(
            "Initializing EEG generator: {} channels at {} Hz",
            num_channels, sample_rate
        );
        let mut rng = StdRng::seed_from_u64(seed);

        let phases = (0..num_channels)
            .map(|_| std::array::from_fn(|_| rng.gen::<f32>() * 2.0 * PI))
            .collect();
        let weights = (0..num_channels)
            .map(|i| REGION_WEIGHTS[(i % 8) / 2])
            .collect();
        let line_noise_phase = (0..num_channels).map(|_| rng.gen::<f32>() * 2.0 * PI).collect();
        let line_noise_amplitude = (0..num_channels).map(|_| rng.gen_range(0.2..0.7)).collect();

        Self {
            sample_rate,
            phases,
            weights,
            line_noise_phase,
            line_noise_amplitude,
            rng,
        }
    }

    fn noise(&mut self) -> f32 {
        self.rng.sample::<f32, _>(StandardNormal) * 0.1
    }

    /// Advances channel `channel` by one sample period and returns its value in volts.
    pub fn next_sample(&mut self, channel: usize) -> f32 {
        let rate = self.sample_rate.max(1) as f32;
        let mut signal = 0.0;

        for (band, freq) in BAND_FREQS.iter().enumerate() {
            let phase = &mut self.phases[channel][band];
            *phase = (*phase + 2.0 * PI * freq / rate) % (2.0 * PI);
            signal += phase.sin() * self.weights[channel][band];
        }

        let line = &mut self.line_noise_phase[channel];
        *line = (*line + 2.0 * PI * 50.0 / rate) % (2.0 * PI);
        signal += line.sin() * self.line_noise_amplitude[channel];

        signal += self.noise();
        signal * BAND_AMPLITUDE_V
    }

    /// A slowly varying auxiliary reading (e.g. a temperature probe) in volts.
    pub fn aux_sample(&mut self, t_secs: f32) -> f32 {
        0.5 + 0.05 * (2.0 * PI * 0.1 * t_secs).sin() + self.noise() * 1e-3
    }

    /// An electrode impedance in kOhm.
    pub fn impedance_sample(&mut self, channel: usize) -> f32 {
        5.0 + channel as f32 * 0.5 + self.noise().abs()
    }
}
