//! Per-source signal processing stages.
//!
//! Each source gets a fixed-order chain of stages before mixing:
//! - tab: low-shelf EQ -> peaking EQ -> compressor -> limiter -> gain
//! - mic: highpass -> presence peak -> compressor -> gain
//!
//! Stages operate on f32 samples in [-1.0, 1.0]; frames are converted from
//! i16 PCM at the chain boundary and clipped on the way back.

use tracing::debug;

use super::source::{AudioFrame, SourceKind};

/// One processing stage in a chain.
pub trait Stage: Send {
    fn process(&mut self, samples: &mut [f32]);
    fn label(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Gain
// ---------------------------------------------------------------------------

pub struct Gain {
    gain: f32,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl Stage for Gain {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s *= self.gain;
        }
    }

    fn label(&self) -> &'static str {
        "gain"
    }
}

// ---------------------------------------------------------------------------
// Biquad filters (RBJ cookbook coefficients)
// ---------------------------------------------------------------------------

pub struct Biquad {
    label: &'static str,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    fn from_coeffs(label: &'static str, b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            label,
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Second-order highpass.
    pub fn highpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let b0 = (1.0 + cos) / 2.0;
        let b1 = -(1.0 + cos);
        let b2 = (1.0 + cos) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos;
        let a2 = 1.0 - alpha;

        Self::from_coeffs("highpass", b0, b1, b2, a0, a1, a2)
    }

    /// Peaking EQ with gain in dB.
    pub fn peaking(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos;
        let a2 = 1.0 - alpha / a;

        Self::from_coeffs("peaking", b0, b1, b2, a0, a1, a2)
    }

    /// Low shelf with gain in dB (shelf slope 1).
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / 2.0 * (a + 1.0 / a).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let b0 = a * ((a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha);
        let b1 = 2.0 * a * ((a - 1.0) - (a + 1.0) * cos);
        let b2 = a * ((a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha);
        let a0 = (a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha;
        let a1 = -2.0 * ((a - 1.0) + (a + 1.0) * cos);
        let a2 = (a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha;

        Self::from_coeffs("low-shelf", b0, b1, b2, a0, a1, a2)
    }
}

impl Stage for Biquad {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let x = *s;
            let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
                - self.a1 * self.y1
                - self.a2 * self.y2;
            self.x2 = self.x1;
            self.x1 = x;
            self.y2 = self.y1;
            self.y1 = y;
            *s = y;
        }
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

// ---------------------------------------------------------------------------
// Dynamics compressor
// ---------------------------------------------------------------------------

/// Feed-forward compressor with a soft knee, operating in the dB domain.
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32,
}

impl Compressor {
    pub fn new(
        sample_rate: f32,
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_secs: f32,
        release_secs: f32,
    ) -> Self {
        Self {
            threshold_db,
            knee_db,
            ratio,
            attack_coeff: (-1.0 / (attack_secs * sample_rate)).exp(),
            release_coeff: (-1.0 / (release_secs * sample_rate)).exp(),
            envelope_db: 0.0,
        }
    }

    fn reduction_db(&self, level_db: f32) -> f32 {
        let half_knee = self.knee_db / 2.0;
        let over = level_db - self.threshold_db;

        if over <= -half_knee {
            0.0
        } else if over >= half_knee {
            over * (1.0 - 1.0 / self.ratio)
        } else {
            // Quadratic interpolation inside the knee.
            let t = over + half_knee;
            (1.0 - 1.0 / self.ratio) * t * t / (2.0 * self.knee_db)
        }
    }
}

impl Stage for Compressor {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let level_db = 20.0 * (s.abs() + 1e-10).log10();
            let target = self.reduction_db(level_db);

            let coeff = if target > self.envelope_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope_db = target + coeff * (self.envelope_db - target);

            *s *= 10f32.powf(-self.envelope_db / 20.0);
        }
    }

    fn label(&self) -> &'static str {
        "compressor"
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

/// Hard limiter: instant gain reduction above the ceiling, smoothed recovery.
pub struct Limiter {
    ceiling: f32,
    release_step: f32,
    gain: f32,
}

impl Limiter {
    pub fn new(sample_rate: f32, ceiling: f32, release_secs: f32) -> Self {
        Self {
            ceiling,
            release_step: 1.0 / (release_secs * sample_rate),
            gain: 1.0,
        }
    }
}

impl Stage for Limiter {
    fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let peak = s.abs();
            if peak * self.gain > self.ceiling && peak > 0.0 {
                self.gain = self.ceiling / peak;
            } else {
                self.gain = (self.gain + self.release_step).min(1.0);
            }
            *s *= self.gain;
        }
    }

    fn label(&self) -> &'static str {
        "limiter"
    }
}

// ---------------------------------------------------------------------------
// ProcessingChain
// ---------------------------------------------------------------------------

/// Tunable parameters for the default chains. Gains are configuration, not
/// constants; the rest are voicing defaults carried by the chain builders.
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    pub sample_rate: u32,
    pub gain: f32,
}

/// Ordered sequence of DSP stages bound to one source.
///
/// Chain order is fixed per source kind; it determines the audible
/// difference between the tab and mic signals in the monitored mix.
pub struct ProcessingChain {
    stages: Vec<Box<dyn Stage>>,
}

impl ProcessingChain {
    /// Build the default chain for a source kind.
    pub fn for_source(kind: SourceKind, params: ChainParams) -> Self {
        let sr = params.sample_rate as f32;

        let stages: Vec<Box<dyn Stage>> = match kind {
            SourceKind::Tab => vec![
                Box::new(Biquad::low_shelf(sr, 200.0, -2.0)),
                Box::new(Biquad::peaking(sr, 1000.0, 0.7, -1.0)),
                Box::new(Compressor::new(sr, -18.0, 6.0, 3.0, 0.01, 0.25)),
                Box::new(Limiter::new(sr, 0.95, 0.1)),
                Box::new(Gain::new(params.gain)),
            ],
            SourceKind::Microphone => vec![
                Box::new(Biquad::highpass(sr, 80.0, 0.707)),
                Box::new(Biquad::peaking(sr, 3000.0, 1.0, 3.0)),
                Box::new(Compressor::new(sr, -24.0, 10.0, 4.0, 0.005, 0.25)),
                Box::new(Gain::new(params.gain)),
            ],
        };

        let chain = Self { stages };
        debug!("{:?} chain: {:?}", kind, chain.describe());
        chain
    }

    /// An empty chain that leaves samples untouched.
    pub fn passthrough() -> Self {
        Self { stages: Vec::new() }
    }

    /// Stage labels in processing order.
    pub fn describe(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.label()).collect()
    }

    /// Run the frame's samples through every stage in order.
    pub fn process_frame(&mut self, frame: &mut AudioFrame) {
        if self.stages.is_empty() {
            return;
        }

        let mut buf: Vec<f32> = frame
            .samples
            .iter()
            .map(|&s| s as f32 / i16::MAX as f32)
            .collect();

        for stage in &mut self.stages {
            stage.process(&mut buf);
        }

        for (out, s) in frame.samples.iter_mut().zip(buf) {
            *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * amplitude)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_gain_scales_samples() {
        let mut gain = Gain::new(0.5);
        let mut samples = vec![0.8, -0.4, 0.2];
        gain.process(&mut samples);

        assert_eq!(samples, vec![0.4, -0.2, 0.1]);
    }

    #[test]
    fn test_highpass_removes_dc() {
        let mut filter = Biquad::highpass(48000.0, 80.0, 0.707);
        let mut samples = vec![0.5f32; 48000];
        filter.process(&mut samples);

        // After a second of constant input the DC component is gone.
        assert!(samples[47999].abs() < 0.01, "got {}", samples[47999]);
    }

    #[test]
    fn test_highpass_passes_high_frequencies() {
        let mut filter = Biquad::highpass(48000.0, 80.0, 0.707);
        let mut samples = sine(3000.0, 48000.0, 0.5, 48000);
        let input_rms = rms(&samples);
        filter.process(&mut samples);

        // 3 kHz is far above the 80 Hz corner; it should pass nearly intact.
        let output_rms = rms(&samples[4800..]);
        assert!((output_rms - input_rms).abs() / input_rms < 0.05);
    }

    #[test]
    fn test_compressor_attenuates_loud_signal() {
        let mut comp = Compressor::new(48000.0, -24.0, 10.0, 4.0, 0.005, 0.25);
        let mut samples = sine(440.0, 48000.0, 0.9, 48000);
        let input_rms = rms(&samples);
        comp.process(&mut samples);

        let output_rms = rms(&samples[4800..]);
        assert!(
            output_rms < input_rms * 0.8,
            "expected compression, input {} output {}",
            input_rms,
            output_rms
        );
    }

    #[test]
    fn test_compressor_leaves_quiet_signal_alone() {
        let mut comp = Compressor::new(48000.0, -24.0, 10.0, 4.0, 0.005, 0.25);
        // -40 dBFS, well under the threshold and knee.
        let mut samples = sine(440.0, 48000.0, 0.01, 4800);
        let input_rms = rms(&samples);
        comp.process(&mut samples);

        let output_rms = rms(&samples);
        assert!((output_rms - input_rms).abs() / input_rms < 0.02);
    }

    #[test]
    fn test_limiter_caps_peaks() {
        let mut limiter = Limiter::new(48000.0, 0.95, 0.1);
        let mut samples = vec![1.5f32, 1.5, 1.5, 1.5];
        limiter.process(&mut samples);

        for s in samples {
            assert!(s.abs() <= 0.951, "peak escaped the limiter: {}", s);
        }
    }

    #[test]
    fn test_chain_order_is_fixed_per_source() {
        let params = ChainParams {
            sample_rate: 48000,
            gain: 1.0,
        };

        let mic = ProcessingChain::for_source(SourceKind::Microphone, params);
        assert_eq!(
            mic.describe(),
            vec!["highpass", "peaking", "compressor", "gain"]
        );

        let tab = ProcessingChain::for_source(SourceKind::Tab, params);
        assert_eq!(
            tab.describe(),
            vec!["low-shelf", "peaking", "compressor", "limiter", "gain"]
        );
    }

    #[test]
    fn test_passthrough_chain_preserves_frame() {
        let mut chain = ProcessingChain::passthrough();
        let mut frame = AudioFrame {
            samples: vec![100, -200, 300],
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source: SourceKind::Microphone,
        };
        chain.process_frame(&mut frame);

        assert_eq!(frame.samples, vec![100, -200, 300]);
    }

    #[test]
    fn test_gain_stage_applies_in_frame_processing() {
        let mut chain = ProcessingChain {
            stages: vec![Box::new(Gain::new(0.5))],
        };
        let mut frame = AudioFrame {
            samples: vec![10000, -10000],
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source: SourceKind::Tab,
        };
        chain.process_frame(&mut frame);

        assert!((frame.samples[0] - 5000).abs() <= 1);
        assert!((frame.samples[1] + 5000).abs() <= 1);
    }
}
