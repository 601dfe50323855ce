use std::{
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};

use crate::{config::AnalyserConfig, MicVizError, Result};

/// Peak amplitude at or above which the signal is reported as clipping.
pub const CLIP_THRESHOLD: f32 = 0.99;

/// Loudness measurements derived from one time-domain snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelReading {
    pub rms: f32,
    pub peak: f32,
    pub clipping: bool,
}

impl LevelReading {
    /// Computes RMS, peak and the clip flag. An empty buffer reads as silence.
    pub fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sum_squares = 0.0_f64;
        let mut peak = 0.0_f32;
        for &sample in samples {
            sum_squares += f64::from(sample) * f64::from(sample);
            peak = peak.max(sample.abs());
        }
        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;

        Self {
            rms,
            peak,
            clipping: peak >= CLIP_THRESHOLD,
        }
    }
}

/// Both views of the analyser taken for one frame. Never cached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisSnapshot {
    pub time_domain: Vec<f32>,
    pub frequency_domain: Vec<f32>,
}

/// Windowed spectral analyser modelled on a browser `AnalyserNode`.
///
/// Incoming blocks land in a ring buffer holding the most recent
/// `window_size` samples. Time-domain pulls copy that buffer out in order;
/// frequency pulls run a Blackman-windowed real FFT, smooth the magnitudes
/// against the previous block and map decibels onto `[0, 1]`.
pub struct Analyser {
    config: AnalyserConfig,
    ring: HeapRb<f32>,
    block_serial: u64,
    spectrum_serial: Option<u64>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    magnitudes: Vec<f32>,
    fft: FftResources,
}

impl Analyser {
    pub fn new(config: AnalyserConfig) -> Result<Self> {
        config.validate()?;
        let size = config.window_size;
        let bins = config.bin_count();

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        let mut ring = HeapRb::new(size);
        ring.push_iter_overwrite(std::iter::repeat(0.0).take(size));

        Ok(Self {
            config,
            ring,
            block_serial: 0,
            spectrum_serial: None,
            window: (0..size).map(|i| blackman_value(i, size)).collect(),
            smoothed: vec![0.0; bins],
            magnitudes: vec![0.0; bins],
            fft,
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size
    }

    pub fn bin_count(&self) -> usize {
        self.config.bin_count()
    }

    /// Number of blocks processed since construction.
    pub fn blocks_processed(&self) -> u64 {
        self.block_serial
    }

    /// Appends one block of mono samples. Blocks longer than the window keep
    /// only their tail.
    pub fn process_block(&mut self, samples: &[f32]) {
        self.process_samples(samples.iter().copied());
    }

    /// Same as [`Analyser::process_block`] for samples produced on the fly.
    /// An empty block does not count as processed.
    pub fn process_samples<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = f32>,
    {
        let mut samples = samples.into_iter().peekable();
        if samples.peek().is_none() {
            return;
        }
        self.ring.push_iter_overwrite(samples);
        self.block_serial += 1;
    }

    /// Copies the current window, oldest sample first.
    pub fn time_domain_samples(&self) -> Vec<f32> {
        self.ring.iter().copied().collect()
    }

    /// Normalised magnitudes for the lower half of the spectrum.
    ///
    /// Smoothing advances once per processed block: pulling twice without new
    /// audio returns the same values.
    pub fn frequency_magnitudes(&mut self) -> Result<Vec<f32>> {
        if self.spectrum_serial != Some(self.block_serial) {
            self.compute_spectrum()?;
            self.spectrum_serial = Some(self.block_serial);
        }
        Ok(self.magnitudes.clone())
    }

    pub fn snapshot(&mut self) -> Result<AnalysisSnapshot> {
        Ok(AnalysisSnapshot {
            time_domain: self.time_domain_samples(),
            frequency_domain: self.frequency_magnitudes()?,
        })
    }

    fn compute_spectrum(&mut self) -> Result<()> {
        let size = self.config.window_size;
        let windowed = self.ring.iter().zip(&self.window);
        for (slot, (&sample, &weight)) in self.fft.input.iter_mut().zip(windowed) {
            *slot = sample * weight;
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let tau = self.config.smoothing_time_constant;
        let min_db = self.config.min_decibels;
        let range_db = self.config.max_decibels - min_db;
        let scale = 1.0 / size as f32;

        for (k, bin) in self.fft.spectrum.iter().take(self.smoothed.len()).enumerate() {
            let magnitude = bin.norm() * scale;
            let mut smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            if !smoothed.is_finite() {
                smoothed = 0.0;
            }
            self.smoothed[k] = smoothed;

            self.magnitudes[k] = if smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                ((db - min_db) / range_db).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }

        Ok(())
    }
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyser")
            .field("config", &self.config)
            .field("buffered", &self.ring.occupied_len())
            .field("block_serial", &self.block_serial)
            .finish()
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let x = index as f32 / len as f32;
    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}

/// Shared view over an [`Analyser`] fed by the capture thread.
#[derive(Clone)]
pub struct AnalyserHandle {
    shared: Arc<Mutex<Analyser>>,
}

impl AnalyserHandle {
    pub fn new(analyser: Analyser) -> Self {
        Self {
            shared: Arc::new(Mutex::new(analyser)),
        }
    }

    pub fn push_block(&self, samples: &[f32]) -> Result<()> {
        self.lock()?.process_block(samples);
        Ok(())
    }

    /// Feeds samples computed while the lock is held, so the capture thread
    /// can apply gain and downmix without a scratch buffer.
    pub fn push_samples<I>(&self, samples: I) -> Result<()>
    where
        I: IntoIterator<Item = f32>,
    {
        self.lock()?.process_samples(samples);
        Ok(())
    }

    pub fn time_domain_samples(&self) -> Result<Vec<f32>> {
        Ok(self.lock()?.time_domain_samples())
    }

    pub fn frequency_magnitudes(&self) -> Result<Vec<f32>> {
        self.lock()?.frequency_magnitudes()
    }

    pub fn snapshot(&self) -> Result<AnalysisSnapshot> {
        self.lock()?.snapshot()
    }

    pub fn blocks_processed(&self) -> Result<u64> {
        Ok(self.lock()?.blocks_processed())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Analyser>> {
        self.shared
            .lock()
            .map_err(|_| MicVizError::msg("analyser has been poisoned"))
    }
}

impl fmt::Debug for AnalyserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyserHandle").finish()
    }
}
