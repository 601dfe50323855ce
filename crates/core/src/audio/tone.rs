use std::{
    f32::consts::TAU,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{CaptureBackend, CaptureConstraints, CaptureStream, ChainInput};
use crate::{CaptureError, MicVizError, Result};

/// Frames per generated block, matching a typical audio render quantum.
const BLOCK_FRAMES: usize = 128;

/// Synthetic capture source producing a sine wave on its own thread, paced in
/// real time. Stands in for a microphone on machines without one.
#[derive(Debug, Clone)]
pub struct ToneBackend {
    pub frequency: f32,
    pub amplitude: f32,
    pub sample_rate: u32,
}

impl Default for ToneBackend {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            amplitude: 0.5,
            sample_rate: 48_000,
        }
    }
}

impl ToneBackend {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
            ..Self::default()
        }
    }
}

impl CaptureBackend for ToneBackend {
    fn name(&self) -> &str {
        "tone"
    }

    fn open(
        &mut self,
        _constraints: &CaptureConstraints,
        input: ChainInput,
    ) -> std::result::Result<Box<dyn CaptureStream>, CaptureError> {
        if self.sample_rate == 0 || !self.frequency.is_finite() || !self.amplitude.is_finite() {
            return Err(CaptureError::Construction(format!(
                "invalid tone settings: {self:?}"
            )));
        }

        let running = Arc::new(AtomicBool::new(true));
        let settings = self.clone();
        let flag = running.clone();
        let worker = thread::Builder::new()
            .name("tone-capture".to_string())
            .spawn(move || generate(settings, input, flag))
            .map_err(|err| CaptureError::Construction(err.to_string()))?;

        tracing::debug!(frequency = self.frequency, amplitude = self.amplitude, "tone source running");
        Ok(Box::new(ToneStream {
            sample_rate: self.sample_rate,
            running,
            worker: Some(worker),
        }))
    }
}

fn generate(settings: ToneBackend, input: ChainInput, running: Arc<AtomicBool>) {
    let block_duration = Duration::from_secs_f64(BLOCK_FRAMES as f64 / settings.sample_rate as f64);
    let step = TAU * settings.frequency / settings.sample_rate as f32;
    let mut phase = 0.0_f32;
    let mut block = vec![0.0_f32; BLOCK_FRAMES];
    let mut deadline = Instant::now();

    while running.load(Ordering::Acquire) {
        for sample in block.iter_mut() {
            *sample = settings.amplitude * phase.sin();
            phase = (phase + step) % TAU;
        }
        if !input.process(&block) {
            break;
        }

        deadline += block_duration;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }
}

struct ToneStream {
    sample_rate: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureStream for ToneStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| MicVizError::msg("tone capture thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ToneStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
