//! Capture lifecycle and the `source → gain → analysis` signal chain.
//!
//! [`SignalChainManager`] is the only owner of the capture stream and of the
//! gain parameter. The chain never reaches an audible output: the analyser is
//! a sink, so there is nothing to feed back into the microphone.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    config::{AnalyserConfig, AudioConfig},
    Analyser, AnalyserHandle, CaptureError, Result,
};

#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod gain;
pub mod tone;

pub use gain::{GainSetting, GainStage};

/// Lifecycle state of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Active,
    /// Idle after a failed start, until the error is acknowledged.
    Error,
}

/// Processing switches requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: false,
        }
    }
}

impl From<&AudioConfig> for CaptureConstraints {
    fn from(config: &AudioConfig) -> Self {
        Self {
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

/// An open capture stream. Dropping it must also release the device.
pub trait CaptureStream {
    fn sample_rate(&self) -> u32;

    /// Stops every underlying track.
    fn stop(&mut self) -> Result<()>;
}

/// Platform capture facility: opens an input stream that delivers blocks into
/// the given [`ChainInput`].
pub trait CaptureBackend {
    fn name(&self) -> &str;

    fn open(
        &mut self,
        constraints: &CaptureConstraints,
        input: ChainInput,
    ) -> std::result::Result<Box<dyn CaptureStream>, CaptureError>;

    /// Releases whatever the backend holds beyond its streams. Called once,
    /// when the owning [`AudioContext`] closes.
    fn close(&mut self) {}
}

/// Producer-side entry into the chain. The capture thread owns a clone and
/// pushes raw blocks through it; gain is applied here, per block.
#[derive(Debug, Clone)]
pub struct ChainInput {
    gain: Arc<GainStage>,
    analyser: AnalyserHandle,
}

impl ChainInput {
    pub fn new(gain: Arc<GainStage>, analyser: AnalyserHandle) -> Self {
        Self { gain, analyser }
    }

    /// Feeds a mono block. Returns `false` once the chain has been torn down,
    /// in which case the block is dropped.
    pub fn process(&self, samples: &[f32]) -> bool {
        self.feed(samples.iter().copied())
    }

    /// Feeds an interleaved block, averaging channels down to mono first.
    pub fn process_interleaved(&self, data: &[f32], channels: usize) -> bool {
        if channels <= 1 {
            return self.process(data);
        }
        self.feed(
            data.chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        )
    }

    fn feed(&self, mono: impl Iterator<Item = f32>) -> bool {
        if !self.gain.is_connected() {
            return false;
        }
        let gain = self.gain.gain();
        self.analyser
            .push_samples(mono.map(|sample| sample * gain))
            .is_ok()
    }
}

/// Process-scoped audio processing context. Created once with the manager and
/// closed once on teardown.
pub struct AudioContext {
    backend: Box<dyn CaptureBackend>,
    closed: bool,
}

impl AudioContext {
    pub fn new(backend: impl CaptureBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            closed: false,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn close(&mut self) {
        if !self.closed {
            tracing::debug!(backend = self.backend.name(), "closing audio context");
            self.backend.close();
            self.closed = true;
        }
    }

    fn open_stream(
        &mut self,
        constraints: &CaptureConstraints,
        input: ChainInput,
    ) -> std::result::Result<Box<dyn CaptureStream>, CaptureError> {
        if self.closed {
            return Err(CaptureError::Construction(
                "audio context has been closed".to_string(),
            ));
        }
        self.backend.open(constraints, input)
    }
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("backend", &self.backend.name())
            .field("closed", &self.closed)
            .finish()
    }
}

/// The live nodes of an active session. They exist together or not at all.
struct SignalChain {
    stream: Box<dyn CaptureStream>,
    gain: Arc<GainStage>,
    analyser: AnalyserHandle,
}

impl SignalChain {
    /// Best-effort teardown; failures are logged and swallowed.
    fn release(mut self) {
        self.gain.disconnect();
        if let Err(err) = self.stream.stop() {
            tracing::debug!(%err, "ignoring failure while stopping capture stream");
        }
    }
}

/// Generation marker captured when a start begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket {
    epoch: u64,
}

/// Chain nodes built for an in-flight start, waiting for the capture stream.
#[derive(Debug)]
pub struct PendingStart {
    ticket: StartTicket,
    gain: Arc<GainStage>,
    analyser: AnalyserHandle,
}

impl PendingStart {
    /// Entry point to hand to the capture backend.
    pub fn input(&self) -> ChainInput {
        ChainInput::new(self.gain.clone(), self.analyser.clone())
    }
}

/// Result of committing a start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Attached,
    /// A stop (or newer start) happened while the device was being acquired;
    /// the acquired stream was released instead of attached.
    Discarded,
}

/// Owns the capture device, the chain nodes and the gain parameter.
pub struct SignalChainManager {
    context: AudioContext,
    constraints: CaptureConstraints,
    analyser_config: AnalyserConfig,
    gain: GainSetting,
    chain: Option<SignalChain>,
    epoch: u64,
}

impl SignalChainManager {
    pub fn new(context: AudioContext) -> Self {
        Self {
            context,
            constraints: CaptureConstraints::default(),
            analyser_config: AnalyserConfig::default(),
            gain: GainSetting::default(),
            chain: None,
            epoch: 0,
        }
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_analyser_config(mut self, config: AnalyserConfig) -> Self {
        self.analyser_config = config;
        self
    }

    pub fn with_gain(mut self, value: f32) -> Self {
        self.set_gain(value);
        self
    }

    pub fn state(&self) -> SessionState {
        if self.chain.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.chain.is_some()
    }

    pub fn gain(&self) -> GainSetting {
        self.gain
    }

    /// Analysis node of the active chain, `None` while idle.
    pub fn analyser(&self) -> Option<&AnalyserHandle> {
        self.chain.as_ref().map(|chain| &chain.analyser)
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.chain.as_ref().map(|chain| chain.stream.sample_rate())
    }

    /// Acquires the capture device and connects the chain.
    pub fn start(&mut self) -> std::result::Result<(), CaptureError> {
        if self.is_active() {
            tracing::debug!("start requested while already active");
            return Ok(());
        }

        let pending = match self.begin_start() {
            Ok(pending) => pending,
            Err(err) => {
                self.stop();
                return Err(err);
            }
        };
        let acquired = self.context.open_stream(&self.constraints, pending.input());
        self.finish_start(pending, acquired).map(|_| ())
    }

    /// First half of a start: bumps the generation and builds the gain and
    /// analysis nodes. The caller acquires a stream for
    /// [`PendingStart::input`] and hands the result to
    /// [`SignalChainManager::finish_start`].
    pub fn begin_start(&mut self) -> std::result::Result<PendingStart, CaptureError> {
        self.epoch += 1;
        let analyser = Analyser::new(self.analyser_config)
            .map_err(|err| CaptureError::Construction(err.to_string()))?;

        Ok(PendingStart {
            ticket: StartTicket { epoch: self.epoch },
            gain: Arc::new(GainStage::new(self.gain)),
            analyser: AnalyserHandle::new(analyser),
        })
    }

    /// Second half of a start: commits the chain if no stop or newer start
    /// intervened since [`SignalChainManager::begin_start`].
    pub fn finish_start(
        &mut self,
        pending: PendingStart,
        acquired: std::result::Result<Box<dyn CaptureStream>, CaptureError>,
    ) -> std::result::Result<StartOutcome, CaptureError> {
        let stale = pending.ticket.epoch != self.epoch;

        let stream = match acquired {
            Ok(stream) => stream,
            Err(err) if stale => {
                tracing::debug!(%err, "stale start failed; session already reset");
                return Ok(StartOutcome::Discarded);
            }
            Err(err) => {
                tracing::warn!(%err, "microphone capture failed");
                self.stop();
                return Err(err);
            }
        };

        let chain = SignalChain {
            stream,
            gain: pending.gain,
            analyser: pending.analyser,
        };

        if stale || self.chain.is_some() {
            tracing::debug!(
                ticket = pending.ticket.epoch,
                current = self.epoch,
                "discarding capture stream from superseded start"
            );
            chain.release();
            return Ok(StartOutcome::Discarded);
        }

        // Pick up any gain change made while the device was being acquired.
        chain.gain.set_gain(self.gain);
        tracing::info!(
            backend = self.context.backend_name(),
            sample_rate = chain.stream.sample_rate(),
            gain = %self.gain,
            "microphone active"
        );
        self.chain = Some(chain);
        Ok(StartOutcome::Attached)
    }

    /// Releases the device and every chain node. Safe to call at any time.
    pub fn stop(&mut self) {
        self.epoch += 1;
        if let Some(chain) = self.chain.take() {
            chain.release();
            tracing::info!("microphone stopped");
        }
    }

    /// Clamps and stores the gain, applying it to the live stage if active.
    pub fn set_gain(&mut self, value: f32) {
        if !value.is_finite() {
            tracing::debug!(value, "ignoring non-finite gain");
            return;
        }
        self.gain = GainSetting::new(value);
        if let Some(chain) = &self.chain {
            chain.gain.set_gain(self.gain);
        }
    }
}

impl Drop for SignalChainManager {
    fn drop(&mut self) {
        self.stop();
        self.context.close();
    }
}

impl std::fmt::Debug for SignalChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChainManager")
            .field("state", &self.state())
            .field("gain", &self.gain)
            .field("epoch", &self.epoch)
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        cell::RefCell,
        rc::Rc,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// Backend whose streams are driven by hand from the test body.
    #[derive(Clone, Default)]
    pub(crate) struct ManualBackend {
        pub(crate) inputs: Rc<RefCell<Vec<ChainInput>>>,
        pub(crate) live_streams: Arc<AtomicUsize>,
        pub(crate) fail_with: Rc<RefCell<Option<CaptureError>>>,
        /// Teardown calls in the order they reached the backend.
        pub(crate) events: Rc<RefCell<Vec<&'static str>>>,
    }

    impl ManualBackend {
        pub(crate) fn failing(err: CaptureError) -> Self {
            let backend = Self::default();
            backend.set_failure(Some(err));
            backend
        }

        pub(crate) fn set_failure(&self, err: Option<CaptureError>) {
            *self.fail_with.borrow_mut() = err;
        }

        pub(crate) fn last_input(&self) -> ChainInput {
            self.inputs.borrow().last().cloned().expect("no stream opened")
        }

        pub(crate) fn live(&self) -> usize {
            self.live_streams.load(Ordering::SeqCst)
        }

        pub(crate) fn events(&self) -> Vec<&'static str> {
            self.events.borrow().clone()
        }
    }

    struct ManualStream {
        live: Arc<AtomicUsize>,
        events: Rc<RefCell<Vec<&'static str>>>,
        stopped: bool,
    }

    impl CaptureStream for ManualStream {
        fn sample_rate(&self) -> u32 {
            48_000
        }

        fn stop(&mut self) -> Result<()> {
            if !self.stopped {
                self.stopped = true;
                self.live.fetch_sub(1, Ordering::SeqCst);
                self.events.borrow_mut().push("stop");
            }
            Ok(())
        }
    }

    impl CaptureBackend for ManualBackend {
        fn name(&self) -> &str {
            "manual"
        }

        fn open(
            &mut self,
            _constraints: &CaptureConstraints,
            input: ChainInput,
        ) -> std::result::Result<Box<dyn CaptureStream>, CaptureError> {
            if let Some(err) = self.fail_with.borrow().clone() {
                return Err(err);
            }
            self.inputs.borrow_mut().push(input);
            self.live_streams.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ManualStream {
                live: self.live_streams.clone(),
                events: self.events.clone(),
                stopped: false,
            }))
        }

        fn close(&mut self) {
            self.events.borrow_mut().push("close");
        }
    }

    fn manager(backend: &ManualBackend) -> SignalChainManager {
        SignalChainManager::new(AudioContext::new(backend.clone()))
    }

    #[test]
    fn stop_on_idle_is_a_noop() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);
        chain.stop();
        chain.stop();
        assert_eq!(chain.state(), SessionState::Idle);
        assert!(chain.analyser().is_none());
    }

    #[test]
    fn start_then_stop_releases_everything() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);

        chain.start().unwrap();
        assert_eq!(chain.state(), SessionState::Active);
        assert!(chain.analyser().is_some());
        assert_eq!(backend.live(), 1);

        chain.stop();
        assert_eq!(chain.state(), SessionState::Idle);
        assert!(chain.analyser().is_none());
        assert_eq!(backend.live(), 0);
        assert!(!backend.last_input().process(&[0.5; 16]));
    }

    #[test]
    fn failed_start_stays_idle() {
        let backend = ManualBackend::failing(CaptureError::PermissionDenied);
        let mut chain = manager(&backend);

        let err = chain.start().unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied);
        assert_eq!(chain.state(), SessionState::Idle);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn requests_raw_levels_from_the_device() {
        let constraints = CaptureConstraints::default();
        assert!(constraints.echo_cancellation);
        assert!(constraints.noise_suppression);
        assert!(!constraints.auto_gain_control);
    }

    #[test]
    fn gain_is_clamped() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);
        chain.set_gain(10.0);
        assert_eq!(chain.gain().value(), 4.0);
        chain.set_gain(0.01);
        assert_eq!(chain.gain().value(), 0.25);
        chain.set_gain(f32::INFINITY);
        assert_eq!(chain.gain().value(), 0.25);
    }

    #[test]
    fn gain_survives_restart_and_applies_live() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend).with_gain(2.0);
        chain.start().unwrap();

        backend.last_input().process(&[0.25; 2048]);
        let samples = chain.analyser().unwrap().time_domain_samples().unwrap();
        assert!((samples[2047] - 0.5).abs() < 1e-6);

        chain.set_gain(0.5);
        backend.last_input().process(&[0.25; 2048]);
        let samples = chain.analyser().unwrap().time_domain_samples().unwrap();
        assert!((samples[0] - 0.125).abs() < 1e-6);

        chain.stop();
        chain.start().unwrap();
        assert_eq!(chain.gain().value(), 0.5);
    }

    #[test]
    fn alternating_block_reads_half_scale() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);
        chain.start().unwrap();

        let block: Vec<f32> = (0..2048).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert!(backend.last_input().process(&block));

        let samples = chain.analyser().unwrap().time_domain_samples().unwrap();
        let reading = crate::LevelReading::measure(&samples);
        assert!((reading.rms - 0.5).abs() < 1e-6);
        assert!((reading.peak - 0.5).abs() < 1e-6);
        assert!(!reading.clipping);
    }

    #[test]
    fn stop_during_acquisition_discards_the_stream() {
        let mut backend = ManualBackend::default();
        let mut chain = manager(&backend);

        let pending = chain.begin_start().unwrap();
        let acquired = backend.open(&CaptureConstraints::default(), pending.input());
        assert_eq!(backend.live(), 1);

        chain.stop();
        let outcome = chain.finish_start(pending, acquired).unwrap();
        assert_eq!(outcome, StartOutcome::Discarded);
        assert_eq!(chain.state(), SessionState::Idle);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn failed_acquisition_after_stop_is_not_reported() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);

        let pending = chain.begin_start().unwrap();
        chain.stop();
        let epoch = chain.epoch;

        let outcome = chain
            .finish_start(pending, Err(CaptureError::PermissionDenied))
            .unwrap();
        assert_eq!(outcome, StartOutcome::Discarded);
        assert_eq!(chain.state(), SessionState::Idle);
        assert_eq!(chain.epoch, epoch);
        assert!(backend.events().is_empty());
    }

    #[test]
    fn current_failed_acquisition_resets_the_session() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);

        let pending = chain.begin_start().unwrap();
        let epoch = chain.epoch;
        let err = chain
            .finish_start(pending, Err(CaptureError::PermissionDenied))
            .unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied);
        assert_eq!(chain.state(), SessionState::Idle);
        assert_eq!(chain.epoch, epoch + 1);
    }

    #[test]
    fn newer_start_wins_over_older_one() {
        let mut backend = ManualBackend::default();
        let mut chain = manager(&backend);

        let first = chain.begin_start().unwrap();
        let first_stream = backend.open(&CaptureConstraints::default(), first.input());
        let second = chain.begin_start().unwrap();
        let second_stream = backend.open(&CaptureConstraints::default(), second.input());

        assert_eq!(chain.finish_start(second, second_stream).unwrap(), StartOutcome::Attached);
        assert_eq!(chain.finish_start(first, first_stream).unwrap(), StartOutcome::Discarded);
        assert_eq!(backend.live(), 1);
        assert!(chain.is_active());
    }

    #[test]
    fn drop_stops_before_closing_context() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);
        chain.start().unwrap();
        assert!(backend.events().is_empty());

        drop(chain);
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.events(), ["stop", "close"]);
    }

    #[test]
    fn idle_drop_only_closes_the_context() {
        let backend = ManualBackend::default();
        drop(manager(&backend));
        assert_eq!(backend.events(), ["close"]);
    }

    #[test]
    fn closed_context_refuses_streams() {
        let backend = ManualBackend::default();
        let mut context = AudioContext::new(backend.clone());
        context.close();
        context.close();
        assert_eq!(backend.events(), ["close"]);
        let mut chain = SignalChainManager::new(context);
        assert!(matches!(chain.start(), Err(CaptureError::Construction(_))));
        assert_eq!(chain.state(), SessionState::Idle);
    }

    #[test]
    fn interleaved_input_is_downmixed() {
        let backend = ManualBackend::default();
        let mut chain = manager(&backend);
        chain.start().unwrap();

        backend.last_input().process_interleaved(&[1.0, 0.0, 0.5, 0.5], 2);
        let samples = chain.analyser().unwrap().time_domain_samples().unwrap();
        assert_eq!(&samples[2046..], &[0.5, 0.5]);
    }
}
