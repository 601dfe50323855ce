//! Per-component render loops and the two renderers they drive.

use crate::{
    timeline::{FrameToken, LoopId, Scheduler},
    AnalyserHandle, Result,
};

pub mod meter;
pub mod spectrum;
pub mod surface;

pub use meter::LevelMeter;
pub use spectrum::SpectrumView;
pub use surface::{LogicalSize, Paint, Rgba, Surface};

/// A visual component drawn once per refresh.
pub trait Renderer {
    /// Pulls whatever the renderer needs from the analyser and draws it.
    fn draw_active(&mut self, surface: &mut Surface, analyser: &AnalyserHandle) -> Result<()>;

    /// Draws the placeholder shown while no session is active.
    fn draw_idle(&mut self, surface: &mut Surface);
}

/// Continuous, resize-aware draw loop owning one renderer and its surface.
///
/// Mounting requests the first frame and registers a resize listener. Every
/// frame reschedules itself whether or not a session is active, so the idle
/// placeholder keeps tracking layout changes. Unmounting cancels the pending
/// frame and drops the listener.
#[derive(Debug)]
pub struct RenderLoop<R> {
    id: LoopId,
    renderer: R,
    surface: Surface,
    pending: Option<FrameToken>,
    mounted: bool,
}

impl<R: Renderer> RenderLoop<R> {
    pub fn mount(
        scheduler: &mut Scheduler,
        renderer: R,
        logical: LogicalSize,
        device_pixel_ratio: f32,
    ) -> Self {
        let id = scheduler.register_loop();
        scheduler.observe_resize(id);
        let pending = Some(scheduler.request_frame(id));
        Self {
            id,
            renderer,
            surface: Surface::new(logical, device_pixel_ratio),
            pending,
            mounted: true,
        }
    }

    pub fn id(&self) -> LoopId {
        self.id
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn owns(&self, token: &FrameToken) -> bool {
        token.loop_id() == self.id
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Handles a layout change. Ignored once the listener is unregistered.
    pub fn resize(&mut self, scheduler: &Scheduler, logical: LogicalSize) {
        if !scheduler.is_observing_resize(self.id) {
            return;
        }
        if self.surface.resize(logical) {
            tracing::debug!(
                width = self.surface.width(),
                height = self.surface.height(),
                "render surface resized"
            );
        }
    }

    /// Runs one scheduled invocation. Tokens that are not this loop's current
    /// request (cancelled, superseded, foreign) are ignored.
    pub fn run_frame(
        &mut self,
        scheduler: &mut Scheduler,
        token: FrameToken,
        analyser: Option<&AnalyserHandle>,
    ) -> Result<()> {
        if !self.mounted || self.pending != Some(token) {
            return Ok(());
        }

        self.surface.clear();
        let drawn = match analyser {
            Some(analyser) => self.renderer.draw_active(&mut self.surface, analyser),
            None => {
                self.renderer.draw_idle(&mut self.surface);
                Ok(())
            }
        };

        self.pending = Some(scheduler.request_frame(self.id));
        drawn
    }

    pub fn unmount(&mut self, scheduler: &mut Scheduler) {
        if let Some(token) = self.pending.take() {
            scheduler.cancel_frame(token);
        }
        scheduler.unobserve_resize(self.id);
        self.mounted = false;
    }
}
