use super::{meter::BarRect, Paint, Renderer, Rgba, Surface};
use crate::{AnalyserHandle, Result};

pub const MAX_BARS: usize = 96;
pub const GAMMA: f32 = 1.2;
/// Fraction of the surface height a full-scale bar may reach.
pub const HEADROOM: f32 = 0.9;
const GRID_ROWS: usize = 4;

const BACKGROUND: Rgba = Rgba::new(24, 24, 27, 217);
const GRID: Rgba = Rgba::new(255, 255, 255, 15);
const PLACEHOLDER: Rgba = Rgba::new(255, 255, 255, 153);
const BAR_TOP: Rgba = Rgba::opaque(248, 113, 113);
const BAR_BOTTOM: Rgba = Rgba::opaque(153, 27, 27);

pub const IDLE_MESSAGE: &str = "Spectrum will appear here";

/// Number of bars drawn for `bins` frequency bins.
pub fn bar_count(bins: usize) -> usize {
    bins.min(MAX_BARS)
}

/// Nearest-neighbour downsampling: bar `i` takes bin `i * floor(bins / bars)`.
/// Skipped bins are not averaged in.
pub fn downsample(magnitudes: &[f32]) -> Vec<f32> {
    let bars = bar_count(magnitudes.len());
    if bars == 0 {
        return Vec::new();
    }
    let step = magnitudes.len() / bars;
    (0..bars).map(|i| magnitudes[i * step]).collect()
}

/// Power-law display mapping applied to each normalised magnitude.
pub fn gamma(magnitude: f32) -> f32 {
    magnitude.clamp(0.0, 1.0).powf(GAMMA)
}

/// Bar rectangles for one frame, in physical pixels.
pub fn layout(magnitudes: &[f32], width: f32, height: f32, dpr: f32) -> Vec<BarRect> {
    let values = downsample(magnitudes);
    if values.is_empty() {
        return Vec::new();
    }

    let padding = 10.0 * dpr;
    let slot = (width - 2.0 * padding) / values.len() as f32;
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let bar_height = gamma(value) * HEADROOM * height;
            BarRect {
                x: padding + i as f32 * slot + dpr,
                y: height - bar_height,
                width: slot - 2.0 * dpr,
                height: bar_height,
            }
        })
        .collect()
}

/// Gamma-corrected bar spectrum over a faint horizontal grid.
#[derive(Debug, Default)]
pub struct SpectrumView {
    last_bars: Vec<BarRect>,
}

impl SpectrumView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bars drawn by the most recent active frame; empty after an idle frame.
    pub fn last_bars(&self) -> &[BarRect] {
        &self.last_bars
    }

    pub fn draw_magnitudes(&mut self, surface: &mut Surface, magnitudes: &[f32]) {
        draw_background(surface);

        let width = surface.width() as f32;
        let height = surface.height() as f32;
        let dpr = surface.device_pixel_ratio();
        let bars = layout(magnitudes, width, height, dpr);
        for bar in &bars {
            let paint = Paint::Vertical {
                top: bar.y,
                bottom: height,
                from: BAR_TOP,
                to: BAR_BOTTOM,
            };
            surface.fill_rounded_rect(bar.x, bar.y, bar.width, bar.height, 6.0 * dpr, &paint);
        }
        self.last_bars = bars;
    }
}

fn draw_background(surface: &mut Surface) {
    let width = surface.width() as f32;
    let height = surface.height() as f32;
    let dpr = surface.device_pixel_ratio();
    surface.fill_rect(0.0, 0.0, width, height, &Paint::Solid(BACKGROUND));
    for row in 1..GRID_ROWS {
        let y = row as f32 * height / GRID_ROWS as f32;
        surface.hline(y, dpr, GRID);
    }
}

impl Renderer for SpectrumView {
    fn draw_active(&mut self, surface: &mut Surface, analyser: &AnalyserHandle) -> Result<()> {
        let magnitudes = analyser.frequency_magnitudes()?;
        self.draw_magnitudes(surface, &magnitudes);
        Ok(())
    }

    fn draw_idle(&mut self, surface: &mut Surface) {
        self.last_bars.clear();
        draw_background(surface);
        let width = surface.width() as f32;
        let height = surface.height() as f32;
        let dpr = surface.device_pixel_ratio();
        surface.text_centered(IDLE_MESSAGE, width / 2.0, height / 2.0, 14.0 * dpr, PLACEHOLDER);
    }
}
