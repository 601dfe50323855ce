use super::{Paint, Renderer, Rgba, Surface};
use crate::{AnalyserHandle, LevelReading, Result};

const BACKGROUND_TOP: Rgba = Rgba::new(24, 24, 27, 230);
const BACKGROUND_BOTTOM: Rgba = Rgba::new(24, 24, 27, 153);
const IDLE_BACKGROUND: Rgba = Rgba::new(24, 24, 27, 204);
const LABEL: Rgba = Rgba::new(255, 255, 255, 230);
const PLACEHOLDER: Rgba = Rgba::new(255, 255, 255, 153);
const CLIP: Rgba = Rgba::new(239, 68, 68, 230);
const RMS_TOP: Rgba = Rgba::opaque(0xfc, 0xa5, 0xa5);
const RMS_BOTTOM: Rgba = Rgba::opaque(0xef, 0x44, 0x44);
const PEAK_TOP: Rgba = Rgba::opaque(0xfd, 0xe6, 0x8a);
const PEAK_BOTTOM: Rgba = Rgba::opaque(0xf5, 0x9e, 0x0b);

pub const IDLE_MESSAGE: &str = "Activate microphone to view levels";

/// Axis-aligned rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BarRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Geometry of one meter frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterLayout {
    pub rms_bar: BarRect,
    pub peak_bar: BarRect,
    pub corner_radius: f32,
    /// Centre and radius of the clip dot, present only while clipping.
    pub clip_indicator: Option<(f32, f32, f32)>,
    pub label_baseline: f32,
}

impl MeterLayout {
    pub fn compute(width: f32, height: f32, dpr: f32, reading: &LevelReading) -> Self {
        let bar_width = (width * 0.18).floor();
        let gap = (width * 0.08).floor();
        let start_x = ((width - (bar_width * 2.0 + gap)) / 2.0).floor();

        let bar = |x: f32, value: f32| {
            let bar_height = value.clamp(0.0, 1.0) * height;
            BarRect {
                x,
                y: height - bar_height,
                width: bar_width,
                height: bar_height,
            }
        };

        Self {
            rms_bar: bar(start_x, reading.rms),
            peak_bar: bar(start_x + bar_width + gap, reading.peak),
            corner_radius: 8.0 * dpr,
            clip_indicator: reading
                .clipping
                .then(|| (width - 16.0 * dpr, 16.0 * dpr, 6.0 * dpr)),
            label_baseline: height - 8.0 * dpr,
        }
    }
}

/// Side-by-side RMS and peak bars with a clip indicator.
#[derive(Debug, Default)]
pub struct LevelMeter {
    last_reading: Option<LevelReading>,
    last_layout: Option<MeterLayout>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reading from the most recent active frame; cleared by idle frames.
    pub fn last_reading(&self) -> Option<LevelReading> {
        self.last_reading
    }

    pub fn last_layout(&self) -> Option<MeterLayout> {
        self.last_layout
    }

    /// Draws one active frame from a time-domain snapshot.
    pub fn draw_levels(&mut self, surface: &mut Surface, samples: &[f32]) -> LevelReading {
        let reading = LevelReading::measure(samples);
        let width = surface.width() as f32;
        let height = surface.height() as f32;
        let dpr = surface.device_pixel_ratio();
        let layout = MeterLayout::compute(width, height, dpr, &reading);

        surface.fill_rect(
            0.0,
            0.0,
            width,
            height,
            &Paint::Vertical {
                top: 0.0,
                bottom: height,
                from: BACKGROUND_TOP,
                to: BACKGROUND_BOTTOM,
            },
        );

        draw_bar(surface, &layout.rms_bar, layout.corner_radius, RMS_TOP, RMS_BOTTOM, height);
        draw_bar(surface, &layout.peak_bar, layout.corner_radius, PEAK_TOP, PEAK_BOTTOM, height);

        let font_size = 14.0 * dpr;
        let rms = layout.rms_bar;
        let peak = layout.peak_bar;
        surface.text_centered("RMS", rms.x + rms.width / 2.0, layout.label_baseline, font_size, LABEL);
        surface.text_centered("PEAK", peak.x + peak.width / 2.0, layout.label_baseline, font_size, LABEL);

        if let Some((cx, cy, radius)) = layout.clip_indicator {
            surface.fill_circle(cx, cy, radius, CLIP);
        }

        self.last_reading = Some(reading);
        self.last_layout = Some(layout);
        reading
    }
}

fn draw_bar(surface: &mut Surface, bar: &BarRect, radius: f32, top: Rgba, bottom: Rgba, height: f32) {
    let paint = Paint::Vertical {
        top: bar.y,
        bottom: height,
        from: top,
        to: bottom,
    };
    surface.fill_rounded_rect(bar.x, bar.y, bar.width, bar.height, radius, &paint);
}

impl Renderer for LevelMeter {
    fn draw_active(&mut self, surface: &mut Surface, analyser: &AnalyserHandle) -> Result<()> {
        let samples = analyser.time_domain_samples()?;
        self.draw_levels(surface, &samples);
        Ok(())
    }

    fn draw_idle(&mut self, surface: &mut Surface) {
        self.last_reading = None;
        self.last_layout = None;

        let width = surface.width() as f32;
        let height = surface.height() as f32;
        let dpr = surface.device_pixel_ratio();
        surface.fill_rect(0.0, 0.0, width, height, &Paint::Solid(IDLE_BACKGROUND));
        surface.text_centered(IDLE_MESSAGE, width / 2.0, height / 2.0, 14.0 * dpr, PLACEHOLDER);
    }
}
