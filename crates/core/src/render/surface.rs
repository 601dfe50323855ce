use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10, FONT_7X14, FONT_9X18},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Rectangle, RoundedRectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use serde::{Deserialize, Serialize};

/// Size in layout units, before the device pixel ratio is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: f32,
    pub height: f32,
}

impl LogicalSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Backing-store dimensions: `max(1, floor(logical * dpr))` on each axis.
    pub fn physical(self, device_pixel_ratio: f32) -> (u32, u32) {
        let scale = |v: f32| {
            let scaled = (v * device_pixel_ratio).floor();
            if scaled.is_finite() && scaled >= 1.0 {
                scaled as u32
            } else {
                1
            }
        };
        (scale(self.width), scale(self.height))
    }
}

/// Straight (non-premultiplied) RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    fn lerp(self, other: Rgba, t: f32) -> Rgba {
        let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
        Rgba::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
            mix(self.a, other.a),
        )
    }

    /// Source-over composition of `self` onto `dst`.
    fn over(self, dst: Rgba) -> Rgba {
        let sa = f32::from(self.a) / 255.0;
        let da = f32::from(dst.a) / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            return Rgba::TRANSPARENT;
        }
        let channel = |s: u8, d: u8| {
            let value = (f32::from(s) * sa + f32::from(d) * da * (1.0 - sa)) / out_a;
            value.round().clamp(0.0, 255.0) as u8
        };
        Rgba::new(
            channel(self.r, dst.r),
            channel(self.g, dst.g),
            channel(self.b, dst.b),
            (out_a * 255.0).round() as u8,
        )
    }
}

/// Fill style for shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Rgba),
    /// Linear gradient from `from` at `top` to `to` at `bottom` (pixel rows).
    Vertical {
        top: f32,
        bottom: f32,
        from: Rgba,
        to: Rgba,
    },
}

impl Paint {
    fn color_at(&self, y: f32) -> Rgba {
        match *self {
            Paint::Solid(color) => color,
            Paint::Vertical {
                top,
                bottom,
                from,
                to,
            } => {
                let span = bottom - top;
                let t = if span.abs() <= f32::EPSILON {
                    0.0
                } else {
                    ((y - top) / span).clamp(0.0, 1.0)
                };
                from.lerp(to, t)
            }
        }
    }
}

/// A 2D drawing surface backed by an RGBA8 pixel buffer sized in physical
/// pixels. Shape edges snap to the nearest pixel boundary and are rasterised
/// by embedded-graphics; colour and alpha blending happen here.
#[derive(Debug, Clone)]
pub struct Surface {
    device_pixel_ratio: f32,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(logical: LogicalSize, device_pixel_ratio: f32) -> Self {
        let (width, height) = logical.physical(device_pixel_ratio);
        Self {
            device_pixel_ratio,
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Applies a new logical size. Like a canvas, the contents are discarded
    /// when the backing store changes. Returns whether it changed.
    pub fn resize(&mut self, logical: LogicalSize) -> bool {
        let (width, height) = logical.physical(self.device_pixel_ratio);
        if (width, height) == (self.width, self.height) {
            return false;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize * 4];
        true
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes, row-major.
    pub fn as_rgba(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        if x >= self.width || y >= self.height {
            return Rgba::TRANSPARENT;
        }
        let i = self.index(x, y);
        Rgba::new(
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        )
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, paint: &Paint) {
        self.fill_rounded_rect(x, y, w, h, 0.0, paint);
    }

    pub fn fill_rounded_rect(&mut self, x: f32, y: f32, w: f32, h: f32, radius: f32, paint: &Paint) {
        let Some(bounds) = snap_rect(x, y, w, h) else {
            return;
        };
        let r = snap_len(radius)
            .min(bounds.size.width / 2)
            .min(bounds.size.height / 2);
        if r == 0 {
            self.fill_points(bounds.points(), paint);
        } else {
            let shape = RoundedRectangle::with_equal_corners(bounds, Size::new(r, r));
            self.fill_points(shape.points(), paint);
        }
    }

    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba) {
        let diameter = snap_len(radius * 2.0);
        if diameter == 0 {
            return;
        }
        let center = Point::new(cx.round() as i32, cy.round() as i32);
        let shape = Circle::with_center(center, diameter);
        self.fill_points(shape.points(), &Paint::Solid(color));
    }

    /// Full-width horizontal line centred on `y`.
    pub fn hline(&mut self, y: f32, thickness: f32, color: Rgba) {
        let half = (thickness / 2.0).max(0.5);
        self.fill_rect(0.0, y - half, self.width as f32, half * 2.0, &Paint::Solid(color));
    }

    /// Draws `text` centred horizontally on `x` with its baseline at `y`.
    /// `size` is the wanted glyph height in physical pixels; the closest
    /// bitmap font at or below it is used.
    pub fn text_centered(&mut self, text: &str, x: f32, y: f32, size: f32, color: Rgba) {
        let style = MonoTextStyle::new(font_for(size), Rgb888::new(color.r, color.g, color.b));
        let layout = TextStyleBuilder::new()
            .alignment(Alignment::Center)
            .baseline(Baseline::Alphabetic)
            .build();
        let position = Point::new(x.round() as i32, y.round() as i32);
        let mut ink = Ink {
            surface: self,
            alpha: color.a,
        };
        let _ = Text::with_text_style(text, position, style, layout).draw(&mut ink);
    }

    /// Blends `paint` into every in-bounds point, sampling gradients at the
    /// pixel centre of each row.
    fn fill_points(&mut self, points: impl Iterator<Item = Point>, paint: &Paint) {
        for point in points {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < self.width && y < self.height {
                self.blend(x, y, paint.color_at(y as f32 + 0.5));
            }
        }
    }

    fn blend(&mut self, x: u32, y: u32, color: Rgba) {
        let i = self.index(x, y);
        let dst = Rgba::new(
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        );
        let out = color.over(dst);
        self.pixels[i..i + 4].copy_from_slice(&[out.r, out.g, out.b, out.a]);
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

/// Pixel-aligned rectangle covering `[x, x + w) x [y, y + h)`, or `None` when
/// it rounds away to nothing.
fn snap_rect(x: f32, y: f32, w: f32, h: f32) -> Option<Rectangle> {
    if !(w > 0.0 && h > 0.0) {
        return None;
    }
    let left = x.round();
    let top = y.round();
    let width = snap_len((x + w).round() - left);
    let height = snap_len((y + h).round() - top);
    (width > 0 && height > 0)
        .then(|| Rectangle::new(Point::new(left as i32, top as i32), Size::new(width, height)))
}

fn snap_len(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

fn font_for(size: f32) -> &'static MonoFont<'static> {
    if size < 12.0 {
        &FONT_6X10
    } else if size < 16.0 {
        &FONT_7X14
    } else if size < 19.0 {
        &FONT_9X18
    } else {
        &FONT_10X20
    }
}

/// `DrawTarget` view of a surface so embedded-graphics can render glyphs onto
/// it with a fixed alpha.
struct Ink<'a> {
    surface: &'a mut Surface,
    alpha: u8,
}

impl OriginDimensions for Ink<'_> {
    fn size(&self) -> Size {
        Size::new(self.surface.width, self.surface.height)
    }
}

impl DrawTarget for Ink<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> std::result::Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < self.surface.width && y < self.surface.height {
                let ink = Rgba::new(color.r(), color.g(), color.b(), self.alpha);
                self.surface.blend(x, y, ink);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_accounts_for_pixel_ratio() {
        let surface = Surface::new(LogicalSize::new(100.5, 40.0), 2.0);
        assert_eq!((surface.width(), surface.height()), (201, 80));
        assert_eq!(surface.as_rgba().len(), 201 * 80 * 4);

        let tiny = Surface::new(LogicalSize::new(0.0, 0.2), 1.0);
        assert_eq!((tiny.width(), tiny.height()), (1, 1));
    }

    #[test]
    fn resize_reallocates_only_on_change() {
        let mut surface = Surface::new(LogicalSize::new(10.0, 10.0), 1.0);
        assert!(!surface.resize(LogicalSize::new(10.4, 10.0)));
        assert!(surface.resize(LogicalSize::new(20.0, 10.0)));
        assert_eq!(surface.width(), 20);
    }

    #[test]
    fn opaque_fill_replaces_and_translucent_blends() {
        let mut surface = Surface::new(LogicalSize::new(4.0, 4.0), 1.0);
        surface.fill_rect(0.0, 0.0, 4.0, 4.0, &Paint::Solid(Rgba::opaque(200, 0, 0)));
        assert_eq!(surface.pixel(1, 1), Rgba::opaque(200, 0, 0));

        surface.fill_rect(0.0, 0.0, 2.0, 2.0, &Paint::Solid(Rgba::new(0, 0, 200, 128)));
        let mixed = surface.pixel(0, 0);
        assert_eq!(mixed.a, 255);
        assert!(mixed.r > 90 && mixed.r < 110);
        assert!(mixed.b > 90 && mixed.b < 110);
        assert_eq!(surface.pixel(3, 3), Rgba::opaque(200, 0, 0));
    }

    #[test]
    fn gradient_runs_top_to_bottom() {
        let mut surface = Surface::new(LogicalSize::new(1.0, 10.0), 1.0);
        let paint = Paint::Vertical {
            top: 0.0,
            bottom: 10.0,
            from: Rgba::opaque(0, 0, 0),
            to: Rgba::opaque(250, 250, 250),
        };
        surface.fill_rect(0.0, 0.0, 1.0, 10.0, &paint);
        assert!(surface.pixel(0, 0).r < 20);
        assert!(surface.pixel(0, 9).r > 230);
    }

    #[test]
    fn rounded_corners_are_left_empty() {
        let mut surface = Surface::new(LogicalSize::new(20.0, 20.0), 1.0);
        surface.fill_rounded_rect(0.0, 0.0, 20.0, 20.0, 8.0, &Paint::Solid(Rgba::opaque(255, 255, 255)));
        assert_eq!(surface.pixel(0, 0), Rgba::TRANSPARENT);
        assert_eq!(surface.pixel(10, 10), Rgba::opaque(255, 255, 255));
        assert_eq!(surface.pixel(10, 0), Rgba::opaque(255, 255, 255));
    }

    #[test]
    fn radius_larger_than_the_shape_still_fills() {
        let mut surface = Surface::new(LogicalSize::new(640.0, 256.0), 1.0);
        let white = Paint::Solid(Rgba::opaque(255, 255, 255));

        // Narrower and shorter than twice the radius.
        surface.fill_rounded_rect(100.5, 40.0, 2.624_99, 150.0, 6.0, &white);
        assert_eq!(surface.pixel(101, 100), Rgba::opaque(255, 255, 255));

        surface.fill_rounded_rect(200.0, 250.6, 36.0, 5.4, 8.0, &white);
        assert_eq!(surface.pixel(218, 253), Rgba::opaque(255, 255, 255));

        // Rounds away to nothing.
        surface.fill_rounded_rect(300.0, 255.8, 36.0, 0.1, 8.0, &white);
        assert_eq!(surface.pixel(318, 255), Rgba::TRANSPARENT);
    }

    #[test]
    fn circle_stays_inside_radius() {
        let mut surface = Surface::new(LogicalSize::new(20.0, 20.0), 1.0);
        surface.fill_circle(10.0, 10.0, 3.0, Rgba::opaque(255, 0, 0));
        assert_eq!(surface.pixel(10, 10), Rgba::opaque(255, 0, 0));
        assert_eq!(surface.pixel(2, 2), Rgba::TRANSPARENT);
    }

    #[test]
    fn text_puts_ink_near_the_anchor() {
        let mut surface = Surface::new(LogicalSize::new(80.0, 30.0), 1.0);
        surface.text_centered("RMS", 40.0, 20.0, 14.0, Rgba::opaque(255, 255, 255));
        let inked = (0..80)
            .flat_map(|x| (0..30).map(move |y| (x, y)))
            .filter(|&(x, y)| surface.pixel(x, y).a > 0)
            .collect::<Vec<_>>();
        assert!(!inked.is_empty());
        assert!(inked.iter().all(|&(x, y)| (25..55).contains(&x) && y <= 22));
    }

    #[test]
    fn clear_wipes_everything() {
        let mut surface = Surface::new(LogicalSize::new(3.0, 3.0), 1.0);
        surface.fill_rect(0.0, 0.0, 3.0, 3.0, &Paint::Solid(Rgba::opaque(1, 2, 3)));
        surface.clear();
        assert!(surface.as_rgba().iter().all(|&b| b == 0));
    }
}
