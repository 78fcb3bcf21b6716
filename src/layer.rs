//! Layers supplying pixel rows to the refresh engine.
//!
//! The row calculator asks its [`Layer`] for whole physical rows, just before
//! packing them. Several layers are combined with a [`LayerStack`]: the row
//! buffer starts black and every layer paints over it in insertion order, so
//! later layers end up on top.
//!
//! [`Canvas`] is a retained layer that `embedded-graphics` can draw into.

use core::convert::Infallible;

use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::{OriginDimensions, Size};
use embedded_graphics::Pixel;

use crate::{Color, Rgb48};

/// Display orientation, clockwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Rotation {
    /// Panel native orientation
    #[default]
    Rotate0 = 0,
    /// Rotated 90 degrees
    Rotate90 = 1,
    /// Upside down
    Rotate180 = 2,
    /// Rotated 270 degrees
    Rotate270 = 3,
}

impl Rotation {
    /// Decode the value stored by [`RefreshControls`](crate::RefreshControls).
    /// Only the low two bits are used.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Rotate0,
            1 => Self::Rotate90,
            2 => Self::Rotate180,
            _ => Self::Rotate270,
        }
    }

    /// `true` for the orientations that swap width and height.
    #[must_use]
    pub const fn is_transposed(self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }
}

/// Something that can paint physical panel rows.
///
/// All hooks are called from the row calculator, in its interrupt context,
/// so implementations must be quick and must not block.
pub trait Layer {
    /// Paint physical row `row` into `buffer`, one sample per column.
    ///
    /// `buffer` already holds whatever the layers below painted; leave
    /// pixels untouched to let them show through.
    fn fill_row(&mut self, row: usize, buffer: &mut [Rgb48]);

    /// Rotation changed; called at a frame boundary before
    /// [`on_frame_start`](Self::on_frame_start).
    fn on_rotation_change(&mut self, _rotation: Rotation) {}

    /// Refresh rate changed.
    fn on_refresh_rate_change(&mut self, _refresh_rate_hz: u16) {}

    /// Called once per frame, before row 0 is requested.
    fn on_frame_start(&mut self) {}
}

impl<L: Layer + ?Sized> Layer for &mut L {
    fn fill_row(&mut self, row: usize, buffer: &mut [Rgb48]) {
        (**self).fill_row(row, buffer);
    }

    fn on_rotation_change(&mut self, rotation: Rotation) {
        (**self).on_rotation_change(rotation);
    }

    fn on_refresh_rate_change(&mut self, refresh_rate_hz: u16) {
        (**self).on_refresh_rate_change(refresh_rate_hz);
    }

    fn on_frame_start(&mut self) {
        (**self).on_frame_start();
    }
}

/// Fixed, ordered set of layers. Index 0 is the bottom layer.
pub struct LayerStack<'a, const N: usize> {
    layers: [&'a mut dyn Layer; N],
}

impl<'a, const N: usize> LayerStack<'a, N> {
    /// Stack `layers`, bottom first.
    pub fn new(layers: [&'a mut dyn Layer; N]) -> Self {
        Self { layers }
    }

    /// Number of layers.
    #[must_use]
    pub const fn len(&self) -> usize {
        N
    }

    /// `true` for an empty stack.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Layer for LayerStack<'_, N> {
    fn fill_row(&mut self, row: usize, buffer: &mut [Rgb48]) {
        for layer in &mut self.layers {
            layer.fill_row(row, buffer);
        }
    }

    fn on_rotation_change(&mut self, rotation: Rotation) {
        for layer in &mut self.layers {
            layer.on_rotation_change(rotation);
        }
    }

    fn on_refresh_rate_change(&mut self, refresh_rate_hz: u16) {
        for layer in &mut self.layers {
            layer.on_refresh_rate_change(refresh_rate_hz);
        }
    }

    fn on_frame_start(&mut self) {
        for layer in &mut self.layers {
            layer.on_frame_start();
        }
    }
}

/// Retained `W` x `H` pixel layer.
///
/// Drawing goes through `embedded-graphics` in the current orientation;
/// pixels are stored in panel order so rows can be handed out directly.
/// With a transparent key set, pixels of that colour let lower layers show.
#[derive(Clone)]
pub struct Canvas<const W: usize, const H: usize> {
    pixels: [[Color; W]; H],
    rotation: Rotation,
    transparent: Option<Color>,
}

impl<const W: usize, const H: usize> Canvas<W, H> {
    /// A black, opaque canvas.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pixels: [[Color::BLACK; W]; H],
            rotation: Rotation::Rotate0,
            transparent: None,
        }
    }

    /// Treat `key` as see-through, or make the canvas opaque with `None`.
    pub fn set_transparent(&mut self, key: Option<Color>) {
        self.transparent = key;
    }

    /// Current orientation.
    #[must_use]
    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Fill the whole canvas with `color`.
    pub fn fill(&mut self, color: Color) {
        for row in &mut self.pixels {
            row.fill(color);
        }
    }

    /// Pixel at panel coordinates, ignoring rotation.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Option<Color> {
        self.pixels.get(y).and_then(|row| row.get(x)).copied()
    }

    /// Map drawing coordinates to panel coordinates.
    fn to_panel(&self, x: i32, y: i32) -> Option<(usize, usize)> {
        let size = self.size();
        if x < 0 || y < 0 || x as u32 >= size.width || y as u32 >= size.height {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        Some(match self.rotation {
            Rotation::Rotate0 => (x, y),
            Rotation::Rotate90 => (W - 1 - y, x),
            Rotation::Rotate180 => (W - 1 - x, H - 1 - y),
            Rotation::Rotate270 => (y, H - 1 - x),
        })
    }
}

impl<const W: usize, const H: usize> Default for Canvas<W, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const W: usize, const H: usize> Layer for Canvas<W, H> {
    fn fill_row(&mut self, row: usize, buffer: &mut [Rgb48]) {
        let Some(pixels) = self.pixels.get(row) else {
            return;
        };
        for (out, &color) in buffer.iter_mut().zip(pixels) {
            if self.transparent != Some(color) {
                *out = Rgb48::from(color);
            }
        }
    }

    fn on_rotation_change(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }
}

impl<const W: usize, const H: usize> OriginDimensions for Canvas<W, H> {
    fn size(&self) -> Size {
        if self.rotation.is_transposed() {
            Size::new(H as u32, W as u32)
        } else {
            Size::new(W as u32, H as u32)
        }
    }
}

impl<const W: usize, const H: usize> embedded_graphics::draw_target::DrawTarget for Canvas<W, H> {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if let Some((x, y)) = self.to_panel(point.x, point.y) {
                self.pixels[y][x] = color;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;
    use std::vec::Vec;

    use embedded_graphics::draw_target::DrawTarget;
    use embedded_graphics::prelude::{Point, Primitive};
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
    use embedded_graphics::Drawable;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<&'static str>,
        rotation: Option<Rotation>,
        refresh_rate: Option<u16>,
    }

    impl Layer for Recorder {
        fn fill_row(&mut self, _row: usize, _buffer: &mut [Rgb48]) {
            self.events.push("fill");
        }

        fn on_rotation_change(&mut self, rotation: Rotation) {
            self.rotation = Some(rotation);
        }

        fn on_refresh_rate_change(&mut self, refresh_rate_hz: u16) {
            self.refresh_rate = Some(refresh_rate_hz);
        }

        fn on_frame_start(&mut self) {
            self.events.push("frame");
        }
    }

    struct Solid(Rgb48);

    impl Layer for Solid {
        fn fill_row(&mut self, _row: usize, buffer: &mut [Rgb48]) {
            buffer.fill(self.0);
        }
    }

    #[test]
    fn test_rotation_bits() {
        for rotation in [
            Rotation::Rotate0,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            assert_eq!(Rotation::from_bits(rotation as u8), rotation);
        }
        assert!(Rotation::Rotate90.is_transposed());
        assert!(!Rotation::Rotate180.is_transposed());
    }

    #[test]
    fn test_canvas_fill_row() {
        let mut canvas = Canvas::<4, 2>::new();
        Pixel(Point::new(1, 1), Color::RED).draw(&mut canvas).unwrap();
        let mut row = [Rgb48::WHITE; 4];
        canvas.fill_row(1, &mut row);
        assert_eq!(row[0], Rgb48::BLACK);
        assert_eq!(row[1], Rgb48::new(0xffff, 0, 0));
        assert_eq!(row[2], Rgb48::BLACK);
    }

    #[test]
    fn test_canvas_out_of_range_ignored() {
        let mut canvas = Canvas::<4, 2>::new();
        canvas
            .draw_iter([
                Pixel(Point::new(-1, 0), Color::RED),
                Pixel(Point::new(4, 0), Color::RED),
                Pixel(Point::new(0, 2), Color::RED),
            ])
            .unwrap();
        let mut row = [Rgb48::WHITE; 4];
        canvas.fill_row(0, &mut row);
        assert_eq!(row, [Rgb48::BLACK; 4]);
        // rows past the canvas leave the buffer alone
        let mut row = [Rgb48::WHITE; 4];
        canvas.fill_row(5, &mut row);
        assert_eq!(row, [Rgb48::WHITE; 4]);
    }

    #[test]
    fn test_canvas_transparency() {
        let mut canvas = Canvas::<4, 1>::new();
        canvas.set_transparent(Some(Color::BLACK));
        Pixel(Point::new(2, 0), Color::BLUE).draw(&mut canvas).unwrap();
        let below = Rgb48::new(1, 2, 3);
        let mut row = [below; 4];
        canvas.fill_row(0, &mut row);
        assert_eq!(row, [below, below, Rgb48::new(0, 0, 0xffff), below]);
    }

    #[test]
    fn test_canvas_rotation() {
        let mut canvas = Canvas::<4, 2>::new();
        canvas.on_rotation_change(Rotation::Rotate90);
        assert_eq!(canvas.size(), Size::new(2, 4));
        // top-left in rotated space is top-right on the panel
        Pixel(Point::new(0, 0), Color::GREEN).draw(&mut canvas).unwrap();
        assert_eq!(canvas.pixel(3, 0), Some(Color::GREEN));

        canvas.fill(Color::BLACK);
        canvas.on_rotation_change(Rotation::Rotate180);
        Pixel(Point::new(0, 0), Color::GREEN).draw(&mut canvas).unwrap();
        assert_eq!(canvas.pixel(3, 1), Some(Color::GREEN));

        canvas.fill(Color::BLACK);
        canvas.on_rotation_change(Rotation::Rotate270);
        Pixel(Point::new(0, 0), Color::GREEN).draw(&mut canvas).unwrap();
        assert_eq!(canvas.pixel(0, 1), Some(Color::GREEN));
    }

    #[test]
    fn test_canvas_primitives() {
        let mut canvas = Canvas::<8, 4>::new();
        Rectangle::new(Point::new(2, 1), Size::new(3, 2))
            .into_styled(PrimitiveStyle::with_fill(Color::WHITE))
            .draw(&mut canvas)
            .unwrap();
        let mut row = [Rgb48::BLACK; 8];
        canvas.fill_row(2, &mut row);
        let lit: Vec<_> = row.iter().map(|&p| p == Rgb48::WHITE).collect();
        assert_eq!(
            lit,
            vec![false, false, true, true, true, false, false, false]
        );
    }

    #[test]
    fn test_stack_paints_in_order() {
        let mut bottom = Solid(Rgb48::new(1, 1, 1));
        let mut top = Canvas::<2, 1>::new();
        top.set_transparent(Some(Color::BLACK));
        Pixel(Point::new(1, 0), Color::RED).draw(&mut top).unwrap();
        let mut stack = LayerStack::new([&mut bottom as &mut dyn Layer, &mut top]);
        assert_eq!(stack.len(), 2);
        let mut row = [Rgb48::BLACK; 2];
        stack.fill_row(0, &mut row);
        assert_eq!(row, [Rgb48::new(1, 1, 1), Rgb48::new(0xffff, 0, 0)]);
    }

    #[test]
    fn test_stack_forwards_hooks() {
        let mut a = Recorder::default();
        let mut b = Recorder::default();
        {
            let mut stack = LayerStack::new([&mut a as &mut dyn Layer, &mut b]);
            stack.on_rotation_change(Rotation::Rotate180);
            stack.on_refresh_rate_change(120);
            stack.on_frame_start();
            stack.fill_row(0, &mut []);
        }
        for layer in [&a, &b] {
            assert_eq!(layer.rotation, Some(Rotation::Rotate180));
            assert_eq!(layer.refresh_rate, Some(120));
            assert_eq!(layer.events, ["frame", "fill"]);
        }
    }
}
