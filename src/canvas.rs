use image::{Rgba, RgbaImage, imageops};

use crate::font;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Fixed placement rules of a canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// X of every panel and header. Panels are left-aligned, never centered.
    pub left: u32,
    /// Initial cursor position.
    pub top: u32,
    /// Gap below every appended image.
    pub margin: u32,
    /// Height reserved for one header line.
    pub line_height: u32,
    pub background: Rgba<u8>,
    pub foreground: Rgba<u8>,
    /// Pixel size of one font dot.
    pub text_scale: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            left: 100,
            top: 0,
            margin: 10,
            line_height: 30,
            background: WHITE,
            foreground: BLACK,
            text_scale: 2,
        }
    }
}

/// Append-only drawing surface that stacks panels top to bottom.
///
/// Every element is placed at the write cursor, which then moves down past
/// it. The cursor never moves up, so elements can't overlap. Content running
/// past the bottom edge is clipped; the canvas never grows.
#[derive(Debug, Clone)]
pub struct Canvas {
    buffer: RgbaImage,
    cursor_y: u32,
    layout: Layout,
}

impl Canvas {
    pub fn create(width: u32, height: u32) -> Self {
        Self::with_layout(width, height, Layout::default())
    }

    pub fn with_layout(width: u32, height: u32, layout: Layout) -> Self {
        Self {
            buffer: RgbaImage::from_pixel(width, height, layout.background),
            cursor_y: layout.top,
            layout,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn cursor_y(&self) -> u32 {
        self.cursor_y
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Writes one line of text at the cursor and moves down by one line
    /// height. Headers get no extra margin, they sit right above their panel.
    pub fn write_header(&mut self, text: &str) {
        let glyph_height = font::GLYPH_HEIGHT * self.layout.text_scale;
        let pad = self.layout.line_height.saturating_sub(glyph_height) / 2;

        font::draw_text(
            &mut self.buffer,
            self.layout.left as i64,
            self.cursor_y as i64 + pad as i64,
            text,
            self.layout.text_scale,
            self.layout.foreground,
        );

        tracing::debug!(y = self.cursor_y, text, "header");
        self.cursor_y = self.cursor_y.saturating_add(self.layout.line_height);
    }

    /// Copies `image` with its top-left corner at `(left, cursor)` and moves
    /// down by its height plus the margin.
    pub fn append_image(&mut self, image: &RgbaImage) {
        imageops::replace(
            &mut self.buffer,
            image,
            self.layout.left as i64,
            self.cursor_y as i64,
        );

        tracing::debug!(
            y = self.cursor_y,
            width = image.width(),
            height = image.height(),
            "panel"
        );
        self.cursor_y = self
            .cursor_y
            .saturating_add(image.height())
            .saturating_add(self.layout.margin);
    }

    /// Hands over the composed pixels. The canvas is single use.
    pub fn into_image(self) -> RgbaImage {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn block(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, RED)
    }

    #[test]
    fn test_blank_canvas() {
        let canvas = Canvas::create(60, 40);
        assert_eq!(canvas.cursor_y(), 0);

        let image = canvas.into_image();
        assert_eq!(image.dimensions(), (60, 40));
        assert!(image.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn test_cursor_positions() {
        let mut canvas = Canvas::create(600, 600);
        let mut positions = vec![];

        for h in [50, 70, 20] {
            positions.push(canvas.cursor_y());
            canvas.append_image(&block(10, h));
        }

        assert_eq!(positions, vec![0, 60, 140]);
        assert_eq!(canvas.cursor_y(), 170);
    }

    #[test]
    fn test_image_is_left_anchored() {
        let layout = Layout {
            left: 5,
            ..Default::default()
        };
        let mut canvas = Canvas::with_layout(40, 40, layout);
        canvas.append_image(&block(10, 10));
        canvas.append_image(&block(20, 5));
        let image = canvas.into_image();

        assert_eq!(*image.get_pixel(4, 0), WHITE);
        assert_eq!(*image.get_pixel(5, 0), RED);
        assert_eq!(*image.get_pixel(14, 9), RED);
        assert_eq!(*image.get_pixel(15, 0), WHITE);
        // margin row
        assert_eq!(*image.get_pixel(5, 10), WHITE);
        // second panel, same x
        assert_eq!(*image.get_pixel(5, 20), RED);
        assert_eq!(*image.get_pixel(24, 24), RED);
    }

    #[test]
    fn test_header_advances_by_line_height() {
        let mut canvas = Canvas::create(200, 100);
        canvas.write_header("no points");
        assert_eq!(canvas.cursor_y(), 30);

        canvas.append_image(&block(10, 10));
        assert_eq!(canvas.cursor_y(), 50);

        let image = canvas.into_image();
        let inked = (0..30).any(|y| (100..200).any(|x| *image.get_pixel(x, y) == BLACK));
        assert!(inked);
        // panel starts right after the header line
        assert_eq!(*image.get_pixel(100, 30), RED);
    }

    #[test]
    fn test_overflow_is_clipped() {
        let layout = Layout {
            left: 0,
            ..Default::default()
        };
        let mut canvas = Canvas::with_layout(20, 30, layout);
        canvas.append_image(&block(20, 25));
        canvas.append_image(&block(20, 25));

        assert_eq!(canvas.cursor_y(), 70);
        let image = canvas.into_image();
        assert_eq!(image.dimensions(), (20, 30));
        assert_eq!(*image.get_pixel(0, 24), RED);
        assert_eq!(*image.get_pixel(0, 29), WHITE);
    }

    #[test]
    fn test_wide_image_is_clipped_on_the_right() {
        let mut canvas = Canvas::create(150, 50);
        canvas.append_image(&block(300, 20));
        let image = canvas.into_image();

        assert_eq!(*image.get_pixel(149, 0), RED);
        assert_eq!(*image.get_pixel(99, 0), WHITE);
    }
}
