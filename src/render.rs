use image::{Rgba, RgbImage, RgbaImage};
use plotters::prelude::*;

use crate::canvas::BLACK;
use crate::error::RenderError;
use crate::font;
use crate::series::SeriesData;
use crate::task::YRange;

/// Turns query data into a fixed-size chart image.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        data: &SeriesData,
        label: &str,
        y_range: Option<YRange>,
    ) -> Result<RgbaImage, RenderError>;
}

/// Line colors, cycled per series.
const PALETTE: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

const TITLE_HEIGHT: u32 = 16;
const GUTTER: u32 = 48;
const MARGIN: u32 = 6;
/// Room under the plot for the hour labels.
const X_GUTTER: u32 = MARGIN + font::GLYPH_HEIGHT + 6;
const AXIS_COLOR: Rgba<u8> = Rgba([80, 80, 80, 255]);
const TEXT_SCALE: u32 = 1;

/// Draws every series as a line over a shared time axis.
#[derive(Debug, Clone, Copy)]
pub struct LineChartRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for LineChartRenderer {
    fn default() -> Self {
        Self {
            width: 300,
            height: 200,
        }
    }
}

impl LineChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn plot(&self, data: &SeriesData, x: (f64, f64), y: (f64, f64)) -> Result<RgbImage, RenderError> {
        let (w, h) = (self.width, self.height);
        let mut buffer = vec![0u8; (w * h * 3) as usize];

        {
            let root = BitMapBackend::with_buffer(&mut buffer, (w, h)).into_drawing_area();
            root.fill(&WHITE).map_err(draw_error)?;

            let mut chart = ChartBuilder::on(&root)
                .margin(MARGIN)
                .margin_top(TITLE_HEIGHT + MARGIN)
                .margin_left(GUTTER)
                .margin_bottom(X_GUTTER)
                .build_cartesian_2d(x.0..x.1, y.0..y.1)
                .map_err(draw_error)?;

            chart
                .plotting_area()
                .draw(&Rectangle::new(
                    [(x.0, y.0), (x.1, y.1)],
                    ShapeStyle::from(&BLACK_RGB).stroke_width(1),
                ))
                .map_err(draw_error)?;

            for (i, series) in data.series.iter().enumerate() {
                let color = PALETTE[i % PALETTE.len()];
                chart
                    .draw_series(LineSeries::new(
                        series.points().map(|(t, v)| (t as f64, v)),
                        ShapeStyle::from(&color).stroke_width(1),
                    ))
                    .map_err(draw_error)?;
            }

            root.present().map_err(draw_error)?;
        }

        RgbImage::from_raw(w, h, buffer)
            .ok_or_else(|| RenderError::Draw("chart buffer has the wrong size".into()))
    }
}

const BLACK_RGB: RGBColor = RGBColor(0, 0, 0);

impl Renderer for LineChartRenderer {
    fn render(
        &self,
        data: &SeriesData,
        label: &str,
        y_range: Option<YRange>,
    ) -> Result<RgbaImage, RenderError> {
        let (Some(x), Some(found)) = (data.x_bounds(), data.y_bounds()) else {
            return Err(RenderError::NoPoints);
        };

        let x = widen(x.0 as f64, x.1 as f64);
        let y = match y_range {
            Some(range) => widen(range.min, range.max),
            None => widen(found.0, found.1),
        };

        let mut image = image::DynamicImage::ImageRgb8(self.plot(data, x, y)?).into_rgba8();

        font::draw_text(&mut image, GUTTER as i64, 4, label, TEXT_SCALE, BLACK);
        annotate_y(&mut image, y, self.height);
        annotate_x(&mut image, x, self.width, self.height);

        Ok(image)
    }
}

/// Writes the y bounds into the left gutter, top and bottom of the plot.
fn annotate_y(image: &mut RgbaImage, y: (f64, f64), height: u32) {
    let top = (TITLE_HEIGHT + MARGIN) as i64;
    let bottom = height as i64 - X_GUTTER as i64 - font::GLYPH_HEIGHT as i64;

    for (value, row) in [(y.1, top), (y.0, bottom)] {
        let text = format_value(value);
        let width = font::measure(&text, TEXT_SCALE) as i64;
        let x = GUTTER as i64 - 4 - width;
        font::draw_text(image, x.max(0), row, &text, TEXT_SCALE, AXIS_COLOR);
    }
}

/// Writes start, middle and end times as `HH:MM` under the plot.
fn annotate_x(image: &mut RgbaImage, x: (f64, f64), width: u32, height: u32) {
    let row = height as i64 - X_GUTTER as i64 + 3;
    let left = GUTTER as i64;
    let right = width as i64 - MARGIN as i64;
    let middle = (x.0 + x.1) / 2.0;

    for (millis, anchor) in [(x.0, 0.0), (middle, 0.5), (x.1, 1.0)] {
        let text = format_hour(millis as i64);
        let text_width = font::measure(&text, TEXT_SCALE) as i64;
        let position = left + ((right - left) as f64 * anchor) as i64;
        let column = (position - (text_width as f64 * anchor) as i64).max(0);
        font::draw_text(image, column, row, &text, TEXT_SCALE, AXIS_COLOR);
    }
}

/// UTC wall clock time of a unix millisecond timestamp.
pub(crate) fn format_hour(millis: i64) -> String {
    let minutes = millis.div_euclid(60_000).rem_euclid(24 * 60);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Compact axis value, e.g. `1.5K`, `0.25`, `-3M`.
pub(crate) fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    let (scaled, suffix) = if magnitude >= 1e9 {
        (value / 1e9, "G")
    } else if magnitude >= 1e6 {
        (value / 1e6, "M")
    } else if magnitude >= 1e3 {
        (value / 1e3, "K")
    } else {
        (value, "")
    };

    let text = if scaled.fract() == 0.0 {
        format!("{scaled:.0}")
    } else if scaled.abs() >= 10.0 {
        format!("{scaled:.1}")
    } else {
        format!("{scaled:.2}")
    };

    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    };

    format!("{text}{suffix}")
}

/// Makes sure a range has some extent, so flat data still gets an axis.
fn widen(min: f64, max: f64) -> (f64, f64) {
    let (min, max) = if min <= max { (min, max) } else { (max, min) };
    if max - min > f64::EPSILON {
        return (min, max);
    }
    let pad = if min.abs() > 1.0 { min.abs() * 0.05 } else { 1.0 };
    (min - pad, max + pad)
}

fn draw_error<E: std::fmt::Display>(err: E) -> RenderError {
    RenderError::Draw(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Series;

    fn ramp() -> SeriesData {
        SeriesData::new(vec![
            Series::from(("up", (0..20).map(|i| (i * 60_000, i as f64)))),
            Series::from(("down", (0..20).map(|i| (i * 60_000, 20.0 - i as f64)))),
        ])
    }

    #[test]
    fn test_render_has_fixed_size() {
        let renderer = LineChartRenderer::new(300, 200);
        let image = renderer.render(&ramp(), "CPU", None).unwrap();

        assert_eq!(image.dimensions(), (300, 200));
        // something besides the background got drawn
        assert!(image.pixels().any(|p| *p != Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn test_render_series_colors() {
        let renderer = LineChartRenderer::default();
        let image = renderer.render(&ramp(), "Mixed", None).unwrap();

        // lines are antialiased, so look for the hue rather than exact values
        let blueish = |p: &Rgba<u8>| p[2] as i32 - p[0] as i32 > 60;
        let orangeish = |p: &Rgba<u8>| p[0] as i32 - p[2] as i32 > 100 && p[1] < 200;
        assert!(image.pixels().any(blueish));
        assert!(image.pixels().any(orangeish));
    }

    #[test]
    fn test_render_empty_data() {
        let renderer = LineChartRenderer::default();
        let err = renderer
            .render(&SeriesData::default(), "Empty", None)
            .unwrap_err();

        assert!(matches!(err, RenderError::NoPoints));
        assert_eq!(err.to_string(), "no points");
    }

    #[test]
    fn test_render_flat_series_with_override() {
        let data = SeriesData::new(vec![Series::from((
            "flat",
            [(0, 0.5), (1000, 0.5), (2000, 0.5)],
        ))]);
        let renderer = LineChartRenderer::default();

        assert!(renderer.render(&data, "Ratio", None).is_ok());
        assert!(renderer.render(&data, "Ratio", Some(YRange::unit())).is_ok());
    }

    #[test]
    fn test_render_hour_labels_under_plot() {
        let renderer = LineChartRenderer::default();
        let image = renderer.render(&ramp(), "CPU", None).unwrap();

        let rows = renderer.height - X_GUTTER + 3..renderer.height - MARGIN;
        let labelled = |columns: std::ops::Range<u32>| {
            rows.clone()
                .any(|y| columns.clone().any(|x| *image.get_pixel(x, y) == AXIS_COLOR))
        };
        assert!(labelled(GUTTER..GUTTER + 20));
        assert!(labelled(140..170));
        assert!(labelled(renderer.width - MARGIN - 20..renderer.width - MARGIN));
    }

    #[test]
    fn test_format_hour() {
        assert_eq!(format_hour(0), "00:00");
        assert_eq!(format_hour(13 * 3_600_000 + 5 * 60_000), "13:05");
        assert_eq!(format_hour(86_400_000 + 60_000), "00:01");
        assert_eq!(format_hour(-60_000), "23:59");
    }

    #[test]
    fn test_widen() {
        assert_eq!(widen(0.0, 1.0), (0.0, 1.0));
        assert_eq!(widen(1.0, 0.0), (0.0, 1.0));
        assert_eq!(widen(0.5, 0.5), (-0.5, 1.5));
        assert_eq!(widen(100.0, 100.0), (95.0, 105.0));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(0.0), "0");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(1500.0), "1.5K");
        assert_eq!(format_value(-3_000_000.0), "-3M");
        assert_eq!(format_value(12_345.0), "12.3K");
    }
}
