#![cfg(feature = "web")]

use crate::error::{AppError, Result};
use crate::table::{Value, ValueCount};
use plotters::coord::Shift;
use plotters::element::Pie;
use plotters::prelude::*;
use std::io::Cursor;

const OTHER_LABEL: &str = "other";
const EMPTY_LABEL: &str = "(empty)";

const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

/// Chart styles for a column's value distribution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    /// One bar per category
    Bar,

    /// Counts joined by a line, categories in frequency order
    Line,

    /// Share of each category as a slice
    Pie,

    /// Pie with a hollow center
    Doughnut,
}

impl ChartKind {
    /// Parses a `kind` query value
    ///
    /// # Errors
    /// * `ValidationError` for unknown chart kinds
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            "doughnut" | "donut" => Ok(ChartKind::Doughnut),
            other => Err(AppError::validation(format!(
                "unknown chart kind `{}`: expected bar, line, pie or doughnut",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Doughnut => "doughnut",
        }
    }
}

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,

    /// Categories beyond this many are folded into "other"
    pub max_categories: usize,

    pub kind: ChartKind,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            width: 800,
            height: 600,
            max_categories: 20,
            kind: ChartKind::Bar,
        }
    }
}

/// Labels and counts ready to draw
#[derive(Clone, Debug, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub counts: Vec<u64>,
}

impl ChartData {
    /// Keeps the `max_categories - 1` most frequent values and folds the rest
    /// into a trailing "other" entry. `counts` must be most frequent first.
    ///
    /// # Errors
    /// * `EmptyInput` when there is nothing to plot
    pub fn from_counts(counts: &[ValueCount], max_categories: usize) -> Result<Self> {
        if counts.is_empty() {
            return Err(AppError::EmptyInput("no values to chart".to_string()));
        }

        let max_categories = max_categories.max(1);
        let label = |value: &Value| match value {
            Value::Null => EMPTY_LABEL.to_string(),
            other => other.to_string(),
        };

        let mut data = ChartData {
            labels: Vec::new(),
            counts: Vec::new(),
        };
        if counts.len() <= max_categories {
            for entry in counts {
                data.labels.push(label(&entry.value));
                data.counts.push(entry.count as u64);
            }
        } else {
            let (kept, rest) = counts.split_at(max_categories - 1);
            for entry in kept {
                data.labels.push(label(&entry.value));
                data.counts.push(entry.count as u64);
            }
            data.labels.push(OTHER_LABEL.to_string());
            data.counts.push(rest.iter().map(|e| e.count as u64).sum());
        }
        Ok(data)
    }

    fn max_count(&self) -> u64 {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

fn draw_err(err: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("chart rendering failed: {}", err))
}

/// Renders a value distribution as a PNG image
///
/// # Arguments
/// * `counts` - Value counts of a column, most frequent first
/// * `options` - Chart kind, size and title
///
/// # Returns
/// * `Result<Vec<u8>>` - PNG-encoded image
///
/// # Errors
/// * `EmptyInput` when the column has no values
/// * `InternalError` when drawing or encoding fails
pub fn render_chart(counts: &[ValueCount], options: &ChartOptions) -> Result<Vec<u8>> {
    let data = ChartData::from_counts(counts, options.max_categories)?;
    let (width, height) = (options.width, options.height);

    let mut pixels = vec![0u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        match options.kind {
            ChartKind::Bar => draw_bar(&root, &data, options)?,
            ChartKind::Line => draw_line(&root, &data, options)?,
            ChartKind::Pie => draw_pie(&root, &data, options, None)?,
            ChartKind::Doughnut => draw_pie(&root, &data, options, Some(0.5))?,
        }

        root.present().map_err(draw_err)?;
    }

    encode_png(pixels, width, height)
}

fn encode_png(pixels: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>> {
    let image = image::RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| AppError::Internal("chart buffer has the wrong size".to_string()))?;
    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut png, image::ImageOutputFormat::Png)
        .map_err(draw_err)?;
    Ok(png.into_inner())
}

fn draw_bar(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    data: &ChartData,
    options: &ChartOptions,
) -> Result<()> {
    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0..data.labels.len()).into_segmented(), 0u64..data.max_count() + 1)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(data.labels.len())
        .x_label_formatter(&|v| segment_label(v, &data.labels))
        .y_desc("count")
        .draw()
        .map_err(draw_err)?;

    chart
        .draw_series(
            Histogram::vertical(&chart)
                .style(PALETTE[0].filled())
                .margin(8)
                .data(data.counts.iter().enumerate().map(|(i, &c)| (i, c))),
        )
        .map_err(draw_err)?;
    Ok(())
}

fn draw_line(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    data: &ChartData,
    options: &ChartOptions,
) -> Result<()> {
    let mut chart = ChartBuilder::on(root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0..data.labels.len()).into_segmented(), 0u64..data.max_count() + 1)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .x_labels(data.labels.len())
        .x_label_formatter(&|v| segment_label(v, &data.labels))
        .y_desc("count")
        .draw()
        .map_err(draw_err)?;

    let points: Vec<(SegmentValue<usize>, u64)> = data
        .counts
        .iter()
        .enumerate()
        .map(|(i, &c)| (SegmentValue::CenterOf(i), c))
        .collect();

    chart
        .draw_series(LineSeries::new(points.iter().cloned(), PALETTE[0].stroke_width(2)))
        .map_err(draw_err)?;
    chart
        .draw_series(points.iter().map(|p| Circle::new(p.clone(), 4, PALETTE[0].filled())))
        .map_err(draw_err)?;
    Ok(())
}

fn draw_pie(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    data: &ChartData,
    options: &ChartOptions,
    hole: Option<f64>,
) -> Result<()> {
    let area = root
        .titled(&options.title, ("sans-serif", 30).into_font())
        .map_err(draw_err)?;

    let (w, h) = area.dim_in_pixel();
    let center = ((w / 2) as i32, (h / 2) as i32);
    let radius = (w.min(h) as f64) * 0.35;
    let sizes: Vec<f64> = data.counts.iter().map(|&c| c as f64).collect();
    let colors: Vec<RGBColor> = (0..sizes.len()).map(|i| PALETTE[i % PALETTE.len()]).collect();

    let mut pie = Pie::new(&center, &radius, &sizes, &colors, &data.labels);
    pie.label_style(("sans-serif", 16).into_font().color(&BLACK));
    pie.percentages(("sans-serif", 14).into_font().color(&WHITE));
    if let Some(fraction) = hole {
        pie.donut_hole(radius * fraction);
    }

    area.draw(&pie).map_err(draw_err)?;
    Ok(())
}

fn segment_label(value: &SegmentValue<usize>, labels: &[String]) -> String {
    match value {
        SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
            labels.get(*i).cloned().unwrap_or_default()
        }
        SegmentValue::Last => String::new(),
    }
}
