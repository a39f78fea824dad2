//! Chart rendering for the trend reporter.
//!
//! One SVG line chart per [`ChartGroup`], x axis in local time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use plotters::prelude::*;

use super::{ChartGroup, Period, TrendSeries};

/// Error type for chart rendering.
#[derive(Debug)]
pub enum RenderError {
    Draw(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Draw(msg) => write!(f, "chart rendering failed: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

const WIDTH: u32 = 1600;
const HEIGHT: u32 = 600;

/// Output path for one group chart:
/// `<dir>/upsplot_<period>_<group>.svg`.
pub fn chart_path(dir: &Path, period: Period, group: &ChartGroup) -> PathBuf {
    dir.join(format!("upsplot_{}_{}.svg", period.tag(), group.name))
}

/// Renders one group chart to `path`.
pub fn render_chart(
    path: &Path,
    group: &ChartGroup,
    series: &TrendSeries,
    title: &str,
) -> Result<(), RenderError> {
    let (y_lo, y_hi) = super::y_limits(&series.values, group.accuracy);
    let t0 = local_time(series.start_epoch);
    let t1 = local_time(
        series.start_epoch + series.bucket_secs * series.values.len().max(1) as i64,
    );

    let root = SVGBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(44)
        .y_label_area_size(64)
        .build_cartesian_2d(t0..t1, y_lo..y_hi)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(12)
        .x_label_formatter(&|t: &DateTime<Local>| t.format("%d-%m %H:%M").to_string())
        .y_desc(group.column)
        .draw()
        .map_err(draw_err)?;

    chart
        .draw_series(LineSeries::new(
            series.points().map(|(epoch, value)| (local_time(epoch), value)),
            BLUE.stroke_width(2),
        ))
        .map_err(draw_err)?
        .label(series.label)
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 18, y)], BLUE.stroke_width(2)));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK.mix(0.4))
        .draw()
        .map_err(draw_err)?;

    root.present().map_err(draw_err)?;
    Ok(())
}

fn local_time(epoch: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp(epoch, 0)
        .unwrap_or_else(Utc::now)
        .with_timezone(&Local)
}

fn draw_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}
