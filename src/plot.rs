use std::collections::BTreeMap;
use std::fmt::Write;

use ndarray::Array2;

use crate::AppResult;
use crate::classify::cluster::NOISE;
use crate::error::AppError;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 600.0;
const MARGIN: f64 = 40.0;
const LEGEND_WIDTH: f64 = 170.0;
const NOISE_COLOR: &str = "#c8c8c8";
const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// Render a 2-D scatter of `points`, coloured by cluster label, as a standalone SVG document.
/// Noise is drawn first, smaller and in light grey, so clusters sit on top of it.
pub fn render_svg(points: &Array2<f64>, labels: &[i32], title: &str) -> AppResult<String> {
    if points.ncols() != 2 {
        return Err(AppError::Other(format!(
            "expected 2-D points, got {} columns",
            points.ncols()
        )));
    }
    if points.nrows() != labels.len() {
        return Err(AppError::Other(format!(
            "{} points but {} labels",
            points.nrows(),
            labels.len()
        )));
    }

    let xs = points.column(0);
    let ys = points.column(1);
    let (x_min, x_max) = bounds(xs.iter().copied());
    let (y_min, y_max) = bounds(ys.iter().copied());
    let plot_w = WIDTH - LEGEND_WIDTH - 2.0 * MARGIN;
    let plot_h = HEIGHT - 2.0 * MARGIN;
    let sx = |x: f64| MARGIN + (x - x_min) / (x_max - x_min) * plot_w;
    // SVG y grows downwards.
    let sy = |y: f64| HEIGHT - MARGIN - (y - y_min) / (y_max - y_min) * plot_h;

    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let clusters: Vec<i32> = counts.keys().copied().filter(|l| *l != NOISE).collect();
    let color_of = |label: i32| -> &'static str {
        match clusters.iter().position(|c| *c == label) {
            Some(i) => PALETTE[i % PALETTE.len()],
            None => NOISE_COLOR,
        }
    };

    let mut svg = String::new();
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    )?;
    writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        svg,
        r#"<text x="{}" y="{}" font-family="sans-serif" font-size="16" text-anchor="middle">{}</text>"#,
        MARGIN + plot_w / 2.0,
        MARGIN / 2.0 + 6.0,
        escape(title)
    )?;

    let noise_first = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| **l == NOISE)
        .chain(labels.iter().enumerate().filter(|(_, l)| **l != NOISE));
    for (i, &label) in noise_first {
        let (r, opacity) = if label == NOISE { (2.0, 0.6) } else { (3.5, 0.85) };
        writeln!(
            svg,
            r#"<circle cx="{:.2}" cy="{:.2}" r="{r}" fill="{}" fill-opacity="{opacity}"/>"#,
            sx(xs[i]),
            sy(ys[i]),
            color_of(label)
        )?;
    }

    let legend_x = WIDTH - LEGEND_WIDTH - MARGIN / 2.0;
    let entries = counts
        .iter()
        .filter(|(l, _)| **l == NOISE)
        .chain(counts.iter().filter(|(l, _)| **l != NOISE));
    for (row, (&label, &count)) in entries.enumerate() {
        let y = MARGIN + 20.0 * row as f64;
        let name = if label == NOISE {
            format!("noise ({count})")
        } else {
            format!("cluster {label} ({count})")
        };
        writeln!(
            svg,
            r#"<circle cx="{legend_x}" cy="{y}" r="5" fill="{}"/>"#,
            color_of(label)
        )?;
        writeln!(
            svg,
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="12">{name}</text>"#,
            legend_x + 12.0,
            y + 4.0
        )?;
    }

    writeln!(svg, "</svg>")?;
    Ok(svg)
}

/// Min and max, widened when all values coincide so scaling never divides by zero.
fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        (0.0, 1.0)
    } else if (max - min).abs() < f64::EPSILON {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
