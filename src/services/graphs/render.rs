use super::data::{SensorRecord, ALTITUDE_LIMIT_M, ALTITUDE_MAX_M, ALTITUDE_MIN_M};
use super::types::{GraphKind, QueryRange};
use anyhow::Result;
use std::fmt::Write as _;

/// Below this many usable records a placeholder image is produced instead of
/// a plot.
pub const MIN_RECORDS_FOR_PLOT: usize = 10;

pub struct RenderRequest {
    pub graph: GraphKind,
    pub range: QueryRange,
    pub limit_altitude: bool,
    pub records: Vec<SensorRecord>,
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// The actual plotting routine is an external collaborator; the engine only
/// sees this seam. Implementations run on the blocking pool and may take
/// seconds.
pub trait GraphRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest) -> Result<RenderedImage>;
}

/// Built-in stand-in renderer producing simple SVG scatter projections. It
/// exists so the pipeline produces a real, inspectable artifact per graph
/// kind without pulling a plotting stack into this service.
pub struct ScatterSvgRenderer;

const MARGIN: f64 = 60.0;

impl GraphRenderer for ScatterSvgRenderer {
    fn render(&self, request: &RenderRequest) -> Result<RenderedImage> {
        let (width, height) = request.graph.canvas_size();
        let svg = if request.records.len() < MIN_RECORDS_FOR_PLOT {
            placeholder_svg(width, height, request.graph)
        } else {
            plot_svg(width, height, request)
        };
        Ok(RenderedImage {
            bytes: svg.into_bytes(),
            content_type: "image/svg+xml",
        })
    }
}

fn placeholder_svg(width: u32, height: u32, graph: GraphKind) -> String {
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<rect width="100%" height="100%" fill="white"/>"#,
            r##"<text x="50%" y="50%" text-anchor="middle" font-size="30" fill="#666">"##,
            "no data in range ({name})",
            "</text></svg>"
        ),
        w = width,
        h = height,
        name = graph.as_str(),
    )
}

struct Axes {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

fn axes_for(request: &RenderRequest) -> Axes {
    let alt_max = if request.limit_altitude {
        ALTITUDE_LIMIT_M
    } else {
        ALTITUDE_MAX_M
    };
    let start = request.range.start.timestamp() as f64;
    let end = request.range.end.timestamp() as f64;
    match request.graph {
        GraphKind::Density => Axes {
            x_min: ALTITUDE_MIN_M,
            x_max: alt_max,
            y_min: -80.0,
            y_max: 30.0,
        },
        GraphKind::Temperature => Axes {
            x_min: start,
            x_max: end,
            y_min: -80.0,
            y_max: 30.0,
        },
        _ => Axes {
            x_min: start,
            x_max: end,
            y_min: ALTITUDE_MIN_M,
            y_max: alt_max,
        },
    }
}

fn point_for(graph: GraphKind, record: &SensorRecord) -> (f64, f64) {
    match graph {
        GraphKind::Density => (record.altitude, record.temperature),
        GraphKind::Temperature => (record.time.timestamp() as f64, record.temperature),
        _ => (record.time.timestamp() as f64, record.altitude),
    }
}

/// Maps a temperature to a warm-to-cold hex color.
fn temperature_color(temperature: f64) -> String {
    let t = ((temperature + 80.0) / 110.0).clamp(0.0, 1.0);
    let r = (40.0 + 215.0 * t) as u8;
    let g = (30.0 + 120.0 * (1.0 - (2.0 * t - 1.0).abs())) as u8;
    let b = (200.0 * (1.0 - t) + 30.0) as u8;
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn plot_svg(width: u32, height: u32, request: &RenderRequest) -> String {
    let axes = axes_for(request);
    let plot_w = width as f64 - 2.0 * MARGIN;
    let plot_h = height as f64 - 2.0 * MARGIN;
    let x_span = (axes.x_max - axes.x_min).max(1.0);
    let y_span = (axes.y_max - axes.y_min).max(1.0);

    let mut svg = String::with_capacity(request.records.len() * 64 + 1024);
    let _ = write!(
        svg,
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<rect width="100%" height="100%" fill="white"/>"#,
            r##"<rect x="{m}" y="{m}" width="{pw}" height="{ph}" fill="none" stroke="#333" stroke-width="1"/>"##,
            r##"<text x="{m}" y="36" font-size="24" fill="#111">{name}</text>"##,
        ),
        w = width,
        h = height,
        m = MARGIN,
        pw = plot_w,
        ph = plot_h,
        name = request.graph.as_str(),
    );

    for record in &request.records {
        let (x_value, y_value) = point_for(request.graph, record);
        let x = MARGIN + (x_value - axes.x_min) / x_span * plot_w;
        let y = MARGIN + plot_h - (y_value - axes.y_min) / y_span * plot_h;
        if !(MARGIN..=MARGIN + plot_w).contains(&x) || !(MARGIN..=MARGIN + plot_h).contains(&y) {
            continue;
        }
        let color = temperature_color(record.temperature);
        if request.graph == GraphKind::WindDirection {
            let (wx, wy) = match (record.wind_x, record.wind_y) {
                (Some(wx), Some(wy)) => (wx, wy),
                _ => continue,
            };
            let speed = (wx * wx + wy * wy).sqrt();
            if speed <= 0.1 {
                continue;
            }
            let scale = 12.0 / speed;
            let _ = write!(
                svg,
                r#"<line x1="{x:.1}" y1="{y:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{color}" stroke-width="1.5"/>"#,
                x2 = x + wx * scale,
                y2 = y - wy * scale,
            );
        } else {
            let _ = write!(
                svg,
                r#"<circle cx="{x:.1}" cy="{y:.1}" r="2.5" fill="{color}" fill-opacity="0.9"/>"#,
            );
        }
    }

    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn request(graph: GraphKind, count: usize) -> RenderRequest {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let range = QueryRange {
            start,
            end: start + Duration::days(7),
        };
        let records = (0..count)
            .map(|i| SensorRecord {
                time: start + Duration::minutes(i as i64 * 30),
                altitude: 1_000.0 + (i as f64 * 37.0) % 9_000.0,
                temperature: -60.0 + (i as f64 * 1.3) % 80.0,
                wind_x: Some(4.0),
                wind_y: Some(-2.0),
            })
            .collect();
        RenderRequest {
            graph,
            range,
            limit_altitude: false,
            records,
        }
    }

    #[test]
    fn renders_svg_with_points_for_each_kind() {
        for kind in GraphKind::ALL {
            let image = ScatterSvgRenderer
                .render(&request(kind, 50))
                .expect("render");
            assert_eq!(image.content_type, "image/svg+xml");
            let svg = String::from_utf8(image.bytes).expect("utf8");
            assert!(svg.starts_with("<svg"), "{kind}: not an svg");
            assert!(svg.contains(kind.as_str()));
            if kind == GraphKind::WindDirection {
                assert!(svg.contains("<line"));
            } else {
                assert!(svg.contains("<circle"));
            }
        }
    }

    #[test]
    fn sparse_data_yields_placeholder() {
        let image = ScatterSvgRenderer
            .render(&request(GraphKind::Scatter2d, 3))
            .expect("render");
        let svg = String::from_utf8(image.bytes).expect("utf8");
        assert!(svg.contains("no data in range"));
    }

    #[test]
    fn temperature_color_spans_cold_to_warm() {
        assert_ne!(temperature_color(-75.0), temperature_color(25.0));
    }
}
