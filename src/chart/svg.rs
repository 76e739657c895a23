use std::fmt::Write;

use super::stable_hash;
use crate::store::TimeSeries;

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 260.0;
const PADDING: f64 = 40.0;
/// The y axis never tops out below this, so a quiet fleet isn't stretched.
const Y_FLOOR_MS: u64 = 100;
const LEGEND_COLUMNS: usize = 6;
const LEGEND_COLUMN_WIDTH: f64 = 110.0;

/// Hue from a stable hash of the name; the same node keeps its color
/// across runs without storing a palette.
pub fn node_color(name: &str) -> String {
    format!("hsl({}, 65%, 45%)", stable_hash(name) % 360)
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn x_at(index: usize, count: usize) -> f64 {
    if count <= 1 {
        return WIDTH / 2.0;
    }
    PADDING + index as f64 * (WIDTH - 2.0 * PADDING) / (count - 1) as f64
}

fn y_at(millis: u64, max: u64) -> f64 {
    HEIGHT - PADDING - (millis as f64 / max as f64) * (HEIGHT - 2.0 * PADDING)
}

/// Renders one polyline per node over a fixed canvas. Unreachable samples
/// sit on the baseline.
pub fn render_svg(series: &TimeSeries) -> String {
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}" width="{WIDTH}" height="{HEIGHT}" font-family="sans-serif" font-size="10">"#
    );
    let _ = writeln!(svg, r##"<rect width="{WIDTH}" height="{HEIGHT}" fill="#ffffff"/>"##);

    let baseline = HEIGHT - PADDING;
    let right = WIDTH - PADDING;
    let _ = writeln!(
        svg,
        r##"<line x1="{PADDING}" y1="{baseline}" x2="{right}" y2="{baseline}" stroke="#999999"/>"##
    );
    let _ = writeln!(
        svg,
        r##"<line x1="{PADDING}" y1="{PADDING}" x2="{PADDING}" y2="{baseline}" stroke="#999999"/>"##
    );

    if series.is_empty() {
        let _ = writeln!(
            svg,
            r##"<text x="{}" y="{}" text-anchor="middle" fill="#666666">no data</text>"##,
            WIDTH / 2.0,
            HEIGHT / 2.0
        );
        svg.push_str("</svg>\n");
        return svg;
    }

    let max = series.max_latency().max(Y_FLOOR_MS);
    let count = series.len();
    let _ = writeln!(
        svg,
        r##"<text x="{}" y="{}" text-anchor="end" fill="#666666">{max} ms</text>"##,
        PADDING - 4.0,
        PADDING + 4.0
    );
    let _ = writeln!(
        svg,
        r##"<text x="{}" y="{}" text-anchor="end" fill="#666666">0</text>"##,
        PADDING - 4.0,
        baseline + 4.0
    );
    if let (Some(first), Some(last)) = (series.first_tick(), series.last_tick()) {
        let label_y = baseline + 16.0;
        let _ = writeln!(
            svg,
            r##"<text x="{PADDING}" y="{label_y}" fill="#666666">{first}</text>"##
        );
        let _ = writeln!(
            svg,
            r##"<text x="{right}" y="{label_y}" text-anchor="end" fill="#666666">{last}</text>"##
        );
    }

    for (position, name) in series.node_names().into_iter().enumerate() {
        let color = node_color(name);
        let label = escape_xml(name);
        let points: Vec<String> = series
            .iter()
            .enumerate()
            .map(|(index, (_, sample))| {
                let millis = sample.get(name).copied().unwrap_or(0);
                format!("{:.1},{:.1}", x_at(index, count), y_at(millis, max))
            })
            .collect();
        let _ = writeln!(
            svg,
            r#"<polyline fill="none" stroke="{color}" stroke-width="1.5" points="{}"><title>{label}</title></polyline>"#,
            points.join(" ")
        );

        let column = position % LEGEND_COLUMNS;
        let row = position / LEGEND_COLUMNS;
        let legend_x = PADDING + column as f64 * LEGEND_COLUMN_WIDTH;
        let legend_y = 12.0 + row as f64 * 12.0;
        let _ = writeln!(
            svg,
            r#"<text x="{legend_x}" y="{legend_y}" fill="{color}">{label}</text>"#
        );
    }

    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Sample, Tick};

    fn tick(text: &str) -> Tick {
        Tick::parse(text).unwrap()
    }

    fn sample(entries: &[(&str, u64)]) -> Sample {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_series_is_a_complete_document() {
        let svg = render_svg(&TimeSeries::new(5));
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("no data"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(!svg.contains("<polyline"));
    }

    #[test]
    fn points_scale_against_the_floor() {
        let series = TimeSeries::new(5)
            .record(tick("2024-01-01 00:00"), sample(&[("a", 50)]))
            .record(tick("2024-01-01 00:01"), sample(&[("a", 0)]));
        let svg = render_svg(&series);

        // max is the 100 ms floor: 50 ms sits halfway up the plot area.
        assert!(svg.contains(r#"points="40.0,130.0 680.0,220.0""#), "{svg}");
        assert!(svg.contains(">100 ms<"));
    }

    #[test]
    fn single_tick_is_centered_and_names_are_escaped() {
        let series =
            TimeSeries::new(5).record(tick("2024-01-01 00:00"), sample(&[("a<b>&c", 400)]));
        let svg = render_svg(&series);

        assert!(svg.contains(r#"points="360.0,40.0""#), "{svg}");
        assert!(svg.contains("a&lt;b&gt;&amp;c"));
        assert!(!svg.contains("a<b>"));
    }

    #[test]
    fn colors_are_stable_per_name() {
        assert_eq!(node_color("tokyo"), node_color("tokyo"));
        assert_eq!(node_color("a"), format!("hsl({}, 65%, 45%)", 0xe40c_292c_u32 % 360));
        let series = TimeSeries::new(5)
            .record(tick("2024-01-01 00:00"), sample(&[("tokyo", 20), ("paris", 30)]));
        assert_eq!(render_svg(&series), render_svg(&series.clone()));
        assert!(render_svg(&series).contains(&node_color("tokyo")));
    }
}
