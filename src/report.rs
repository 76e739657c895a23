//! Markdown status table for the nodes of a single pass, and the block that
//! gets written into the host document.
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::fmt::Write;

use crate::chart::TextChart;
use crate::models::Node;
use crate::probe::Latency;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn format_offset(offset: &FixedOffset) -> String {
    let total = offset.local_minus_utc();
    let sign = if total < 0 { '-' } else { '+' };
    let minutes = total.abs() / 60;
    format!("UTC{sign}{:02}:{:02}", minutes / 60, minutes % 60)
}

fn format_epoch(epoch: i64, offset: &FixedOffset) -> String {
    match offset.timestamp_opt(epoch, 0).single() {
        // Zero-value timestamps from the dashboard mean "never".
        Some(at) if epoch > 0 => at.format(TIME_FORMAT).to_string(),
        _ => "-".to_string(),
    }
}

/// Probing is authoritative for the status column; the dashboard's own flag
/// is shown next to it.
pub fn render_status_table(
    results: &[(Node, Latency)],
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let mut table = String::new();
    let reachable = results.iter().filter(|(_, l)| l.is_reachable()).count();
    let _ = writeln!(table, "**{reachable}/{} nodes reachable**", results.len());
    table.push('\n');
    table.push_str("| Status | Name | Address | Dashboard | Last active | Latency |\n");
    table.push_str("|----|----|----|----|----|----|\n");

    for (node, latency) in results {
        let status = if latency.is_reachable() { "🟢 online" } else { "🔴 offline" };
        let dashboard = match node.reported_online {
            Some(true) => "online",
            Some(false) => "offline",
            None => "-",
        };
        let last_active = node
            .last_active_at
            .map(|epoch| format_epoch(epoch, &offset))
            .unwrap_or_else(|| "-".to_string());
        let latency_cell = match latency {
            Latency::Measured { millis, via } => format!("{millis} ms ({via})"),
            Latency::Unreachable(reason) => format!("- ({reason})"),
        };
        let _ = writeln!(
            table,
            "| {status} | {} | {} | {dashboard} | {last_active} | {latency_cell} |",
            escape_cell(&node.name),
            escape_cell(node.host.as_deref().unwrap_or("-")),
        );
    }

    table.push('\n');
    let _ = write!(
        table,
        "_Updated at {} ({})_",
        now.with_timezone(&offset).format(TIME_FORMAT),
        format_offset(&offset)
    );
    table
}

/// The full Markdown block: heading, status table, glyph chart, and an
/// optional link to the SVG rendering.
pub fn compose_block(status_table: &str, chart: &TextChart, svg_link: Option<&str>) -> String {
    let mut block = String::new();
    block.push_str("## 📊 Node latency\n\n");
    block.push_str(status_table);
    block.push_str("\n\n```text\n");
    let _ = writeln!(block, "{chart}");
    block.push_str("```\n");
    if let Some(link) = svg_link {
        let _ = writeln!(block, "\n![latency chart]({link})");
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::render_text;
    use crate::probe::{ProbeMethod, UnreachableReason};
    use crate::store::TimeSeries;

    fn node(name: &str, host: Option<&str>, last: Option<i64>, online: Option<bool>) -> Node {
        Node {
            name: name.to_string(),
            host: host.map(str::to_string),
            last_active_at: last,
            reported_online: online,
        }
    }

    #[test]
    fn table_shows_probe_and_dashboard_views() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        let results = vec![
            (
                node("tok|yo", Some("203.0.113.7"), Some(now.timestamp() - 30), Some(false)),
                Latency::Measured {
                    millis: 42,
                    via: ProbeMethod::Tls,
                },
            ),
            (
                node("paris", None, Some(-62_135_596_800), None),
                Latency::Unreachable(UnreachableReason::NoAddress),
            ),
        ];

        let table = render_status_table(&results, now, shanghai);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines[0], "**1/2 nodes reachable**");
        assert_eq!(
            lines[4],
            "| 🟢 online | tok\\|yo | 203.0.113.7 | offline | 2024-01-01 07:59:30 | 42 ms (TLS) |"
        );
        assert_eq!(lines[5], "| 🔴 offline | paris | - | - | - | - (no address) |");
        assert_eq!(lines.last().copied(), Some("_Updated at 2024-01-01 08:00:00 (UTC+08:00)_"));
    }

    #[test]
    fn negative_offsets_format_with_sign() {
        let offset = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        assert_eq!(format_offset(&offset), "UTC-05:30");
        assert_eq!(format_offset(&FixedOffset::east_opt(0).unwrap()), "UTC+00:00");
    }

    #[test]
    fn block_wraps_chart_in_a_code_fence() {
        let chart = render_text(&TimeSeries::new(3));
        let block = compose_block("TABLE", &chart, Some("latency.svg"));

        assert!(block.starts_with("## 📊 Node latency\n\nTABLE\n\n```text\nNo latency data"));
        assert!(block.contains("```\n\n![latency chart](latency.svg)\n"));
        assert!(!compose_block("TABLE", &chart, None).contains("!["));
    }
}
