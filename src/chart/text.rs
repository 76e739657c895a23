use std::fmt;

use super::{BUCKET_BOUNDS, Bucket};
use crate::store::{Tick, TimeSeries};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRow {
    pub name: String,
    /// One glyph per tick, oldest first.
    pub glyphs: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChart {
    pub first_tick: Option<Tick>,
    pub last_tick: Option<Tick>,
    pub rows: Vec<ChartRow>,
}

impl TextChart {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One row per node name seen anywhere in the series, sorted by name. A node
/// missing at a tick is drawn as unreachable.
pub fn render_text(series: &TimeSeries) -> TextChart {
    let rows = series
        .node_names()
        .into_iter()
        .map(|name| ChartRow {
            name: name.to_string(),
            glyphs: series
                .iter()
                .map(|(_, sample)| Bucket::of(sample.get(name).copied().unwrap_or(0)).glyph())
                .collect(),
        })
        .collect();

    TextChart {
        first_tick: series.first_tick().copied(),
        last_tick: series.last_tick().copied(),
        rows,
    }
}

pub fn legend() -> String {
    let [fast, moderate, slow] = BUCKET_BOUNDS;
    format!(
        "Legend: {} <{fast}ms  {} {fast}-{moderate}ms  {} {moderate}-{slow}ms  {} >={slow}ms  {} offline",
        Bucket::Fast.glyph(),
        Bucket::Moderate.glyph(),
        Bucket::Slow.glyph(),
        Bucket::VerySlow.glyph(),
        Bucket::Unreachable.glyph(),
    )
}

impl fmt::Display for TextChart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.first_tick, &self.last_tick) {
            (Some(first), Some(last)) if !self.rows.is_empty() => {
                let ticks = self.rows[0].glyphs.len();
                writeln!(f, "Latency {first} -> {last} ({ticks} ticks)")?;
                let width = self
                    .rows
                    .iter()
                    .map(|row| row.name.chars().count())
                    .max()
                    .unwrap_or(0);
                for row in &self.rows {
                    writeln!(f, "{:<width$}  {}", row.name, row.glyphs.concat())?;
                }
            }
            _ => writeln!(f, "No latency data recorded yet.")?,
        }
        write!(f, "{}", legend())
    }
}
