//! Deterministic renderings of a latency series: a glyph grid for Markdown
//! and an SVG line chart.
pub mod svg;
pub mod text;

pub use svg::render_svg;
pub use text::{TextChart, render_text};

/// Upper bounds (exclusive) of the latency buckets, in milliseconds.
pub const BUCKET_BOUNDS: [u64; 3] = [50, 100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Unreachable,
    Fast,
    Moderate,
    Slow,
    VerySlow,
}

impl Bucket {
    pub fn of(millis: u64) -> Self {
        match millis {
            0 => Bucket::Unreachable,
            m if m < BUCKET_BOUNDS[0] => Bucket::Fast,
            m if m < BUCKET_BOUNDS[1] => Bucket::Moderate,
            m if m < BUCKET_BOUNDS[2] => Bucket::Slow,
            _ => Bucket::VerySlow,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Bucket::Unreachable => "⬛",
            Bucket::Fast => "🟩",
            Bucket::Moderate => "🟨",
            Bucket::Slow => "🟧",
            Bucket::VerySlow => "🟥",
        }
    }
}

/// FNV-1a, used to derive colors that stay the same across runs.
pub(crate) fn stable_hash(text: &str) -> u32 {
    text.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_edges() {
        assert_eq!(Bucket::of(0), Bucket::Unreachable);
        assert_eq!(Bucket::of(1), Bucket::Fast);
        assert_eq!(Bucket::of(49), Bucket::Fast);
        assert_eq!(Bucket::of(50), Bucket::Moderate);
        assert_eq!(Bucket::of(99), Bucket::Moderate);
        assert_eq!(Bucket::of(100), Bucket::Slow);
        assert_eq!(Bucket::of(199), Bucket::Slow);
        assert_eq!(Bucket::of(200), Bucket::VerySlow);
        assert_eq!(Bucket::of(u64::MAX), Bucket::VerySlow);
    }

    #[test]
    fn fnv1a_reference_values() {
        assert_eq!(stable_hash(""), 0x811c_9dc5);
        assert_eq!(stable_hash("a"), 0xe40c_292c);
        assert_eq!(stable_hash("foobar"), 0xbf9c_f968);
    }
}
