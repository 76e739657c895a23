use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

pub const START_MARKER: &str = "<!-- NEZHA-STATUS-START -->";
pub const END_MARKER: &str = "<!-- NEZHA-STATUS-END -->";

/// Replaces whatever sits between the markers with `block`. When either
/// marker is missing the delimited block is appended instead.
pub fn inject(document: &str, block: &str, start: &str, end: &str) -> String {
    let delimited = format!("{start}\n{}\n{end}", block.trim_end_matches('\n'));

    if let Some(start_at) = document.find(start) {
        let body_at = start_at + start.len();
        if let Some(end_offset) = document[body_at..].find(end) {
            let after_at = body_at + end_offset + end.len();
            return format!("{}{delimited}{}", &document[..start_at], &document[after_at..]);
        }
    }

    let mut appended = document.to_string();
    if !appended.is_empty() {
        if !appended.ends_with('\n') {
            appended.push('\n');
        }
        appended.push('\n');
    }
    appended.push_str(&delimited);
    appended.push('\n');
    appended
}

/// Rewrites the marked region of the file at `path`, creating the file if needed.
pub fn update_file(path: &Path, block: &str) -> io::Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let updated = inject(&existing, block, START_MARKER, END_MARKER);
    fs::write(path, updated)?;
    info!(path = ?path, "Updated status document.");
    Ok(())
}
