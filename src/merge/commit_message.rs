//! Merge commit message derived from a request description.

use std::sync::OnceLock;

use regex::Regex;

/// Used when the description has no implementation section.
pub const PLACEHOLDER_MESSAGE: &str = "Automated delivery merge.";

const TRUNCATION_MARKER: &str = "\n\n[truncated]";

fn heading_regex() -> Option<&'static Regex> {
    static HEADING: OnceLock<Option<Regex>> = OnceLock::new();
    HEADING
        .get_or_init(|| Regex::new(r"^(?P<hashes>#{1,6})[ \t]+(?P<title>.*?)[ \t#]*$").ok())
        .as_ref()
}

/// Level of a markdown heading line and whether it is the implementation heading.
fn heading(line: &str) -> Option<(usize, bool)> {
    let caps = heading_regex()?.captures(line.trim_end())?;
    let level = caps["hashes"].len();
    let title = caps["title"].trim().to_ascii_lowercase();
    Some((level, title.starts_with("implementation")))
}

/// Body of the first `Implementation` section, up to the next heading of the
/// same or a higher level. `None` if the section is missing or empty.
pub fn implementation_section(description: &str) -> Option<String> {
    let mut lines = description.lines();
    let level = lines.by_ref().find_map(|line| match heading(line) {
        Some((level, true)) => Some(level),
        _ => None,
    })?;

    let body: Vec<&str> = lines
        .take_while(|line| !matches!(heading(line), Some((next, _)) if next <= level))
        .collect();
    let body = body.join("\n");
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Commit message for a merge: the implementation section truncated to
/// `limit` characters, or [`PLACEHOLDER_MESSAGE`].
pub fn commit_message(description: &str, limit: usize) -> String {
    match implementation_section(description) {
        Some(section) => truncate(&section, limit),
        None => PLACEHOLDER_MESSAGE.to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if limit <= marker_len {
        return text.chars().take(limit).collect();
    }
    let keep = limit - marker_len;
    let cut = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(index, _)| index);
    format!("{}{}", text[..cut].trim_end(), TRUNCATION_MARKER)
}

/// Commit title, e.g. `Add login form (#50)`.
pub fn commit_title(title: &str, number: u64) -> String {
    format!("{} (#{})", title.trim(), number)
}
