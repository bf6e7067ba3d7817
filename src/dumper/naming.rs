//! Collision-proof attachment file names.
//!
//! Every mirrored attachment is stored as `ID-{id}__{filename}`. The id is
//! unique within an issue, so the prefix alone keeps names distinct even when
//! two attachments share a filename.

const TARGET_PREFIX: &str = "ID-";
const TARGET_SEPARATOR: &str = "__";
const MAX_FILENAME_BYTES: usize = 200;
const FALLBACK_FILENAME: &str = "attachment";

fn is_forbidden(ch: char) -> bool {
    matches!(ch, '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*') || ch.is_control()
}

fn truncate_on_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Make an untrusted attachment filename safe to use as a single path component.
pub fn sanitize_filename(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|ch| if is_forbidden(ch) { '_' } else { ch })
        .collect();
    let trimmed = replaced.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());
    let capped = truncate_on_char_boundary(trimmed, MAX_FILENAME_BYTES)
        .trim_end_matches(|ch: char| ch == '.' || ch.is_whitespace());
    if capped.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        capped.to_string()
    }
}

/// Ids come from the export document too. Every byte outside `[A-Za-z0-9]`
/// becomes `%XX`, which keeps distinct ids distinct and `_` out of the prefix.
fn encode_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub fn target_name(id: &str, filename: &str) -> String {
    format!(
        "{TARGET_PREFIX}{}{TARGET_SEPARATOR}{}",
        encode_id(id),
        sanitize_filename(filename)
    )
}

/// Split an on-disk name back into `(id, filename)`.
pub fn parse_target_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(TARGET_PREFIX)?;
    let (id, filename) = rest.split_once(TARGET_SEPARATOR)?;
    if id.is_empty() || filename.is_empty() {
        return None;
    }
    Some((id, filename))
}
