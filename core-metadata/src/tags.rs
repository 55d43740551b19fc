//! Ordered tag sources per catalog field.
//!
//! Containers spell the same concept differently: an MP4 stores the release
//! date under `©day`, Vorbis comments under `DATE`, ID3v2 under `TDRC`/`TYER`.
//! lofty maps most of these onto a common [`ItemKey`], but keys it does not
//! know arrive as [`ItemKey::Unknown`]. Each field below lists its candidates
//! in priority order; the first candidate with a non-empty value in any tag
//! wins, and tags are visited primary tag first.

use lofty::tag::{ItemKey, Tag};

/// Where a candidate value lives inside a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagSource {
    /// A key lofty understands across containers.
    Key(ItemKey),
    /// A raw container key, compared case-insensitively against unknown items.
    Custom(&'static str),
}

pub fn title() -> [TagSource; 2] {
    [
        TagSource::Key(ItemKey::TrackTitle),
        TagSource::Key(ItemKey::AlbumTitle),
    ]
}

pub fn author() -> [TagSource; 4] {
    [
        TagSource::Key(ItemKey::TrackArtist),
        TagSource::Key(ItemKey::AlbumArtist),
        TagSource::Key(ItemKey::Composer),
        TagSource::Custom("AUTHOR"),
    ]
}

pub fn genre() -> [TagSource; 3] {
    [
        TagSource::Key(ItemKey::Genre),
        TagSource::Custom("GENRE"),
        TagSource::Custom("gnre"),
    ]
}

pub fn year() -> [TagSource; 5] {
    [
        TagSource::Key(ItemKey::Year),
        TagSource::Key(ItemKey::RecordingDate),
        TagSource::Key(ItemKey::OriginalReleaseDate),
        TagSource::Custom("DATE"),
        TagSource::Custom("\u{a9}day"),
    ]
}

/// First non-empty value for `sources` across `tags`.
pub fn resolve(tags: &[&Tag], sources: &[TagSource]) -> Option<String> {
    sources
        .iter()
        .find_map(|source| tags.iter().find_map(|tag| lookup(tag, source)))
}

/// Year from the first candidate whose value starts with a four digit year.
pub fn resolve_year(tags: &[&Tag], sources: &[TagSource]) -> Option<i32> {
    sources.iter().find_map(|source| {
        tags.iter()
            .filter_map(|tag| lookup(tag, source))
            .find_map(|value| parse_year(&value))
    })
}

fn lookup(tag: &Tag, source: &TagSource) -> Option<String> {
    let raw = match source {
        TagSource::Key(key) => tag.get_string(key),
        TagSource::Custom(name) => tag.items().find_map(|item| match item.key() {
            ItemKey::Unknown(key) if key.eq_ignore_ascii_case(name) => item.value().text(),
            _ => None,
        }),
    }?;

    let normalized = normalize_text(raw);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Leading four-digit year of `2004`, `2004-05-01`, `2004-05-01T10:00`.
pub fn parse_year(value: &str) -> Option<i32> {
    let digits: String = value.trim().chars().take(4).collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|year| *year > 0)
}

/// Collapses whitespace runs and drops control characters.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}
