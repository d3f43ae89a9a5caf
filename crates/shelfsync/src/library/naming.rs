//! Names of managed entries.
//!
//! Everything the reconciler may delete is recognized by these patterns, so
//! planning and cleanup must both go through this module.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::candidate::{LibraryOwner, RecommendationCandidate};

pub const POINTER_EXTENSION: &str = "strm";
pub const SIDECAR_EXTENSION: &str = "nfo";
pub const POSTER_SUFFIX: &str = "-poster.jpg";
pub const FANART_SUFFIX: &str = "-fanart.jpg";
pub const FOLDER_POSTER: &str = "poster.jpg";
pub const FOLDER_FANART: &str = "fanart.jpg";

const FLAT_SUFFIXES: &[&str] = &[".strm", ".nfo", POSTER_SUFFIX, FANART_SUFFIX];
const MAX_COMPONENT_CHARS: usize = 150;

static RE_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>"/\\|?*\x00-\x1f]"#).unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
/// `Title (Year)`, `Title (Year) [id]` or `Title [id]`. Years are `u16`, so
/// four or five digits.
static RE_MANAGED_BASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+ (?:\(\d{4,5}\)(?: \[[^\[\]]+\])?|\[[^\[\]]+\])$").unwrap()
});

/// Makes `raw` safe as a single path component.
pub fn sanitize_component(raw: &str) -> String {
    let replaced = raw.replace(':', " -");
    let cleaned = RE_INVALID.replace_all(&replaced, " ");
    let collapsed = RE_WHITESPACE.replace_all(cleaned.trim(), " ");
    let trimmed = collapsed
        .trim_start_matches(['.', ' '])
        .trim_end_matches(['.', ' '])
        .trim();

    let mut result: String = trimmed.chars().take(MAX_COMPONENT_CHARS).collect();
    result = result.trim_end_matches(['.', ' ']).to_string();
    if result.is_empty() {
        "Untitled".to_string()
    } else {
        result
    }
}

/// Sanitized id for the ` [id]` suffix. Brackets become parentheses so the
/// suffix stays a single bracketed group.
fn disambiguator(id: &str) -> String {
    sanitize_component(&id.replace('[', "(").replace(']', ")"))
}

fn title_year(candidate: &RecommendationCandidate) -> Option<String> {
    candidate
        .year
        .map(|year| format!("{} ({:04})", sanitize_component(&candidate.title), year))
}

/// Base entry names for `candidates`, index for index.
///
/// The base is `Title (Year)`. Every member of a group whose bases collide
/// (case-insensitively) gets ` [id]` appended, as does any candidate without
/// a year.
pub fn assign_base_names(candidates: &[&RecommendationCandidate]) -> Vec<String> {
    let mut groups: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        if let Some(base) = title_year(candidate) {
            *groups.entry(base.to_lowercase()).or_insert(0) += 1;
        }
    }

    candidates
        .iter()
        .map(|candidate| match title_year(candidate) {
            Some(base) if groups.get(&base.to_lowercase()).copied() == Some(1) => base,
            Some(base) => format!("{} [{}]", base, disambiguator(&candidate.id)),
            None => format!(
                "{} [{}]",
                sanitize_component(&candidate.title),
                disambiguator(&candidate.id)
            ),
        })
        .collect()
}

/// Current folder convention: `<display name> (<user id>)`.
pub fn user_folder_name(owner: &LibraryOwner) -> String {
    let display = if owner.display_name.trim().is_empty() {
        &owner.user_id
    } else {
        &owner.display_name
    };
    format!(
        "{} ({})",
        sanitize_component(display),
        sanitize_component(&owner.user_id)
    )
}

/// Folder convention used before display names were included.
pub fn legacy_user_folder_name(owner: &LibraryOwner) -> String {
    sanitize_component(&owner.user_id)
}

pub fn is_managed_base(name: &str) -> bool {
    RE_MANAGED_BASE.is_match(name)
}

/// Whether an entry directly under a user folder belongs to the reconciler,
/// in either output mode.
pub fn is_managed_entry(name: &str, is_dir: bool) -> bool {
    if is_dir {
        return is_managed_base(name);
    }
    FLAT_SUFFIXES.iter().any(|suffix| {
        name.strip_suffix(suffix)
            .map(is_managed_base)
            .unwrap_or(false)
    })
}

/// Whether a regular file inside an item folder was written by the
/// reconciler. Symlinks in item folders are always managed.
pub fn is_managed_item_file(name: &str) -> bool {
    name == FOLDER_POSTER
        || name == FOLDER_FANART
        || name.ends_with(".strm")
        || name.ends_with(".nfo")
}
