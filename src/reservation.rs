//! Advisory file-reservation rules shared by the broker and the client.
//!
//! The broker applies them authoritatively when handling `reserve`; the
//! client applies the same rules as a pre-flight guard before file-writing
//! tool calls. A path ending in `/` is a directory reservation and subsumes
//! everything beneath it.

use crate::error::ReservationError;
use crate::protocol::{Reservation, ReservationMap};

/// Normalize one raw path per the shared rules. Returns the empty string for
/// inputs that reduce to nothing (callers reject those as invalid).
pub fn normalize_path(raw: &str) -> String {
    normalize_inner(raw, None)
}

/// Client-side variant: relative inputs are resolved against `base` before
/// normalization.
pub fn normalize_path_with_base(raw: &str, base: &str) -> String {
    normalize_inner(raw, Some(base))
}

fn normalize_inner(raw: &str, base: Option<&str>) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let is_dir = trimmed.ends_with('/') || trimmed.ends_with('\\');

    let mut path = trimmed.replace('\\', "/");
    if let Some(base) = base {
        if !is_absolute(&path) {
            path = format!("{}/{path}", base.trim_end_matches(['/', '\\']).replace('\\', "/"));
        }
    }

    let collapsed = collapse_slashes(&path);
    let stripped = collapsed.trim_end_matches('/');

    if is_dir {
        format!("{stripped}/")
    } else {
        stripped.to_string()
    }
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    // Windows drive prefix, e.g. C:/ or C:\ (already forward-slashed).
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push(ch);
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }
    out
}

/// Normalize and deduplicate a reserve request, preserving first-seen order.
pub fn normalize_paths(raw: &[String]) -> Result<Vec<String>, ReservationError> {
    if raw.is_empty() {
        return Err(ReservationError::Empty);
    }

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for input in raw {
        let normalized = normalize_path(input);
        if normalized.is_empty() {
            return Err(ReservationError::InvalidPath(input.clone()));
        }
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    Ok(out)
}

/// Two normalized paths overlap iff they are equal, or either is a directory
/// reservation that contains the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    dir_contains(a, b) || dir_contains(b, a)
}

fn dir_contains(dir: &str, other: &str) -> bool {
    dir.ends_with('/') && (other.starts_with(dir) || other == &dir[..dir.len() - 1])
}

/// First conflict between `candidates` and any reservation held by an agent
/// other than `requester_id`. Returns the offending candidate path, the
/// owning agent's id, and the owner's reservation.
pub fn find_conflict<'a>(
    candidates: &[String],
    reservations: &'a ReservationMap,
    requester_id: &str,
) -> Option<(String, &'a str, &'a Reservation)> {
    for candidate in candidates {
        for (owner_id, reservation) in reservations {
            if owner_id == requester_id {
                continue;
            }
            if reservation
                .paths
                .iter()
                .any(|held| paths_overlap(candidate, held))
            {
                return Some((candidate.clone(), owner_id.as_str(), reservation));
            }
        }
    }
    None
}
