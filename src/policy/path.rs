//! Endpoint path patterns with `$$` wildcards.
//!
//! A `$$` matches any (possibly empty) run of characters within a single
//! path segment; it never crosses a `/`. `api/users/$$` matches
//! `api/users/123` but not `api/users/123/profile`, and `a$$f` matches both
//! `af` and `a123f`. Both patterns and request paths are compared in their
//! normalized form, with the leading `/` stripped.

use regex::Regex;

/// The wildcard token recognized in endpoint paths.
pub const WILDCARD: &str = "$$";

/// Check whether `path` matches the endpoint `pattern`.
///
/// Exact string equality short-circuits; a pattern without wildcards matches
/// nothing else. Otherwise the pattern is turned into an anchored regex with
/// each `$$` expanded to `[^/]*`.
pub fn matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if !pattern.contains(WILDCARD) {
        return false;
    }

    let expanded: String = pattern
        .split(WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[^/]*");

    match Regex::new(&format!("^{expanded}$")) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}

/// Extract the values captured by each `$$` in `pattern` from a `path` that
/// is already known to match.
///
/// Both strings are split on `/`; within a wildcard segment, the static text
/// around each `$$` anchors the slice taken from the corresponding request
/// segment, resolved left to right. A segment that is a bare `$$` captures
/// the entire request segment. Empty captures are legal.
pub fn capture_segments(pattern: &str, path: &str) -> Vec<String> {
    let mut captured = Vec::new();
    let request_segments: Vec<&str> = path.split('/').collect();

    for (i, segment_pattern) in pattern.split('/').enumerate() {
        if !segment_pattern.contains(WILDCARD) {
            continue;
        }
        let Some(segment) = request_segments.get(i) else {
            continue;
        };
        capture_in_segment(segment_pattern, segment, &mut captured);
    }

    captured
}

/// Slice the wildcard captures out of one request segment.
fn capture_in_segment(segment_pattern: &str, segment: &str, out: &mut Vec<String>) {
    let anchors: Vec<&str> = segment_pattern.split(WILDCARD).collect();
    let mut pos = anchors[0].len().min(segment.len());

    for (i, anchor) in anchors.iter().enumerate().skip(1) {
        let last = i == anchors.len() - 1;
        let end = if last {
            // The final anchor is the segment suffix.
            segment
                .len()
                .checked_sub(anchor.len())
                .map_or(pos, |e| e.max(pos))
        } else if anchor.is_empty() {
            pos
        } else {
            segment[pos..].find(anchor).map_or(segment.len(), |at| pos + at)
        };

        out.push(segment.get(pos..end).unwrap_or_default().to_string());
        pos = (end + anchor.len()).min(segment.len());
    }
}
