//! Ignore pattern matching
//!
//! Patterns are interpreted against normalized relative paths:
//! - `*` matches any run of non-separator characters
//! - a trailing `/` marks a directory prefix
//! - patterns containing `/` are anchored to the project root
//! - single-segment patterns match at any depth
//!
//! A path is ignored iff some ignore pattern matches and no force-include
//! pattern matches. Matching is a pure function of the compiled pattern set
//! and the candidate path; the matcher is built once per scan and reused.

/// One compiled pattern.
#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<String>,
    /// Trailing `/` in the source pattern
    dir_only: bool,
    /// Contains `/` (after stripping a trailing one): match from the root
    anchored: bool,
}

impl Pattern {
    fn compile(source: &str) -> Option<Pattern> {
        let dir_only = source.ends_with('/');
        let trimmed = source.trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        let segments: Vec<String> = trimmed.split('/').map(String::from).collect();
        let anchored = segments.len() > 1;
        Some(Pattern {
            segments,
            dir_only,
            anchored,
        })
    }

    /// `candidate` holds the path segments; `is_dir` reflects a trailing `/`.
    fn matches(&self, candidate: &[&str], is_dir: bool) -> bool {
        if self.anchored {
            if self.segments.len() > candidate.len() {
                return false;
            }
            let prefix_match = self
                .segments
                .iter()
                .zip(candidate)
                .all(|(pat, seg)| segment_matches(pat, seg));
            if !prefix_match {
                return false;
            }
            // A proper prefix always names a directory; an exact-length match
            // must itself be a directory for dir-only patterns.
            !(self.dir_only && self.segments.len() == candidate.len() && !is_dir)
        } else {
            let pat = &self.segments[0];
            candidate.iter().enumerate().any(|(i, seg)| {
                if !segment_matches(pat, seg) {
                    return false;
                }
                !(self.dir_only && i == candidate.len() - 1 && !is_dir)
            })
        }
    }
}

/// Match one path segment against one pattern segment with `*` wildcards.
fn segment_matches(pattern: &str, segment: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == segment;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = segment;

    // First part is a literal prefix, last part a literal suffix.
    let first = parts[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = parts[parts.len() - 1];
    if parts.len() > 1 {
        if rest.len() < last.len() || !rest.ends_with(last) {
            return false;
        }
        rest = &rest[..rest.len() - last.len()];
    }

    for middle in &parts[1..parts.len() - 1] {
        if middle.is_empty() {
            continue;
        }
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

/// Compiled ignore/force-include pattern sets.
#[derive(Debug)]
pub struct IgnoreMatcher {
    ignore: Vec<Pattern>,
    force_include: Vec<Pattern>,
}

impl IgnoreMatcher {
    pub fn new<I, F>(ignore_patterns: I, force_include: F) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        Self {
            ignore: ignore_patterns
                .into_iter()
                .filter_map(|p| Pattern::compile(p.as_ref()))
                .collect(),
            force_include: force_include
                .into_iter()
                .filter_map(|p| Pattern::compile(p.as_ref()))
                .collect(),
        }
    }

    /// Whether `rel_path` is excluded from snapshots.
    ///
    /// Directories are tested with a trailing `/`.
    pub fn ignored(&self, rel_path: &str) -> bool {
        let is_dir = rel_path.ends_with('/');
        let trimmed = rel_path.trim_end_matches('/');
        if trimmed.is_empty() {
            return false;
        }
        let segments: Vec<&str> = trimmed.split('/').collect();

        let hit = self.ignore.iter().any(|p| p.matches(&segments, is_dir));
        if !hit {
            return false;
        }
        !self
            .force_include
            .iter()
            .any(|p| p.matches(&segments, is_dir))
    }
}
