//! Agent profiles and scored agent-kind detection
//!
//! Hosts differ in where transcripts live and which field carries the stable
//! message identifier (`uuid` vs `id`). Both differences are data-driven: a
//! profile table plus a scored rule set, no compile-time branching.

use crate::types::AgentKind;
use std::path::{Path, PathBuf};

/// Everything the engine needs to know about one host agent CLI.
#[derive(Debug)]
pub struct AgentProfile {
    pub kind: AgentKind,
    /// Field carrying the stable message identifier
    pub id_field: &'static str,
    /// Rewrite the first record's `title` with a `[Fork] ` prefix on fork
    pub fork_title_prefix: bool,
    /// Transcripts live in one flat directory instead of per-project subtrees
    flat_sessions: bool,
    /// Marker subtree under the home directory
    marker_subdir: &'static str,
    /// Environment variables hinting at this host
    env_markers: &'static [&'static str],
    /// Substring of the transcript path
    path_marker: &'static str,
}

/// Detection profiles in precedence order (ties resolve to the earlier row).
pub static PROFILES: &[AgentProfile] = &[
    AgentProfile {
        kind: AgentKind::Claude,
        id_field: "uuid",
        fork_title_prefix: false,
        flat_sessions: false,
        marker_subdir: ".claude/projects",
        env_markers: &["CLAUDECODE", "CLAUDE_PROJECT_DIR"],
        path_marker: ".claude/projects",
    },
    AgentProfile {
        kind: AgentKind::Droid,
        id_field: "id",
        fork_title_prefix: true,
        flat_sessions: true,
        marker_subdir: ".factory/sessions",
        env_markers: &["FACTORY_SESSION_ID"],
        path_marker: ".factory/sessions",
    },
];

static UNKNOWN_PROFILE: AgentProfile = AgentProfile {
    kind: AgentKind::Unknown,
    id_field: "uuid",
    fork_title_prefix: false,
    flat_sessions: true,
    marker_subdir: "",
    env_markers: &[],
    path_marker: "",
};

/// Minimum detection score before a profile wins.
const DETECT_THRESHOLD: u32 = 2;

impl AgentProfile {
    pub fn for_kind(kind: AgentKind) -> &'static AgentProfile {
        PROFILES
            .iter()
            .find(|p| p.kind == kind)
            .unwrap_or(&UNKNOWN_PROFILE)
    }

    /// Directory holding this host's transcripts for `project_root`.
    ///
    /// Claude-style hosts use a per-project subtree derived from the
    /// sanitized working directory; droid-style hosts use one flat directory.
    pub fn session_dir(&self, home: &Path, project_root: &Path) -> Option<PathBuf> {
        if self.marker_subdir.is_empty() {
            return None;
        }
        let base = home.join(self.marker_subdir);
        Some(if self.flat_sessions {
            base
        } else {
            base.join(sanitize_project_dir(project_root))
        })
    }

    fn score(
        &self,
        home: Option<&Path>,
        transcript_path: Option<&Path>,
        env_present: &dyn Fn(&str) -> bool,
    ) -> u32 {
        let mut score = 0;
        if let Some(home) = home {
            if !self.marker_subdir.is_empty() && home.join(self.marker_subdir).is_dir() {
                score += 2;
            }
        }
        if self.env_markers.iter().any(|v| env_present(v)) {
            score += 2;
        }
        if let Some(path) = transcript_path {
            if !self.path_marker.is_empty()
                && path.to_string_lossy().contains(self.path_marker)
            {
                score += 3;
            }
        }
        score
    }
}

/// Detect the host agent kind from ambient signals.
pub fn detect(transcript_path: Option<&Path>) -> AgentKind {
    detect_with(
        dirs::home_dir().as_deref(),
        transcript_path,
        &|var| std::env::var_os(var).is_some(),
    )
}

/// Detection with injected signals, for tests and the hook runner.
pub fn detect_with(
    home: Option<&Path>,
    transcript_path: Option<&Path>,
    env_present: &dyn Fn(&str) -> bool,
) -> AgentKind {
    let mut best: Option<(&AgentProfile, u32)> = None;
    for profile in PROFILES {
        let score = profile.score(home, transcript_path, env_present);
        if score >= DETECT_THRESHOLD && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((profile, score));
        }
    }
    best.map(|(p, _)| p.kind).unwrap_or(AgentKind::Unknown)
}

/// Encode an absolute path the way claude-style hosts name project subtrees:
/// every non-alphanumeric byte becomes `-`.
pub fn sanitize_project_dir(project_root: &Path) -> String {
    project_root
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_like_the_host() {
        assert_eq!(
            sanitize_project_dir(Path::new("/home/u/dev/proj")),
            "-home-u-dev-proj"
        );
        assert_eq!(
            sanitize_project_dir(Path::new("/tmp/my.app")),
            "-tmp-my-app"
        );
    }

    #[test]
    fn path_marker_alone_detects() {
        let kind = detect_with(
            None,
            Some(Path::new("/home/u/.claude/projects/-home-u-p/abc.jsonl")),
            &|_| false,
        );
        assert_eq!(kind, AgentKind::Claude);
    }

    #[test]
    fn env_marker_detects_droid() {
        let kind = detect_with(None, None, &|var| var == "FACTORY_SESSION_ID");
        assert_eq!(kind, AgentKind::Droid);
    }

    #[test]
    fn no_signal_falls_back_to_unknown() {
        let kind = detect_with(None, None, &|_| false);
        assert_eq!(kind, AgentKind::Unknown);
    }

    #[test]
    fn highest_score_wins() {
        // Droid env marker (+2) loses to a claude path marker plus env (+5).
        let kind = detect_with(
            None,
            Some(Path::new("/home/u/.claude/projects/-p/abc.jsonl")),
            &|var| var == "FACTORY_SESSION_ID" || var == "CLAUDECODE",
        );
        assert_eq!(kind, AgentKind::Claude);
    }

    #[test]
    fn session_dir_shapes() {
        let home = Path::new("/home/u");
        let root = Path::new("/home/u/dev/proj");

        let claude = AgentProfile::for_kind(AgentKind::Claude);
        assert_eq!(
            claude.session_dir(home, root).unwrap(),
            PathBuf::from("/home/u/.claude/projects/-home-u-dev-proj")
        );

        let droid = AgentProfile::for_kind(AgentKind::Droid);
        assert_eq!(
            droid.session_dir(home, root).unwrap(),
            PathBuf::from("/home/u/.factory/sessions")
        );
    }
}
