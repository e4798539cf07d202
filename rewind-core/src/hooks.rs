//! Hook payload handling and the checkpoint decision engine
//!
//! A hook invocation is one short-lived process fed a single JSON payload on
//! standard input. The decision rules run in a fixed order: structural events
//! always snapshot, then the per-session debounce, then tree change
//! detection, then tool significance. Per-session debounce state lives in
//! `session.json` at the storage root, keyed by session id, written
//! atomically; concurrent hook processes tolerate each other because each
//! writes its own session's entry under a distinct checkpoint name.

use crate::config::Config;
use crate::error::Result;
use crate::layout::{read_json_opt, write_json_atomic, StorageLayout};
use crate::linker::ContextLinker;
use crate::snapshot::{CheckpointStore, CreateOutcome, TranscriptAttachment};
use crate::transcript::{self, AgentProfile, TranscriptParser};
use crate::types::{AgentKind, CheckpointContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Hook event names as host agents send them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    Stop,
    SubagentStart,
    SubagentStop,
    PreCompact,
    Notification,
    #[serde(other)]
    Unknown,
}

impl HookEvent {
    /// Session/subagent lifecycle boundaries always produce a checkpoint.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            HookEvent::SessionStart
                | HookEvent::SessionEnd
                | HookEvent::SubagentStart
                | HookEvent::SubagentStop
        )
    }
}

/// The JSON payload read from standard input.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HookPayload {
    pub hook_event_name: Option<HookEvent>,
    pub session_id: Option<String>,
    pub cwd: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub prompt: Option<String>,
    pub agent_name: Option<String>,
}

/// Outcome of the decision rules.
#[derive(Debug, Clone)]
pub struct HookDecision {
    pub should_create: bool,
    pub reason: String,
    pub force: bool,
    pub update_debounce_timer: bool,
}

impl HookDecision {
    fn skip(reason: &str) -> Self {
        Self {
            should_create: false,
            reason: reason.to_string(),
            force: false,
            update_debounce_timer: false,
        }
    }
}

/// Tool kinds that are always significant.
const ALWAYS_SIGNIFICANT: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Tool kinds treated as shell commands.
const SHELL_TOOLS: &[&str] = &["Bash", "Shell"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionState {
    last_checkpoint_at: DateTime<Utc>,
    agent_kind: AgentKind,
}

type SessionMap = BTreeMap<String, SessionState>;

pub struct HookEngine<'a> {
    layout: &'a StorageLayout,
    config: &'a Config,
}

impl<'a> HookEngine<'a> {
    pub fn new(layout: &'a StorageLayout, config: &'a Config) -> Self {
        Self { layout, config }
    }

    /// Run the decision rules in order.
    pub fn decide(&self, payload: &HookPayload, now: DateTime<Utc>) -> Result<HookDecision> {
        let event = payload.hook_event_name.unwrap_or(HookEvent::Unknown);

        if event.is_structural() {
            return Ok(HookDecision {
                should_create: true,
                reason: "structural event".to_string(),
                force: true,
                update_debounce_timer: false,
            });
        }

        if let Some(session_id) = &payload.session_id {
            if let Some(state) = self.session_state(session_id)? {
                let age = now.signed_duration_since(state.last_checkpoint_at);
                if age.num_seconds() >= 0
                    && (age.num_seconds() as u64) < self.config.min_interval_seconds
                {
                    return Ok(HookDecision::skip("anti-spam"));
                }
            }
        }

        let store = CheckpointStore::new(self.layout, self.config);
        if let Some(latest) = store.latest()? {
            if latest.signature == store.current_signature()? {
                return Ok(HookDecision::skip("no changes"));
            }
        }

        if let Some(tool) = payload.tool_name.as_deref() {
            if ALWAYS_SIGNIFICANT.contains(&tool) {
                // File write/edit kinds pass unconditionally.
            } else if SHELL_TOOLS.contains(&tool) && !self.is_destructive(payload) {
                return Ok(HookDecision::skip("insignificant shell command"));
            }
        }

        Ok(HookDecision {
            should_create: true,
            reason: "significant change".to_string(),
            force: false,
            update_debounce_timer: true,
        })
    }

    fn is_destructive(&self, payload: &HookPayload) -> bool {
        let command = payload
            .tool_input
            .as_ref()
            .and_then(|input| input.get("command"))
            .and_then(|c| c.as_str())
            .unwrap_or("");
        self.config
            .destructive_patterns
            .iter()
            .any(|pattern| command.contains(pattern.as_str()))
    }

    fn session_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        let map: SessionMap =
            read_json_opt(&self.layout.session_state_path())?.unwrap_or_default();
        Ok(map.get(session_id).cloned())
    }

    /// Record a checkpoint time for the session's debounce window.
    pub fn mark_checkpoint(
        &self,
        session_id: &str,
        agent_kind: AgentKind,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let path = self.layout.session_state_path();
        let mut map: SessionMap = read_json_opt(&path)?.unwrap_or_default();
        map.insert(
            session_id.to_string(),
            SessionState {
                last_checkpoint_at: now,
                agent_kind,
            },
        );
        write_json_atomic(&path, &map)
    }

    /// Drop session entries idle beyond the retention window.
    pub fn sweep_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.config.max_age_days == 0 {
            return Ok(0);
        }
        let path = self.layout.session_state_path();
        let mut map: SessionMap = read_json_opt(&path)?.unwrap_or_default();
        let cutoff = now - chrono::Duration::days(self.config.max_age_days as i64);
        let before = map.len();
        map.retain(|_, state| state.last_checkpoint_at >= cutoff);
        let dropped = before - map.len();
        if dropped > 0 {
            write_json_atomic(&path, &map)?;
        }
        Ok(dropped)
    }
}

/// Event → checkpoint description mapping.
pub fn describe(payload: &HookPayload) -> String {
    match payload.hook_event_name.unwrap_or(HookEvent::Unknown) {
        HookEvent::SessionStart => "session start".to_string(),
        HookEvent::SessionEnd => "session end".to_string(),
        HookEvent::SubagentStart => "subagent start".to_string(),
        HookEvent::SubagentStop => "subagent stop".to_string(),
        HookEvent::Stop => "agent stop".to_string(),
        HookEvent::PreCompact => "before compact".to_string(),
        HookEvent::UserPromptSubmit => match payload.prompt.as_deref() {
            Some(prompt) => format!("prompt: {}", truncate(prompt, 48)),
            None => "prompt".to_string(),
        },
        HookEvent::PreToolUse => match payload.tool_name.as_deref() {
            Some(tool) => format!("before {}", tool),
            None => "before tool".to_string(),
        },
        HookEvent::PostToolUse => match payload.tool_name.as_deref() {
            Some(tool) => format!("after {}", tool),
            None => "after tool".to_string(),
        },
        HookEvent::Notification => "notification".to_string(),
        HookEvent::Unknown => "hook event".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut.trim_end())
    }
}

/// What one hook invocation did.
#[derive(Debug)]
pub enum HookAction {
    Created { checkpoint: String },
    Skipped { reason: String },
}

/// Full hook invocation: decide, snapshot, link chat context, update state.
///
/// Errors here are for the runner to log; it must still exit 0.
pub fn handle_hook(payload: &HookPayload) -> Result<HookAction> {
    let project_root = resolve_project_root(payload);
    let config = Config::load_for_project(&project_root);
    let layout = StorageLayout::resolve(&project_root, config.storage)?;
    let engine = HookEngine::new(&layout, &config);

    let now = Utc::now();
    let decision = engine.decide(payload, now)?;
    if !decision.should_create {
        tracing::debug!(reason = %decision.reason, "Hook skipped");
        return Ok(HookAction::Skipped {
            reason: decision.reason,
        });
    }

    let captured = capture_chat_context(
        &project_root,
        payload.transcript_path.as_deref(),
        payload.session_id.as_deref(),
    );
    let agent_kind = captured
        .as_ref()
        .map(|c| c.context.agent_kind)
        .unwrap_or_else(|| transcript::detect(payload.transcript_path.as_deref()));
    let transcript_path = captured.as_ref().map(|c| c.context.transcript_path.clone());
    let (attachment, context) = match captured {
        Some(c) => (Some(c.attachment), Some(c.context)),
        None => (None, None),
    };

    let store = CheckpointStore::new(&layout, &config);
    let description = describe(payload);
    let outcome = store.create(&description, decision.force, None, attachment)?;

    let name = match outcome {
        CreateOutcome::Created(manifest) => manifest.name,
        CreateOutcome::NoChanges { .. } => {
            return Ok(HookAction::Skipped {
                reason: "no changes".to_string(),
            })
        }
    };

    if let Some(context) = context {
        ContextLinker::new(&layout).add(&name, context)?;
    }

    if decision.update_debounce_timer {
        if let Some(session_id) = &payload.session_id {
            engine.mark_checkpoint(session_id, agent_kind, now)?;
        }
    }

    publish_env(agent_kind, &project_root, transcript_path.as_deref());

    Ok(HookAction::Created { checkpoint: name })
}

/// A captured transcript cursor plus the metadata record it produces.
pub struct CapturedContext {
    pub attachment: TranscriptAttachment,
    pub context: CheckpointContext,
}

/// Capture the current session's chat context for a checkpoint.
///
/// Best-effort by design: a missing or unreadable transcript yields `None`
/// and never blocks a snapshot.
pub fn capture_chat_context(
    project_root: &Path,
    explicit_transcript: Option<&Path>,
    session_id: Option<&str>,
) -> Option<CapturedContext> {
    let agent_kind = transcript::detect(explicit_transcript);
    let profile = AgentProfile::for_kind(agent_kind);

    let transcript_path = explicit_transcript.map(Path::to_path_buf).or_else(|| {
        let home = dirs::home_dir()?;
        transcript::locate_transcript(profile, &home, project_root)
            .ok()
            .flatten()
    })?;

    let parser = TranscriptParser::new(profile);
    let messages = match parser.parse_file(&transcript_path) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(path = %transcript_path.display(), error = %e, "Transcript capture failed");
            return None;
        }
    };
    let cursor = parser
        .cursor_from_messages(&transcript_path, &messages)
        .ok()
        .flatten()?;

    let last_included = messages.iter().rev().find(|m| m.terminated)?;
    let session_id = session_id
        .map(String::from)
        .or_else(|| messages.iter().find_map(|m| m.session_id.clone()));

    let context = CheckpointContext {
        agent_kind,
        session_id: session_id.clone(),
        transcript_path: transcript_path.clone(),
        message_identifier: cursor.last_event_id.clone(),
        message_index: last_included.index,
        user_prompt: parser
            .last_user_prompt(&messages)
            .and_then(|m| m.text_content.clone()),
        captured_at: Utc::now(),
    };

    Some(CapturedContext {
        attachment: TranscriptAttachment {
            cursor,
            session_id,
            agent_kind,
        },
        context,
    })
}

/// Project root: payload `cwd`, then host env hints, then the process cwd.
pub fn resolve_project_root(payload: &HookPayload) -> PathBuf {
    if let Some(cwd) = &payload.cwd {
        return cwd.clone();
    }
    for var in ["REWIND_PROJECT_ROOT", "CLAUDE_PROJECT_DIR"] {
        if let Some(path) = std::env::var_os(var) {
            return PathBuf::from(path);
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Append-only publication to an agent-provided environment file, for
/// subsequent subprocesses of the same session.
fn publish_env(agent_kind: AgentKind, project_root: &Path, transcript: Option<&Path>) {
    let Some(env_file) = ["REWIND_ENV_FILE", "CLAUDE_ENV_FILE"]
        .iter()
        .find_map(|var| std::env::var_os(var))
    else {
        return;
    };

    let mut lines = format!(
        "AGENT_KIND={}\nPROJECT_ROOT={}\n",
        agent_kind,
        project_root.display()
    );
    if let Some(path) = transcript {
        lines.push_str(&format!("TRANSCRIPT_PATH={}\n", path.display()));
    }

    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&env_file)
        .and_then(|mut f| f.write_all(lines.as_bytes()));
    if let Err(e) = result {
        tracing::warn!(error = %e, "Could not publish to environment file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageMode;
    use std::fs;
    use tempfile::TempDir;

    fn setup(td: &TempDir) -> (StorageLayout, Config) {
        let root = td.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        let layout = StorageLayout::resolve(&root, StorageMode::Project).unwrap();
        (layout, Config::default())
    }

    fn payload(event: &str, session: &str) -> HookPayload {
        serde_json::from_value(serde_json::json!({
            "hook_event_name": event,
            "session_id": session,
        }))
        .unwrap()
    }

    #[test]
    fn structural_events_force_a_checkpoint() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        let engine = HookEngine::new(&layout, &config);

        let decision = engine.decide(&payload("session-start", "s1"), Utc::now()).unwrap();
        assert!(decision.should_create);
        assert!(decision.force);
        assert!(!decision.update_debounce_timer);
    }

    #[test]
    fn debounce_suppresses_rapid_hooks() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();
        let engine = HookEngine::new(&layout, &config);

        let now = Utc::now();
        engine.mark_checkpoint("s1", AgentKind::Claude, now).unwrap();

        let decision = engine
            .decide(&payload("post-tool-use", "s1"), now + chrono::Duration::seconds(5))
            .unwrap();
        assert!(!decision.should_create);
        assert_eq!(decision.reason, "anti-spam");

        // Other sessions are unaffected.
        let decision = engine
            .decide(&payload("post-tool-use", "s2"), now + chrono::Duration::seconds(5))
            .unwrap();
        assert!(decision.should_create);
    }

    #[test]
    fn unchanged_tree_is_skipped() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();

        let store = CheckpointStore::new(&layout, &config);
        store.create("seed", false, None, None).unwrap();

        let engine = HookEngine::new(&layout, &config);
        let decision = engine.decide(&payload("post-tool-use", "s1"), Utc::now()).unwrap();
        assert!(!decision.should_create);
        assert_eq!(decision.reason, "no changes");
    }

    #[test]
    fn harmless_shell_commands_are_insignificant() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();
        let engine = HookEngine::new(&layout, &config);

        let mut p = payload("post-tool-use", "s1");
        p.tool_name = Some("Bash".to_string());
        p.tool_input = Some(serde_json::json!({"command": "ls -la"}));
        let decision = engine.decide(&p, Utc::now()).unwrap();
        assert!(!decision.should_create);

        p.tool_input = Some(serde_json::json!({"command": "rm -rf build"}));
        let decision = engine.decide(&p, Utc::now()).unwrap();
        assert!(decision.should_create);
        assert!(decision.update_debounce_timer);
    }

    #[test]
    fn file_edits_pass_significance() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();
        let engine = HookEngine::new(&layout, &config);

        let mut p = payload("post-tool-use", "s1");
        p.tool_name = Some("Edit".to_string());
        let decision = engine.decide(&p, Utc::now()).unwrap();
        assert!(decision.should_create);
    }

    #[test]
    fn unknown_event_names_still_deserialize() {
        let p: HookPayload = serde_json::from_str(
            r#"{"hook_event_name":"brand-new-event","session_id":"s1"}"#,
        )
        .unwrap();
        assert_eq!(p.hook_event_name, Some(HookEvent::Unknown));
    }

    #[test]
    fn descriptions_follow_event_mapping() {
        let mut p = payload("user-prompt-submit", "s1");
        p.prompt = Some("please fix the flaky test in ci".to_string());
        assert_eq!(describe(&p), "prompt: please fix the flaky test in ci");

        let mut p = payload("post-tool-use", "s1");
        p.tool_name = Some("Write".to_string());
        assert_eq!(describe(&p), "after Write");

        assert_eq!(describe(&payload("session-start", "s1")), "session start");
    }
}
