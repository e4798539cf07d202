//! Restore Coordinator
//!
//! Drives a consistent code+chat rewind: safety snapshot first, then the
//! transcript fork/truncation, then the code restore, so a transcript failure
//! never leaves the working tree half-moved. The agent cannot be hot-reloaded;
//! the outcome carries an action directive telling the user to exit and
//! resume with the new session identifier.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::journal::{self, RestoreRecord};
use crate::layout::StorageLayout;
use crate::linker::ContextLinker;
use crate::snapshot::{AppliedRestore, CheckpointStore};
use crate::transcript::{
    locate_transcript, AgentProfile, ForkResult, RewindTarget, TranscriptEngine,
    TranscriptParser, TruncateResult,
};
use crate::types::{AgentKind, Manifest, RestoreMode, TranscriptCursor};
use chrono::Utc;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub mode: RestoreMode,
    /// Truncate the live transcript instead of forking
    pub in_place: bool,
    /// Compute and report the plan without writing anything
    pub dry_run: bool,
    /// Continue even when the emergency snapshot cannot be taken
    pub skip_backup: bool,
}

/// What a coordinator run did (or, for dry runs, would do).
#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub checkpoint: Option<String>,
    /// Effective mode after any downgrade
    pub mode: RestoreMode,
    pub downgraded: bool,
    pub emergency: Option<String>,
    pub applied: Option<AppliedRestore>,
    pub fork: Option<ForkResult>,
    pub truncation: Option<TruncateResult>,
    pub warnings: Vec<String>,
    pub dry_run: bool,
    /// Dry-run plan, one human-readable step per line
    pub plan: Vec<String>,
    /// Action directive for the user; set whenever chat state changed
    pub directive: Option<String>,
}

/// Everything needed to rewind the conversation side of a checkpoint.
struct ChatTarget {
    agent_kind: AgentKind,
    transcript_path: PathBuf,
    cursor: Option<TranscriptCursor>,
    message_identifier: Option<String>,
}

pub struct RestoreCoordinator<'a> {
    layout: &'a StorageLayout,
    config: &'a Config,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(layout: &'a StorageLayout, config: &'a Config) -> Self {
        Self { layout, config }
    }

    /// Restore a checkpoint in the requested mode.
    pub fn restore(&self, selector: &str, options: &RestoreOptions) -> Result<RestoreOutcome> {
        let store = CheckpointStore::new(self.layout, self.config);
        let linker = ContextLinker::new(self.layout);

        let manifest = store.resolve(selector)?;
        let mut outcome = RestoreOutcome {
            checkpoint: Some(manifest.name.clone()),
            mode: options.mode,
            dry_run: options.dry_run,
            ..Default::default()
        };

        // Step 1: chat context lookup, with the documented downgrade.
        let chat = if options.mode != RestoreMode::Code {
            match self.chat_target(&manifest, &linker)? {
                Some(chat) => Some(chat),
                None if options.mode == RestoreMode::Both => {
                    outcome.mode = RestoreMode::Code;
                    outcome.downgraded = true;
                    outcome
                        .warnings
                        .push(format!("no chat context for {}; code-only restore", manifest.name));
                    None
                }
                None => {
                    return Err(Error::TargetNotFound(format!(
                        "no chat context for checkpoint {}",
                        manifest.name
                    )))
                }
            }
        } else {
            None
        };

        if options.dry_run {
            outcome.plan = self.plan(&manifest, chat.as_ref(), &outcome, options);
            self.record(selector, &outcome, "planned");
            return Ok(outcome);
        }

        // Step 2: safety snapshot.
        match store.emergency_snapshot() {
            Ok(name) => outcome.emergency = Some(name),
            Err(e) if options.skip_backup => {
                outcome
                    .warnings
                    .push(format!("emergency snapshot skipped: {}", e));
            }
            Err(e) => return Err(Error::SafetyBackupFailed(e.to_string())),
        }

        // Step 3: transcript fork/truncation before the code moves.
        if let Some(chat) = &chat {
            match self.rewind_chat(&store, &manifest, chat, options.in_place) {
                Ok((fork, truncation)) => {
                    outcome.directive = Some(directive_for(fork.as_ref(), truncation.as_ref()));
                    outcome.fork = fork;
                    outcome.truncation = truncation;
                }
                Err(e) => {
                    // Code has not been applied yet; reverting to the
                    // emergency snapshot cannot lose anything.
                    if let Some(emergency) = outcome.emergency.clone() {
                        if let Ok(em) = store.resolve(&emergency) {
                            let _ = store.apply(&em);
                        }
                        self.record(selector, &outcome, "rolled_back");
                        // Keep the category: a missing target stays one.
                        return Err(match e {
                            Error::TargetNotFound(_) => e,
                            other => Error::Transcript(format!(
                                "{} (code rolled back to emergency snapshot {})",
                                other, emergency
                            )),
                        });
                    }
                    self.record(selector, &outcome, "failed");
                    return Err(e);
                }
            }
        }

        // Step 4: code restore.
        if outcome.mode != RestoreMode::Context {
            match store.apply(&manifest) {
                Ok(applied) => outcome.applied = Some(applied),
                Err(e) => {
                    self.record(selector, &outcome, "failed");
                    return Err(match &outcome.emergency {
                        Some(emergency) => Error::Archive(format!(
                            "{} (recover with emergency snapshot {})",
                            e, emergency
                        )),
                        None => e,
                    });
                }
            }
        }

        self.record(selector, &outcome, "restored");
        Ok(outcome)
    }

    /// Rewind the conversation by N user turns, optionally restoring the
    /// matching code checkpoint.
    pub fn back(&self, turns: usize, both: bool, in_place: bool) -> Result<RestoreOutcome> {
        let store = CheckpointStore::new(self.layout, self.config);
        let linker = ContextLinker::new(self.layout);

        let agent_kind = crate::transcript::detect(None);
        let profile = AgentProfile::for_kind(agent_kind);
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;
        let transcript = locate_transcript(profile, &home, self.layout.project_root())?
            .ok_or_else(|| Error::Transcript("no session transcript found".to_string()))?;

        let engine = TranscriptEngine::new(profile);
        let target = RewindTarget::UserTurnsBack(turns);
        let boundary = engine.resolve_boundary(&transcript, &target)?;

        let mut outcome = RestoreOutcome {
            mode: if both { RestoreMode::Both } else { RestoreMode::Context },
            ..Default::default()
        };

        // Boundary record index, for matching a linked checkpoint.
        let parser = TranscriptParser::new(profile);
        let messages = parser.parse_file(&transcript)?;
        let boundary_index = messages
            .iter()
            .rev()
            .filter(|m| m.is_user_prompt)
            .nth(turns - 1)
            .map(|m| m.index);

        let code_manifest = if both {
            let candidate = boundary_index.and_then(|cut| {
                self.linked_checkpoint_before(&linker, &transcript, cut)
                    .ok()
                    .flatten()
            });
            match candidate {
                Some(name) => match store.resolve(&name) {
                    Ok(m) => Some(m),
                    Err(_) => {
                        outcome
                            .warnings
                            .push(format!("linked checkpoint {} is gone; context-only", name));
                        None
                    }
                },
                None => {
                    outcome
                        .warnings
                        .push("no checkpoint linked before that turn; context-only".to_string());
                    None
                }
            }
        } else {
            None
        };
        if let Some(m) = &code_manifest {
            outcome.checkpoint = Some(m.name.clone());
        } else if both {
            outcome.mode = RestoreMode::Context;
            outcome.downgraded = true;
        }

        if in_place || code_manifest.is_some() {
            outcome.emergency = Some(
                store
                    .emergency_snapshot()
                    .map_err(|e| Error::SafetyBackupFailed(e.to_string()))?,
            );
        }

        if in_place {
            let truncation = engine.truncate_in_place(&transcript, &target)?;
            outcome.directive = Some(directive_for(None, Some(&truncation)));
            outcome.truncation = Some(truncation);
        } else {
            let fork = engine.fork_at_boundary(&transcript, boundary)?;
            outcome.directive = Some(directive_for(Some(&fork), None));
            outcome.fork = Some(fork);
        }

        if let Some(manifest) = &code_manifest {
            let applied = match store.apply(manifest) {
                Ok(applied) => applied,
                Err(e) => {
                    self.record(&format!("back {}", turns), &outcome, "failed");
                    return Err(match &outcome.emergency {
                        Some(emergency) => Error::Archive(format!(
                            "{} (recover with emergency snapshot {})",
                            e, emergency
                        )),
                        None => e,
                    });
                }
            };
            outcome.applied = Some(applied);
        }

        self.record(&format!("back {}", turns), &outcome, "restored");
        Ok(outcome)
    }

    /// Newest linked checkpoint whose last included record precedes `cut`.
    fn linked_checkpoint_before(
        &self,
        linker: &ContextLinker,
        transcript: &std::path::Path,
        cut: usize,
    ) -> Result<Option<String>> {
        let mut best: Option<(usize, String)> = None;
        for (name, context) in linker.list()? {
            if context.transcript_path != transcript || context.message_index >= cut {
                continue;
            }
            if best
                .as_ref()
                .map(|(idx, _)| context.message_index > *idx)
                .unwrap_or(true)
            {
                best = Some((context.message_index, name));
            }
        }
        Ok(best.map(|(_, name)| name))
    }

    fn chat_target(
        &self,
        manifest: &Manifest,
        linker: &ContextLinker,
    ) -> Result<Option<ChatTarget>> {
        let metadata = linker.get(&manifest.name)?;
        let section = manifest.transcript.as_ref();

        let agent_kind = metadata
            .as_ref()
            .map(|m| m.agent_kind)
            .or_else(|| section.map(|s| s.agent_kind));
        let transcript_path = metadata
            .as_ref()
            .map(|m| m.transcript_path.clone())
            .or_else(|| section.map(|s| s.cursor.path.clone()));
        let message_identifier = metadata
            .as_ref()
            .and_then(|m| m.message_identifier.clone())
            .or_else(|| section.and_then(|s| s.cursor.last_event_id.clone()));

        match (agent_kind, transcript_path) {
            (Some(agent_kind), Some(transcript_path)) => Ok(Some(ChatTarget {
                agent_kind,
                transcript_path,
                cursor: section.map(|s| s.cursor.clone()),
                message_identifier,
            })),
            _ => Ok(None),
        }
    }

    fn rewind_chat(
        &self,
        store: &CheckpointStore,
        manifest: &Manifest,
        chat: &ChatTarget,
        in_place: bool,
    ) -> Result<(Option<ForkResult>, Option<TruncateResult>)> {
        let profile = AgentProfile::for_kind(chat.agent_kind);
        let engine = TranscriptEngine::new(profile);

        if in_place {
            let id = chat.message_identifier.clone().ok_or_else(|| {
                Error::TargetNotFound(format!(
                    "checkpoint {} has no message identifier for in-place truncation",
                    manifest.name
                ))
            })?;
            let truncation =
                engine.truncate_in_place(&chat.transcript_path, &RewindTarget::Identifier(id))?;
            return Ok((None, Some(truncation)));
        }

        let snapshot_gz = store.transcript_snapshot_path(&manifest.name);
        if let Some(cursor) = &chat.cursor {
            let fork = engine.fork_from_cursor(cursor, snapshot_gz.as_deref())?;
            return Ok((Some(fork), None));
        }

        // No cursor (metadata-only checkpoint): cut the live transcript at
        // the recorded identifier instead.
        let id = chat.message_identifier.clone().ok_or_else(|| {
            Error::TargetNotFound(format!(
                "checkpoint {} has neither cursor nor message identifier",
                manifest.name
            ))
        })?;
        let boundary =
            engine.resolve_boundary(&chat.transcript_path, &RewindTarget::Identifier(id))?;
        let fork = engine.fork_at_boundary(&chat.transcript_path, boundary)?;
        Ok((Some(fork), None))
    }

    fn plan(
        &self,
        manifest: &Manifest,
        chat: Option<&ChatTarget>,
        outcome: &RestoreOutcome,
        options: &RestoreOptions,
    ) -> Vec<String> {
        let mut plan = Vec::new();
        plan.push(if options.skip_backup {
            "take emergency snapshot (rewind_backup_*), continue on failure".to_string()
        } else {
            "take emergency snapshot (rewind_backup_*)".to_string()
        });
        if let Some(chat) = chat {
            if options.in_place {
                plan.push(format!(
                    "truncate {} in place at {} (backup kept aside)",
                    chat.transcript_path.display(),
                    chat.message_identifier.as_deref().unwrap_or("?"),
                ));
            } else {
                plan.push(format!(
                    "fork {} into a new session file",
                    chat.transcript_path.display()
                ));
            }
        }
        if outcome.mode != RestoreMode::Context {
            plan.push(format!(
                "restore {} files from {} and delete paths not in its manifest",
                manifest.file_count, manifest.name
            ));
        }
        plan.push("exit and resume the agent with the new session".to_string());
        plan
    }

    fn record(&self, selector: &str, outcome: &RestoreOutcome, result: &str) {
        let record = RestoreRecord {
            at: Utc::now(),
            mode: outcome.mode,
            selector: selector.to_string(),
            checkpoint: outcome.checkpoint.clone(),
            emergency: outcome.emergency.clone(),
            dry_run: outcome.dry_run,
            outcome: result.to_string(),
        };
        if let Err(e) = journal::append_restore_record(self.layout, record) {
            tracing::warn!(error = %e, "Could not append restore history");
        }
    }
}

fn directive_for(fork: Option<&ForkResult>, truncation: Option<&TruncateResult>) -> String {
    match (fork, truncation) {
        (Some(fork), _) => format!(
            "Exit the agent and resume with session {} to pick up the rewound conversation.",
            fork.session_id
        ),
        (None, Some(_)) => {
            "Exit the agent now; the transcript was truncated in place and will be read on next start."
                .to_string()
        }
        (None, None) => "Exit and restart the agent to pick up the restored state.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CreateOutcome;
    use crate::types::StorageMode;
    use std::fs;
    use tempfile::TempDir;

    fn setup(td: &TempDir) -> (StorageLayout, Config) {
        let root = td.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        let layout = StorageLayout::resolve(&root, StorageMode::Project).unwrap();
        (layout, Config::default())
    }

    #[test]
    fn both_downgrades_to_code_without_chat_context() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();

        let store = CheckpointStore::new(&layout, &config);
        let CreateOutcome::Created(manifest) =
            store.create("first", false, None, None).unwrap()
        else {
            panic!("expected checkpoint");
        };

        fs::write(layout.project_root().join("b.txt"), "new").unwrap();

        let coordinator = RestoreCoordinator::new(&layout, &config);
        let outcome = coordinator
            .restore(&manifest.name, &RestoreOptions::default())
            .unwrap();

        assert!(outcome.downgraded);
        assert_eq!(outcome.mode, RestoreMode::Code);
        assert!(outcome.emergency.is_some());
        assert!(!layout.project_root().join("b.txt").exists());
    }

    #[test]
    fn context_mode_without_context_is_target_not_found() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();

        let store = CheckpointStore::new(&layout, &config);
        store.create("first", false, None, None).unwrap();

        let coordinator = RestoreCoordinator::new(&layout, &config);
        let err = coordinator
            .restore(
                "last",
                &RestoreOptions {
                    mode: RestoreMode::Context,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::TargetNotFound(_)));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let td = TempDir::new().unwrap();
        let (layout, config) = setup(&td);
        fs::write(layout.project_root().join("a.txt"), "hi").unwrap();

        let store = CheckpointStore::new(&layout, &config);
        store.create("first", false, None, None).unwrap();
        fs::write(layout.project_root().join("b.txt"), "new").unwrap();

        let coordinator = RestoreCoordinator::new(&layout, &config);
        let outcome = coordinator
            .restore(
                "last",
                &RestoreOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(outcome.dry_run);
        assert!(!outcome.plan.is_empty());
        assert!(outcome.emergency.is_none());
        // The added file survived and no emergency snapshot appeared.
        assert!(layout.project_root().join("b.txt").exists());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
