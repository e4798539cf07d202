//! Transcript layer: locating, parsing, and rewriting session transcripts
//!
//! ```text
//! ┌──────────────┐    ┌─────────────────┐    ┌──────────────────┐
//! │ profile.rs   │ ─► │ locator.rs      │ ─► │ parser.rs        │
//! │ which host?  │    │ which file?     │    │ which messages?  │
//! └──────────────┘    └─────────────────┘    └──────────────────┘
//!                                                    │
//!                                                    ▼
//!                                            ┌──────────────────┐
//!                                            │ engine.rs        │
//!                                            │ fork / truncate  │
//!                                            └──────────────────┘
//! ```
//!
//! The transcript format belongs to the host agent and is treated as
//! read-mostly: the engine includes or excludes whole lines, never rewrites
//! records (the fork title prefix being the one profile-guarded exception).

pub mod engine;
pub mod locator;
pub mod parser;
pub mod profile;

pub use engine::{ForkResult, RewindTarget, TranscriptEngine, TruncateResult};
pub use locator::{locate_transcript, newest_jsonl};
pub use parser::{TranscriptMessage, TranscriptParser, FINGERPRINT_SPAN};
pub use profile::{detect, detect_with, sanitize_project_dir, AgentProfile};
