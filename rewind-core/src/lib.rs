//! # rewind-core
//!
//! Local checkpoint-and-rewind engine for interactive AI coding agent
//! sessions. Two things are snapshotted together so a session gone bad can
//! be undone: the working copy of a project directory, and the agent's
//! conversation transcript. The hard part is the coupling — rewinding the
//! conversation to the exact message boundary matching a code snapshot
//! without corrupting the live transcript.
//!
//! ## Architecture
//!
//! - **Checkpoint Store** ([`snapshot`]): ignore-filtered, change-detected
//!   tarball snapshots with atomic restore and an emergency safety snapshot
//! - **Transcript layer** ([`transcript`]): agent-kind profiles, session
//!   discovery, line-delimited JSON parsing, fork and in-place truncation
//! - **Context Linker** ([`linker`]): persistent code↔transcript metadata
//! - **Restore Coordinator** ([`restore`]): consistent code+chat rewind
//! - **Hook engine** ([`hooks`]): debounce / significance / change detection
//!
//! ## Example
//!
//! ```rust,no_run
//! use rewind_core::{Config, StorageLayout};
//! use rewind_core::snapshot::CheckpointStore;
//!
//! let root = std::path::Path::new("/home/dev/project");
//! let config = Config::load_for_project(root);
//! let layout = StorageLayout::resolve(root, config.storage).expect("layout");
//! let store = CheckpointStore::new(&layout, &config);
//! store.create("before refactor", false, None, None).expect("checkpoint");
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, Tier};
pub use error::{Error, Result};
pub use layout::StorageLayout;
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod hooks;
pub mod ignore;
pub mod journal;
pub mod layout;
pub mod linker;
pub mod logging;
pub mod restore;
pub mod scan;
pub mod snapshot;
pub mod transcript;
pub mod types;
