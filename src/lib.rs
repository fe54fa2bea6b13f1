//! ralph-ollama - an autonomous study/implement/test/update loop driven by a
//! local Ollama model.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`r#loop`] - The loop engine, phases, task list, extraction and retry policy
//! - [`changes`] - Filesystem change tracking between phases
//! - [`quality`] - Validation and execution of generated files
//! - [`llm`] - Generation client trait and the Ollama CLI client
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Scripted generation client for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use ralph_ollama::r#loop::{LoopEngine, LoopMode};
//!
//! let engine = LoopEngine::new("./my-project")?;
//! engine.initialize_project("my-project", "A CLI that greets people", Some("Create hello.py"))?;
//! engine.start(LoopMode::NonStop)?;
//! engine.wait_until_finished().await;
//!
//! for record in engine.phase_history() {
//!     println!("{} {}", record.phase, record.success);
//! }
//! ```

pub mod changes;
pub mod config;
pub mod error;
pub mod llm;
pub mod r#loop;
pub mod quality;
pub mod testing;

// Re-export commonly used types
pub use error::{RalphError, Result};

pub use config::ProjectConfig;

pub use changes::{FileChanges, FileEntry, FileStatus, FileTracker};

pub use llm::{Generation, GenerationClient, GenerationRequest, OllamaClient};

pub use quality::{CodeValidator, ExecutionResult, TestRunResult, ValidationReport};

pub use r#loop::{
    EngineRegistry, LoopEngine, LoopMode, LoopStatus, Phase, PhaseExecutionRecord, StatusEvent,
    TaskList,
};

pub use testing::ScriptedGenerator;
