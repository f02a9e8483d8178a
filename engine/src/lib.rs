//! # filegate engine - polling file consumer and atomic file producer
//!
//! A headless engine that picks files up from directories and writes files
//! into directories, for several processes working on the same tree.
//!
//! ## Overview
//!
//! Consuming (`FileConsumer`):
//! - Directory scanning with depth windows, regex/ant filters and hidden-file rules
//! - Done-file gating and idempotent/in-progress tracking
//! - Read locks (marker file, rename, OS file lock, changed, idempotent)
//! - A begin/commit/rollback lifecycle with move/delete/noop terminal actions
//! - A per-endpoint scheduler with bounded shutdown
//!
//! Producing (`AtomicWriter`):
//! - Temp-file-then-rename writes with Override/Append/Fail/Ignore/Move/TryRename
//! - Checksum side files, permission modes and producer done files
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::io::Read;
//! use std::sync::Arc;
//! use filegate_engine::{
//!     EndpointOptions, FileConsumer, FileProcessor, FileUnit, PollLifecycle, ProcessError,
//! };
//!
//! struct Print;
//!
//! impl FileProcessor for Print {
//!     type Token = ();
//!
//!     fn begin_processing(&self, _unit: &FileUnit) -> Result<(), ProcessError> {
//!         Ok(())
//!     }
//!
//!     fn process(&self, _: &mut (), unit: &FileUnit, reader: &mut dyn Read) -> Result<(), ProcessError> {
//!         let mut content = String::new();
//!         reader.read_to_string(&mut content)?;
//!         println!("{}: {} bytes", unit.entry.relative_name(), content.len());
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = EndpointOptions::from_json_str(r#"{"readLock": "markerFile", "move": "done"}"#)?;
//! let consumer = FileConsumer::new(options.build("/var/inbox")?, Arc::new(Print))?;
//! consumer.start()?;
//! let report = consumer.poll()?;
//! println!("committed {} files", report.committed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Candidate entries, in-progress keys, file units and outcomes
//! - **error**: Error types and handling
//! - **config**: Endpoint options and validated consumer/producer configs
//! - **expression**: File expression templates (`${file:name}`, `${date:now:...}`)
//! - **filter** / **scanner**: Candidate filtering, directory walking and sorting
//! - **idempotent**: Idempotent repositories and in-progress tracking
//! - **read_lock**: Read lock strategies and lock tokens
//! - **done_file**: Done-file gating
//! - **resume**: Resume strategies
//! - **process_strategy**: Begin/commit/rollback file actions
//! - **poll**: The polling consumer and its hooks
//! - **scheduler**: Per-endpoint poll loops
//! - **writer**: Atomic producer writes
//! - **fs_ops**: Low-level filesystem operations
//! - **checksums**: Checksum algorithms and side files

pub mod model;
pub mod error;
pub mod config;
pub mod expression;
pub mod filter;
pub mod scanner;
pub mod idempotent;
pub mod read_lock;
pub mod done_file;
pub mod resume;
pub mod process_strategy;
pub mod poll;
pub mod scheduler;
pub mod writer;
pub mod fs_ops;
pub mod checksums;

// Re-export main types and functions
pub use model::{CandidateEntry, FileUnit, InProgressKey, KeyStrategy, SkipReason, TransferOutcome};
pub use error::{EngineError, EngineResult, ProcessError};
pub use config::{
    EndpointConfig, EndpointOptions, FileExist, ProducerConfig, ReadLockKind, TerminalAction,
};
pub use idempotent::{IdempotentRepository, MemoryIdempotentRepository};
pub use poll::{
    DefaultPollStrategy, FileConsumer, FileProcessor, PollControl, PollLifecycle, PollReport,
    PollStrategy,
};
pub use resume::{FileSetResumeStrategy, OffsetResumeStrategy, ResumeAction, ResumeStrategy};
pub use scheduler::{Schedule, Scheduler, ShutdownReport};
pub use writer::{AtomicWriter, WriteOutcome};
pub use checksums::{ChecksumAlgorithm, ChecksumValue};
