//! # Teelog
//!
//! Process-local logging that tees human-readable output to the terminal and
//! persists leveled records to dated, optionally compressed log files.
//!
//! ## Features
//!
//! - **Tee Logging**: every record goes to the session's log file, and the
//!   `tee_*` variants also echo a colored line to the terminal
//! - **Location Tags**: each record carries a fixed-width `file:line` tag,
//!   abbreviated to fit its column
//! - **In-place Compression**: plain, gzip, bzip2 or xz log streams, flushed
//!   after every record
//! - **Retention**: dated log directories are compressed or deleted by a
//!   background sweep when a session starts
//! - **Fallback Chain**: primary directory, then the temp directory, then
//!   stderr; logging never aborts the host program
//!
//! ## Quick Start
//!
//! ```no_run
//! use teelog::{LogSession, SessionConfig};
//!
//! fn main() -> teelog::Result<()> {
//!     let mut config = SessionConfig::new("demo");
//!     config.log_dir = "/var/tmp".into();
//!
//!     let log = LogSession::new(config)?;
//!     log.info("only in the file");
//!     log.tee_warning("in the file and on the terminal");
//!     Ok(())
//! }
//! ```

pub mod abbrev;
pub mod caller;
pub mod codec;
pub mod config;
pub mod console;
pub mod layer;
pub mod level;
pub mod retention;
pub mod session;
pub mod table;


pub use abbrev::{abbreviate, TagCache};
pub use caller::CallSite;
pub use codec::{CodecWriter, StreamMode};
pub use config::{Compression, RetentionConfig, SessionConfig};
pub use console::{print_with_color, Tone};
pub use layer::TeeLayer;
pub use level::Level;
pub use retention::{JobOutcome, MaintenanceJob, RetentionAction, RetentionEngine, RetentionPolicy};
pub use session::{Emitter, LogSession, SessionState};
pub use table::{format_table, TableData};

/// Result type for teelog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Teelog-specific errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Retention error: {message}")]
    Retention { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
