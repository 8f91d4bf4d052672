//! Error types for the compilation engine.
//!
//! Errors come in two tiers. [`CompileError`] is returned from
//! [`CompileEngine::compile`](crate::CompileEngine::compile) only for problems
//! detected before any filesystem or process work begins (plus queue shutdown
//! and internal bugs). Everything that goes wrong after that point, such as a
//! compiler that fails to spawn or a tool that crashes, is embedded in the
//! returned [`CompilationResult`](crate::CompilationResult) instead.

use std::path::PathBuf;

use kiln_common::InternalError;
use kiln_config::ConfigError;

use crate::queue::QueueError;

/// Errors returned by `compile` before any side effect takes place.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The user options were rejected by the toolchain's option check.
    #[error("{0}")]
    Options(String),

    /// The source (or an extra file) failed a toolchain precondition.
    #[error("{0}")]
    Source(String),

    /// The execution queue was shut down.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A bug in kiln, such as a request that cannot be serialized for hashing.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Failure to run an external process at all.
///
/// A process that runs and exits non-zero is not an `ExecError`; its exit code
/// is reported in [`ExecOutput`](crate::process::ExecOutput).
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The executable could not be spawned.
    #[error("failed to spawn {exe}: {source}")]
    Spawn {
        /// The executable that failed to start.
        exe: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Communicating with a running process failed.
    #[error("I/O error while running {exe}: {source}")]
    Io {
        /// The executable being run.
        exe: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Failure to prepare or populate a per-request workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// The temporary directory could not be created.
    #[error("failed to create workspace: {0}")]
    Create(std::io::Error),

    /// A file could not be written into the workspace.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The file being written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// A toolchain descriptor that cannot be turned into a usable [`Toolchain`](crate::Toolchain).
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// A configured regular expression does not compile.
    #[error("invalid regex in {field}: {source}")]
    InvalidRegex {
        /// The configuration field holding the pattern.
        field: String,
        /// The regex compilation error.
        source: regex::Error,
    },

    /// The descriptor's capability flags contradict each other.
    #[error("inconsistent toolchain '{id}': {reason}")]
    Inconsistent {
        /// The toolchain id.
        id: String,
        /// What is inconsistent.
        reason: String,
    },
}

/// Errors raised while wiring an engine from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The toolchain descriptor is invalid.
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_display_message_verbatim() {
        let err = CompileError::Source("<stdin>:1:1: no absolute or relative includes please".into());
        assert_eq!(
            err.to_string(),
            "<stdin>:1:1: no absolute or relative includes please"
        );
        let err = CompileError::Options("Bad options: -plugin".into());
        assert_eq!(err.to_string(), "Bad options: -plugin");
    }

    #[test]
    fn spawn_error_display() {
        let err = ExecError::Spawn {
            exe: "/opt/missing/cc".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().starts_with("failed to spawn /opt/missing/cc"));
    }

    #[test]
    fn internal_error_converts() {
        let err: CompileError = InternalError::new("bad key").into();
        assert!(matches!(err, CompileError::Internal(_)));
        assert_eq!(err.to_string(), "internal error: bad key");
    }

    #[test]
    fn inconsistent_toolchain_display() {
        let err = ToolchainError::Inconsistent {
            id: "tv".into(),
            reason: "supports_execute requires supports_binary".into(),
        };
        assert_eq!(
            err.to_string(),
            "inconsistent toolchain 'tv': supports_execute requires supports_binary"
        );
    }
}
