//! Compilation, tool and execution results.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::optinfo::OptRemark;

/// The outcome of one compilation.
///
/// Ordinary compiler failures live here, not in an `Err`: callers inspect
/// `code`, `stderr` and `asm`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationResult {
    /// Exit code reported to the caller (forced to 0 by the text-framing fallback).
    pub code: i32,
    /// Whether the process wrapper killed the compiler.
    pub timed_out: bool,
    /// Whether this result may be written back to the cache.
    pub ok_to_cache: bool,
    /// Compiler stdout with the input file name masked.
    pub stdout: String,
    /// Compiler stderr with the input file name masked.
    pub stderr: String,
    /// Compiler stdout exactly as captured.
    pub raw_stdout: String,
    /// Compiler stderr exactly as captured.
    pub raw_stderr: String,
    /// The final rendered artifact.
    pub asm: String,
    /// Size of the compiler's output file, if one was produced.
    pub asm_size: Option<u64>,
    /// Whether an optimization record was produced.
    pub has_opt_output: bool,
    /// Location of the optimization record while the workspace exists.
    #[serde(skip)]
    pub opt_path: Option<PathBuf>,
    /// Parsed optimization remarks.
    pub opt_output: Option<Vec<OptRemark>>,
    /// Results of independent tools, in request order.
    pub tools: Vec<ToolResult>,
    /// Result of running the built program, when requested.
    pub exec_result: Option<ExecutionResult>,
    /// The workspace directory; cleared once the workspace is released.
    pub dir_path: Option<PathBuf>,
    /// The argument vector the compiler was invoked with.
    pub compilation_options: Vec<String>,
    /// Artifacts fetched while preparing the build environment.
    pub downloads: Vec<Download>,
    /// Whether this result came from the cache.
    pub retrieved_from_cache: bool,
    /// How long the cache lookup took, on a hit.
    pub retrieved_from_cache_time: Option<Duration>,
    /// Wall time of the compiler process.
    pub exec_time: Option<Duration>,
}

impl CompilationResult {
    /// A result for a compilation that could not run at all.
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: -1,
            asm: format!("<Compilation failed: {message}>"),
            stderr: message.clone(),
            raw_stderr: message,
            ..Self::default()
        }
    }

    /// Wraps the outcome of an execution-only request.
    pub fn from_execution(exec: ExecutionResult) -> Self {
        Self {
            code: exec.code,
            exec_result: Some(exec),
            ..Self::default()
        }
    }
}

/// The outcome of one independent tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool id from the request.
    pub id: String,
    /// Exit code, or -1 if the tool could not run.
    pub code: i32,
    /// Tool stdout.
    pub stdout: String,
    /// Tool stderr, or the reason the tool could not run.
    pub stderr: String,
}

impl ToolResult {
    /// A result for a tool that could not run.
    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: -1,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }
}

/// The outcome of running a built program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code of the program, or -1 if it did not run.
    pub code: i32,
    /// Program stdout.
    pub stdout: String,
    /// Program stderr, or the reason it did not run.
    pub stderr: String,
    /// Whether the program actually ran.
    pub did_execute: bool,
    /// Whether the process wrapper killed the program.
    pub timed_out: bool,
    /// The build that produced the program, when one was needed.
    pub build_result: Option<Box<CompilationResult>>,
    /// Wall time of the program.
    pub exec_time: Option<Duration>,
}

impl ExecutionResult {
    /// A result for a program that was not run.
    pub fn not_executed(reason: impl Into<String>) -> Self {
        Self {
            code: -1,
            stderr: reason.into(),
            ..Self::default()
        }
    }
}

/// An artifact fetched into the build environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    /// Package or library name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Where it was placed, relative to the workspace.
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_shape() {
        let r = CompilationResult::failure("spawn failed");
        assert_eq!(r.code, -1);
        assert_eq!(r.stderr, "spawn failed");
        assert_eq!(r.asm, "<Compilation failed: spawn failed>");
        assert!(!r.ok_to_cache);
    }

    #[test]
    fn from_execution_copies_code() {
        let exec = ExecutionResult {
            code: 7,
            did_execute: true,
            ..ExecutionResult::default()
        };
        let r = CompilationResult::from_execution(exec);
        assert_eq!(r.code, 7);
        assert!(r.exec_result.unwrap().did_execute);
    }

    #[test]
    fn opt_path_not_serialized() {
        let r = CompilationResult {
            opt_path: Some(PathBuf::from("/tmp/ws/output.opt.yaml")),
            ..CompilationResult::default()
        };
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("output.opt.yaml"));
    }
}
