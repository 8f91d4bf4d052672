//! Compilation-request orchestration for the kiln compile service.
//!
//! A [`CompileEngine`] takes a [`CompileRequest`] for one [`Toolchain`] and
//! produces a [`CompilationResult`]:
//!
//! 1. pre-flight checks on options, source and extra file names
//! 2. library autodetection and binary downgrade, then the [`CacheKey`]
//! 3. a cache lookup through the [`CacheGateway`]
//! 4. on a miss, the build inside one [`ExecutionQueue`] slot: a fresh
//!    workspace, the argument vector, the compiler run concurrently with the
//!    independent tools, then the [`PostProcessor`]
//! 5. write-back, optional execution of the built program in its own queue
//!    slot, and workspace release
//!
//! External programs are reached only through the collaborator traits
//! ([`ProcessExecutor`], [`LibraryResolver`], [`ToolRunner`],
//! [`Disassembler`]), so every step can be driven by fakes in tests.

#![warn(missing_docs)]

pub mod args;
pub mod disasm;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod library;
pub mod optinfo;
pub mod postprocess;
pub mod process;
pub mod queue;
pub mod request;
pub mod result;
pub mod toolchain;
pub mod tools;
pub mod workspace;

pub use args::{split_arguments, ArgumentBuilder};
pub use disasm::{Disassembler, ObjdumpDisassembler};
pub use engine::{Collaborators, CompileEngine, EngineSettings, EXECUTION_UNSUPPORTED};
pub use error::{CompileError, ExecError, SetupError, ToolchainError, WorkspaceError};
pub use gateway::CacheGateway;
pub use kiln_cache::CacheKey;
pub use library::{ConfiguredLibraries, LibraryResolver, NoLibraries};
pub use optinfo::{DebugLoc, OptRemark};
pub use postprocess::PostProcessor;
pub use process::{ExecOptions, ExecOutput, ProcessExecutor, TokioProcessExecutor};
pub use queue::{ExecutionQueue, QueueError};
pub use request::{
    BackendOptions, CompileRequest, ExecutionParameters, Filters, LibrarySpec, SourceFile,
    ToolInvocationSpec,
};
pub use result::{CompilationResult, Download, ExecutionResult, ToolResult};
pub use toolchain::{LibraryFlags, Toolchain};
pub use tools::{CompilationInfo, ConfiguredTools, NoTools, ToolRunner};
pub use workspace::WorkspaceManager;

/// Version written into on-disk cache artifacts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
