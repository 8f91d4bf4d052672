//! The compile request model.

use serde::{Deserialize, Serialize};

/// Output filters requested by the caller.
///
/// Filters participate in the cache key. The engine never mutates the caller's
/// filters; it derives a [`build_view`](Filters::build_view) for the build phase.
///
/// The engine acts on `binary`, `execute`, `intel`, `demangle` and
/// `dont_mask_filenames`. The remaining flags select how the front end filters
/// the rendered assembly; the engine only carries them through the cache key,
/// so differently filtered views are cached separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    /// Produce a linked binary and disassemble it.
    pub binary: bool,
    /// Front end: the caller asked for an object file view.
    pub binary_object: bool,
    /// Run the built program after compiling.
    pub execute: bool,
    /// Render assembly in Intel syntax.
    pub intel: bool,
    /// Demangle symbol names.
    pub demangle: bool,
    /// Leave absolute file names in compiler output untouched.
    pub dont_mask_filenames: bool,
    /// Front end: hide unused labels.
    pub labels: bool,
    /// Front end: hide assembler directives.
    pub directives: bool,
    /// Front end: hide comment-only lines.
    pub comment_only: bool,
    /// Front end: collapse whitespace.
    pub trim: bool,
    /// Front end: hide code originating from libraries.
    pub library_code: bool,
}

impl Filters {
    /// Returns the filters as seen by the build phase: identical, minus `execute`.
    ///
    /// Building and running are separate phases, so the build never sees the
    /// execute request.
    pub fn build_view(&self) -> Filters {
        Filters {
            execute: false,
            ..self.clone()
        }
    }
}

/// Backend-specific options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Secondary source, written next to the primary one (translation validation).
    pub sub_source: Option<String>,
    /// Run an already built program again instead of compiling.
    pub executor_request: bool,
    /// Ask the compiler for an optimization record.
    pub produce_opt_info: bool,
}

/// A library selected by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySpec {
    /// Library id, as listed under `[libraries]`.
    pub id: String,
    /// Version id.
    pub version: String,
}

impl LibrarySpec {
    /// Creates a library selection.
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// An extra file materialized next to the primary source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Relative file name inside the workspace.
    pub filename: String,
    /// File contents.
    pub contents: String,
}

/// An auxiliary tool to run for this compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationSpec {
    /// Tool id, as listed under `[tools]`.
    pub id: String,
    /// Extra arguments appended after the configured ones.
    #[serde(default)]
    pub args: Vec<String>,
    /// Standard input for the tool.
    #[serde(default)]
    pub stdin: Option<String>,
}

/// Arguments and input for running the built program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionParameters {
    /// Command-line arguments.
    pub args: Option<Vec<String>>,
    /// Standard input.
    pub stdin: Option<String>,
}

/// Execution parameters with absent values replaced by empty ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedExecution {
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Standard input.
    pub stdin: String,
}

impl ExecutionParameters {
    /// Fills in defaults: no arguments and empty stdin.
    pub fn resolve(&self) -> ResolvedExecution {
        ResolvedExecution {
            args: self.args.clone().unwrap_or_default(),
            stdin: self.stdin.clone().unwrap_or_default(),
        }
    }
}

/// Everything needed to compile one piece of source with one toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Primary source text.
    pub source: String,
    /// User-supplied compiler options, in order.
    pub options: Vec<String>,
    /// Backend options, including the secondary source.
    pub backend_options: BackendOptions,
    /// Output filters.
    pub filters: Filters,
    /// Skip the cache lookup; the fresh result may still be written back.
    pub bypass_cache: bool,
    /// Auxiliary tools, in order.
    pub tools: Vec<ToolInvocationSpec>,
    /// Parameters for running the built program.
    pub execution_parameters: ExecutionParameters,
    /// Selected libraries, in order.
    pub libraries: Vec<LibrarySpec>,
    /// Extra files, in order.
    pub files: Vec<SourceFile>,
}

impl CompileRequest {
    /// Creates a request for `source` with everything else left empty.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// The secondary source, if any.
    pub fn sub_source(&self) -> Option<&str> {
        self.backend_options.sub_source.as_deref()
    }
}
