//! Configuration types deserialized from `kiln.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The top-level service configuration parsed from `kiln.toml`.
///
/// Contains engine limits, the cache backend, toolchain descriptors, the
/// library table used for include/link flags, and auxiliary tool definitions.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Engine-wide limits and workspace policy.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Result cache backend selection.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Base properties every toolchain inherits unless it overrides them.
    #[serde(default)]
    pub toolchain_defaults: ToolchainConfig,
    /// Named toolchain descriptors (e.g., "mlir-tv", "gcc-13").
    #[serde(default)]
    pub toolchains: BTreeMap<String, ToolchainConfig>,
    /// Library table keyed by library id.
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryConfig>,
    /// Auxiliary tools keyed by tool id.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

/// Engine-wide limits and workspace policy.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of compilation-class tasks running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Byte bound for disassembly and post-process output.
    #[serde(default = "default_max_asm_size")]
    pub max_asm_size: u64,
    /// Per-stream capture bound for external processes, in bytes.
    #[serde(default = "default_max_output")]
    pub max_output: usize,
    /// Keep workspaces on disk after finalizing a result.
    #[serde(default)]
    pub delay_cleanup: bool,
    /// Parent directory for per-request workspaces (system temp dir if unset).
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
    /// Timeout applied by the process wrapper to compiler and tool runs.
    #[serde(default)]
    pub compile_timeout_ms: Option<u64>,
    /// Timeout applied by the process wrapper to executing built programs.
    #[serde(default)]
    pub execution_timeout_ms: Option<u64>,
}

fn default_max_concurrency() -> usize {
    1
}

fn default_max_asm_size() -> u64 {
    64 * 1024 * 1024
}

fn default_max_output() -> usize {
    1024 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_asm_size: default_max_asm_size(),
            max_output: default_max_output(),
            delay_cleanup: false,
            temp_root: None,
            compile_timeout_ms: None,
            execution_timeout_ms: None,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Which storage backend holds cached results.
    #[serde(default)]
    pub backend: CacheBackend,
    /// Root directory for the disk backend.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Result cache storage backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local in-memory map (default).
    #[default]
    Memory,
    /// Headered artifact files under `cache.dir`.
    Disk,
}

/// A toolchain descriptor as written in `kiln.toml`.
///
/// Every field is optional so that the same shape serves both as the
/// `[toolchain_defaults]` overlay base and as an individual toolchain entry.
/// [`resolve_toolchain`](crate::resolve_toolchain) merges the two.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolchainConfig {
    /// Path to the compiler executable.
    pub exe: Option<String>,
    /// Human-readable name.
    pub name: Option<String>,
    /// Default option string, split shell-style before use.
    pub options: Option<String>,
    /// Whether the toolchain can produce binaries.
    pub supports_binary: Option<bool>,
    /// Whether built programs can be executed.
    pub supports_execute: Option<bool>,
    /// Whether the toolchain can emit an optimization record.
    pub supports_opt_output: Option<bool>,
    /// Flag that requests the optimization record.
    pub opt_arg: Option<String>,
    /// Whether binary output should be disassembled with objdump.
    pub supports_objdump: Option<bool>,
    /// The objdump executable.
    pub objdump: Option<String>,
    /// Shell commands piped over the output file, in order.
    #[serde(default, deserialize_with = "deserialize_opt_string_or_vec")]
    pub post_process: Option<Vec<String>>,
    /// Regex that detects an existing entry point in binary mode.
    pub stub_re: Option<String>,
    /// Text appended to sources lacking an entry point in binary mode.
    pub stub_text: Option<String>,
    /// Name of the primary source file inside the workspace.
    pub compile_filename: Option<String>,
    /// Base name of the output file inside the workspace.
    pub output_filebase: Option<String>,
    /// Extension of the output file, including the dot.
    pub output_ext: Option<String>,
    /// Flags derived from filters; `{output}` is substituted.
    pub filter_options: Option<Vec<String>>,
    /// Flags added when the binary filter is off.
    pub assembly_options: Option<Vec<String>>,
    /// Flags added when the intel filter is on.
    pub intel_options: Option<Vec<String>>,
    /// Regex matching disallowed user options.
    pub forbidden_options: Option<String>,
    /// Regex matching disallowed source text.
    pub forbidden_source: Option<String>,
    /// Prefix for library include paths.
    pub include_flag: Option<String>,
    /// Prefix for library link names.
    pub link_flag: Option<String>,
    /// Prefix for library search paths.
    pub libpath_flag: Option<String>,
    /// Prefix for runtime search paths.
    pub rpath_flag: Option<String>,
}

/// A library entry: versions plus an optional autodetection pattern.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryConfig {
    /// Regex that, when it matches the source, pulls this library in.
    #[serde(default)]
    pub autodetect: Option<String>,
    /// Version used when the library is autodetected.
    #[serde(default)]
    pub default_version: Option<String>,
    /// Available versions keyed by version id.
    #[serde(default)]
    pub versions: BTreeMap<String, LibraryVersionConfig>,
}

/// One version of a library.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryVersionConfig {
    /// Include directories.
    #[serde(default)]
    pub include: Vec<String>,
    /// Shared-library search directories.
    #[serde(default)]
    pub lib_paths: Vec<String>,
    /// Shared libraries to link.
    #[serde(default)]
    pub links: Vec<String>,
    /// Static libraries, linked after the inputs.
    #[serde(default)]
    pub static_links: Vec<String>,
    /// Extra compiler options.
    #[serde(default)]
    pub options: Vec<String>,
    /// Files copied into the workspace for binary builds.
    #[serde(default)]
    pub stage: Vec<String>,
}

/// An auxiliary tool run alongside or after compilation.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    /// Path to the tool executable.
    pub exe: String,
    /// Argument template; `{input}`, `{output}` and `{dir}` are substituted.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub args: Vec<String>,
    /// When the tool runs relative to the compiler.
    #[serde(default)]
    pub kind: ToolKind,
}

/// When a tool runs relative to the compiler.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Does not depend on the compiler's output; runs concurrently with it.
    #[default]
    Independent,
    /// Consumes the compiler's output.
    Postcompilation,
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Allows `args = "--check"` as well as `args = ["--check", "{input}"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

fn deserialize_opt_string_or_vec<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_string_or_vec(deserializer).map(Some)
}
