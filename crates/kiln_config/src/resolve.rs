//! Toolchain resolution: overlaying a toolchain entry on `[toolchain_defaults]`.

use crate::error::ConfigError;
use crate::types::{Config, ToolchainConfig};

/// A fully resolved toolchain descriptor with defaults filled in.
///
/// `[toolchain_defaults]` is the base and the named toolchain's own fields
/// override it field by field. Anything neither sets gets a built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToolchain {
    /// The toolchain id (the key under `[toolchains]`).
    pub id: String,
    /// Human-readable name (defaults to the id).
    pub name: String,
    /// Path to the compiler executable.
    pub exe: String,
    /// Default option string.
    pub options: String,
    /// Whether the toolchain can produce binaries.
    pub supports_binary: bool,
    /// Whether built programs can be executed.
    pub supports_execute: bool,
    /// Whether the toolchain can emit an optimization record.
    pub supports_opt_output: bool,
    /// Flag that requests the optimization record.
    pub opt_arg: String,
    /// Whether binary output is disassembled.
    pub supports_objdump: bool,
    /// The objdump executable.
    pub objdump: String,
    /// Post-process shell commands.
    pub post_process: Vec<String>,
    /// Entry-point detection regex for binary mode.
    pub stub_re: Option<String>,
    /// Entry-point stub text.
    pub stub_text: String,
    /// Primary source file name.
    pub compile_filename: String,
    /// Output file base name.
    pub output_filebase: String,
    /// Output file extension.
    pub output_ext: String,
    /// Filter-derived flags.
    pub filter_options: Vec<String>,
    /// Flags added when not building a binary.
    pub assembly_options: Vec<String>,
    /// Flags added for Intel syntax.
    pub intel_options: Vec<String>,
    /// Disallowed-option regex.
    pub forbidden_options: Option<String>,
    /// Disallowed-source regex.
    pub forbidden_source: Option<String>,
    /// Include path prefix.
    pub include_flag: String,
    /// Link name prefix.
    pub link_flag: String,
    /// Library search path prefix.
    pub libpath_flag: String,
    /// Runtime search path prefix.
    pub rpath_flag: String,
}

/// Resolves a named toolchain by overlaying it on the configured defaults.
pub fn resolve_toolchain(config: &Config, id: &str) -> Result<ResolvedToolchain, ConfigError> {
    let tc = config
        .toolchains
        .get(id)
        .ok_or_else(|| ConfigError::UnknownToolchain(id.to_string()))?;
    let base = &config.toolchain_defaults;

    let exe = pick(&tc.exe, &base.exe)
        .ok_or_else(|| ConfigError::MissingField(format!("toolchains.{id}.exe")))?;

    Ok(ResolvedToolchain {
        id: id.to_string(),
        name: pick(&tc.name, &base.name).unwrap_or_else(|| id.to_string()),
        exe,
        options: pick(&tc.options, &base.options).unwrap_or_default(),
        supports_binary: pick(&tc.supports_binary, &base.supports_binary).unwrap_or(false),
        supports_execute: pick(&tc.supports_execute, &base.supports_execute).unwrap_or(false),
        supports_opt_output: pick(&tc.supports_opt_output, &base.supports_opt_output)
            .unwrap_or(false),
        opt_arg: pick(&tc.opt_arg, &base.opt_arg).unwrap_or_default(),
        supports_objdump: pick(&tc.supports_objdump, &base.supports_objdump).unwrap_or(false),
        objdump: pick(&tc.objdump, &base.objdump).unwrap_or_else(|| "objdump".to_string()),
        post_process: pick(&tc.post_process, &base.post_process).unwrap_or_default(),
        stub_re: pick(&tc.stub_re, &base.stub_re),
        stub_text: pick(&tc.stub_text, &base.stub_text).unwrap_or_default(),
        compile_filename: pick(&tc.compile_filename, &base.compile_filename)
            .unwrap_or_else(|| "example.src".to_string()),
        output_filebase: pick(&tc.output_filebase, &base.output_filebase)
            .unwrap_or_else(|| "output".to_string()),
        output_ext: pick(&tc.output_ext, &base.output_ext).unwrap_or_else(|| ".s".to_string()),
        filter_options: pick(&tc.filter_options, &base.filter_options).unwrap_or_default(),
        assembly_options: pick(&tc.assembly_options, &base.assembly_options).unwrap_or_default(),
        intel_options: pick(&tc.intel_options, &base.intel_options).unwrap_or_default(),
        forbidden_options: pick(&tc.forbidden_options, &base.forbidden_options),
        forbidden_source: pick(&tc.forbidden_source, &base.forbidden_source),
        include_flag: pick(&tc.include_flag, &base.include_flag)
            .unwrap_or_else(|| "-I".to_string()),
        link_flag: pick(&tc.link_flag, &base.link_flag).unwrap_or_else(|| "-l".to_string()),
        libpath_flag: pick(&tc.libpath_flag, &base.libpath_flag)
            .unwrap_or_else(|| "-L".to_string()),
        rpath_flag: pick(&tc.rpath_flag, &base.rpath_flag)
            .unwrap_or_else(|| "-Wl,-rpath,".to_string()),
    })
}

fn pick<T: Clone>(own: &Option<T>, base: &Option<T>) -> Option<T> {
    own.as_ref().or(base.as_ref()).cloned()
}

impl ToolchainConfig {
    /// Returns `true` if this entry names an executable, directly or not.
    pub fn has_exe(&self, defaults: &ToolchainConfig) -> bool {
        self.exe.as_deref().or(defaults.exe.as_deref()).is_some_and(|e| !e.is_empty())
    }
}
