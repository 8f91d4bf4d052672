//! The toolchain descriptor.
//!
//! A [`Toolchain`] is a value: capability flags plus function fields for the
//! behavior that differs between compilers (option and source checks, input
//! filename transform, user-option filtering, filter-derived flags). Variants
//! are expressed by configuring a descriptor, never by subtyping the engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use kiln_config::ResolvedToolchain;
use regex::Regex;

use crate::error::ToolchainError;
use crate::request::Filters;

/// Rejects a set of user options with a user-visible message.
pub type OptionsCheck = Arc<dyn Fn(&[String]) -> Result<(), String> + Send + Sync>;

/// Rejects a source text with a user-visible message.
pub type SourceCheck = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Rewrites an input filename before it is placed on the command line.
pub type FilenameTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Reduces user options to the ones the toolchain allows.
pub type OptionsFilter = Arc<dyn Fn(&[String]) -> Vec<String> + Send + Sync>;

/// Produces the filter-derived flags for an output path.
pub type FilterFlags = Arc<dyn Fn(&Filters, &str) -> Vec<String> + Send + Sync>;

/// Options a user may never pass, unless the toolchain overrides the pattern.
pub const DEFAULT_FORBIDDEN_OPTIONS: &str =
    r"^(-W[alp],)?((--?(wrapper|fplugin.*|specs|load|plugin|include|fmodule-mapper)|(@.*)|-I|-i)(=.*)?|--)$";

/// Includes that escape the workspace.
const BAD_INCLUDE: &str = r#"^\s*#\s*i(nclude|mport)(_next)?\s+["<](/|.*\.\.)[">]"#;

static DEFAULT_FORBIDDEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_FORBIDDEN_OPTIONS).expect("constant pattern"));

static BAD_INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(BAD_INCLUDE).expect("constant pattern"));

/// Suffix of the secondary source file.
pub const SUB_SOURCE_SUFFIX: &str = "_tgt";

/// Command-line prefixes for library flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFlags {
    /// Include path prefix, e.g. `-I`.
    pub include: String,
    /// Link name prefix, e.g. `-l`.
    pub link: String,
    /// Library search path prefix, e.g. `-L`.
    pub libpath: String,
    /// Runtime search path prefix, e.g. `-Wl,-rpath,`.
    pub rpath: String,
}

impl Default for LibraryFlags {
    fn default() -> Self {
        Self {
            include: "-I".into(),
            link: "-l".into(),
            libpath: "-L".into(),
            rpath: "-Wl,-rpath,".into(),
        }
    }
}

/// Everything the engine needs to know about one compiler.
#[derive(Clone)]
pub struct Toolchain {
    /// Toolchain id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Compiler executable.
    pub exe: String,
    /// Default option string, split shell-style when building arguments.
    pub options: String,
    /// Whether binaries can be produced.
    pub supports_binary: bool,
    /// Whether built programs can be run.
    pub supports_execute: bool,
    /// Whether an optimization record can be produced.
    pub supports_opt_output: bool,
    /// Flag requesting the optimization record.
    pub opt_arg: String,
    /// Whether binary output is disassembled.
    pub supports_objdump: bool,
    /// The objdump executable.
    pub objdump: String,
    /// Shell commands the raw output is piped through, in order.
    pub post_process: Vec<String>,
    /// Detects an entry point in binary mode.
    pub stub_re: Option<Regex>,
    /// Appended when binary mode finds no entry point.
    pub stub_text: String,
    /// Primary source file name inside the workspace.
    pub compile_filename: String,
    /// Output file base name.
    pub output_filebase: String,
    /// Output file extension, including the dot.
    pub output_ext: String,
    /// Library flag prefixes.
    pub library_flags: LibraryFlags,
    /// Pre-flight option check.
    pub check_options: OptionsCheck,
    /// Pre-flight source check.
    pub check_source: SourceCheck,
    /// Input filename transform.
    pub filename_transform: FilenameTransform,
    /// User option allow-list.
    pub filter_user_options: OptionsFilter,
    /// Filter-derived flags.
    pub options_for_filter: FilterFlags,
}

impl Toolchain {
    /// Creates a descriptor with no capabilities and the default checks.
    pub fn new(id: impl Into<String>, exe: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            exe: exe.into(),
            options: String::new(),
            supports_binary: false,
            supports_execute: false,
            supports_opt_output: false,
            opt_arg: String::new(),
            supports_objdump: false,
            objdump: "objdump".into(),
            post_process: Vec::new(),
            stub_re: None,
            stub_text: String::new(),
            compile_filename: "example.src".into(),
            output_filebase: "output".into(),
            output_ext: ".s".into(),
            library_flags: LibraryFlags::default(),
            check_options: forbidden_options_check(DEFAULT_FORBIDDEN_RE.clone()),
            check_source: source_check(None),
            filename_transform: Arc::new(|name: &str| name.to_string()),
            filter_user_options: Arc::new(|opts: &[String]| opts.to_vec()),
            options_for_filter: filter_flags(Vec::new(), Vec::new(), Vec::new()),
        }
    }

    /// Builds a descriptor from a resolved configuration entry.
    pub fn from_resolved(resolved: &ResolvedToolchain) -> Result<Self, ToolchainError> {
        if resolved.supports_execute && !resolved.supports_binary {
            return Err(ToolchainError::Inconsistent {
                id: resolved.id.clone(),
                reason: "supports_execute requires supports_binary".into(),
            });
        }

        let stub_re = resolved
            .stub_re
            .as_deref()
            .map(|p| compile_regex("stub_re", p))
            .transpose()?;
        let forbidden_options = match resolved.forbidden_options.as_deref() {
            None => Some(DEFAULT_FORBIDDEN_RE.clone()),
            Some("") => None,
            Some(p) => Some(compile_regex("forbidden_options", p)?),
        };
        let forbidden_source = match resolved.forbidden_source.as_deref() {
            None | Some("") => None,
            Some(p) => Some(compile_regex("forbidden_source", p)?),
        };

        let mut tc = Self::new(&resolved.id, &resolved.exe);
        tc.name = resolved.name.clone();
        tc.options = resolved.options.clone();
        tc.supports_binary = resolved.supports_binary;
        tc.supports_execute = resolved.supports_execute;
        tc.supports_opt_output = resolved.supports_opt_output;
        tc.opt_arg = resolved.opt_arg.clone();
        tc.supports_objdump = resolved.supports_objdump;
        tc.objdump = resolved.objdump.clone();
        tc.post_process = resolved.post_process.clone();
        tc.stub_re = stub_re;
        tc.stub_text = resolved.stub_text.clone();
        tc.compile_filename = resolved.compile_filename.clone();
        tc.output_filebase = resolved.output_filebase.clone();
        tc.output_ext = resolved.output_ext.clone();
        tc.library_flags = LibraryFlags {
            include: resolved.include_flag.clone(),
            link: resolved.link_flag.clone(),
            libpath: resolved.libpath_flag.clone(),
            rpath: resolved.rpath_flag.clone(),
        };
        tc.check_options = match forbidden_options {
            Some(re) => forbidden_options_check(re),
            None => Arc::new(|_: &[String]| Ok(())),
        };
        tc.check_source = source_check(forbidden_source);
        tc.options_for_filter = filter_flags(
            resolved.filter_options.clone(),
            resolved.assembly_options.clone(),
            resolved.intel_options.clone(),
        );
        Ok(tc)
    }

    /// Sets the default option string.
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Enables binary output, optionally with disassembly.
    pub fn with_binary(mut self, objdump: bool) -> Self {
        self.supports_binary = true;
        self.supports_objdump = objdump;
        self
    }

    /// Enables execution of built programs. Implies binary output.
    pub fn with_execute(mut self) -> Self {
        self.supports_binary = true;
        self.supports_execute = true;
        self
    }

    /// Enables the optimization record, requested with `arg`.
    pub fn with_opt_output(mut self, arg: impl Into<String>) -> Self {
        self.supports_opt_output = true;
        self.opt_arg = arg.into();
        self
    }

    /// Sets the post-process pipeline.
    pub fn with_post_process(mut self, commands: Vec<String>) -> Self {
        self.post_process = commands;
        self
    }

    /// Sets the entry-point pattern and the stub appended when it is missing.
    pub fn with_stub(mut self, pattern: &str, text: impl Into<String>) -> Result<Self, ToolchainError> {
        self.stub_re = Some(compile_regex("stub_re", pattern)?);
        self.stub_text = text.into();
        Ok(self)
    }

    /// Sets the primary source file name.
    pub fn with_compile_filename(mut self, name: impl Into<String>) -> Self {
        self.compile_filename = name.into();
        self
    }

    /// Replaces the source check.
    pub fn with_source_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.check_source = Arc::new(check);
        self
    }

    /// Replaces the option check.
    pub fn with_options_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&[String]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.check_options = Arc::new(check);
        self
    }

    /// Replaces the input filename transform.
    pub fn with_filename_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.filename_transform = Arc::new(transform);
        self
    }

    /// Replaces the user option allow-list.
    pub fn with_user_options_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&[String]) -> Vec<String> + Send + Sync + 'static,
    {
        self.filter_user_options = Arc::new(filter);
        self
    }

    /// Replaces the filter-derived flags.
    pub fn with_filter_flags<F>(mut self, flags: F) -> Self
    where
        F: Fn(&Filters, &str) -> Vec<String> + Send + Sync + 'static,
    {
        self.options_for_filter = Arc::new(flags);
        self
    }

    /// Clears the binary filter if this toolchain cannot produce binaries.
    pub fn downgrade(&self, filters: &Filters) -> Filters {
        let mut filters = filters.clone();
        if filters.binary && !self.supports_binary {
            filters.binary = false;
        }
        filters
    }

    /// Appends the entry-point stub in binary mode when the source lacks one.
    pub fn pre_process(&self, source: &str, filters: &Filters) -> String {
        match &self.stub_re {
            Some(re) if filters.binary && !re.is_match(source) => {
                format!("{source}\n{}\n", self.stub_text)
            }
            _ => source.to_string(),
        }
    }

    /// Path of the compiler output inside `dir`.
    pub fn output_filename(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.output_filebase, self.output_ext))
    }

    /// Path of the linked program inside `dir`.
    pub fn executable_filename(&self, dir: &Path) -> PathBuf {
        dir.join(&self.output_filebase)
    }

    /// Path of the optimization record for `output`.
    pub fn opt_output_filename(output: &Path) -> PathBuf {
        output.with_extension("opt.yaml")
    }

    /// Path of the secondary source for `input`.
    pub fn sub_filename(input: &Path) -> PathBuf {
        let mut name = input.as_os_str().to_os_string();
        name.push(SUB_SOURCE_SUFFIX);
        PathBuf::from(name)
    }
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolchain")
            .field("id", &self.id)
            .field("exe", &self.exe)
            .field("options", &self.options)
            .field("supports_binary", &self.supports_binary)
            .field("supports_execute", &self.supports_execute)
            .field("supports_opt_output", &self.supports_opt_output)
            .field("supports_objdump", &self.supports_objdump)
            .field("post_process", &self.post_process)
            .field("compile_filename", &self.compile_filename)
            .finish_non_exhaustive()
    }
}

fn compile_regex(field: &str, pattern: &str) -> Result<Regex, ToolchainError> {
    Regex::new(pattern).map_err(|source| ToolchainError::InvalidRegex {
        field: field.to_string(),
        source,
    })
}


fn forbidden_options_check(re: Regex) -> OptionsCheck {
    Arc::new(move |options: &[String]| {
        let bad: Vec<&str> = options
            .iter()
            .filter(|o| re.is_match(o))
            .map(String::as_str)
            .collect();
        if bad.is_empty() {
            Ok(())
        } else {
            Err(format!("Bad options: {}", bad.join(", ")))
        }
    })
}

fn source_check(forbidden: Option<Regex>) -> SourceCheck {
    Arc::new(move |source: &str| {
        for (n, line) in source.lines().enumerate() {
            if BAD_INCLUDE_RE.is_match(line) {
                return Err(format!(
                    "<stdin>:{}:1: no absolute or relative includes please",
                    n + 1
                ));
            }
            if forbidden.as_ref().is_some_and(|re| re.is_match(line)) {
                return Err(format!("<stdin>:{}:1: disallowed source construct", n + 1));
            }
        }
        Ok(())
    })
}

fn filter_flags(filter: Vec<String>, assembly: Vec<String>, intel: Vec<String>) -> FilterFlags {
    Arc::new(move |filters: &Filters, output: &str| {
        let mut flags: Vec<String> = filter.iter().map(|f| f.replace("{output}", output)).collect();
        if !filters.binary {
            flags.extend(assembly.iter().cloned());
        }
        if filters.intel {
            flags.extend(intel.iter().cloned());
        }
        flags
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedToolchain {
        let config = kiln_config::load_config_from_str(
            r#"
[toolchains.cc]
exe = "/usr/bin/cc"
supports_binary = true
filter_options = ["-o", "{output}"]
assembly_options = ["-S"]
intel_options = ["-masm=intel"]
"#,
        )
        .unwrap();
        kiln_config::resolve_toolchain(&config, "cc").unwrap()
    }

    #[test]
    fn default_forbidden_pattern_compiles() {
        assert!(Regex::new(DEFAULT_FORBIDDEN_OPTIONS).is_ok());
        assert!(Regex::new(BAD_INCLUDE).is_ok());
    }

    #[test]
    fn from_resolved_copies_fields() {
        let tc = Toolchain::from_resolved(&resolved()).unwrap();
        assert_eq!(tc.exe, "/usr/bin/cc");
        assert!(tc.supports_binary);
        assert_eq!(tc.library_flags, LibraryFlags::default());
    }

    #[test]
    fn execute_without_binary_is_inconsistent() {
        let mut r = resolved();
        r.supports_binary = false;
        r.supports_execute = true;
        let err = Toolchain::from_resolved(&r).unwrap_err();
        assert!(matches!(err, ToolchainError::Inconsistent { .. }));
    }

    #[test]
    fn invalid_stub_regex_rejected() {
        let mut r = resolved();
        r.stub_re = Some("(".into());
        let err = Toolchain::from_resolved(&r).unwrap_err();
        assert!(matches!(err, ToolchainError::InvalidRegex { ref field, .. } if field == "stub_re"));
    }

    #[test]
    fn default_options_check() {
        let tc = Toolchain::new("t", "/bin/t");
        assert!((tc.check_options)(&["-O2".into(), "-Wall".into()]).is_ok());
        let err = (tc.check_options)(&["-O2".into(), "-fplugin=evil.so".into(), "@file".into()])
            .unwrap_err();
        assert_eq!(err, "Bad options: -fplugin=evil.so, @file");
    }

    #[test]
    fn empty_forbidden_options_disables_check() {
        let mut r = resolved();
        r.forbidden_options = Some(String::new());
        let tc = Toolchain::from_resolved(&r).unwrap();
        assert!((tc.check_options)(&["--".into()]).is_ok());
    }

    #[test]
    fn default_source_check_rejects_escaping_includes() {
        let tc = Toolchain::new("t", "/bin/t");
        assert!((tc.check_source)("#include <stdio.h>\nint x;").is_ok());
        let err = (tc.check_source)("int a;\n#include \"/etc/passwd\"").unwrap_err();
        assert_eq!(err, "<stdin>:2:1: no absolute or relative includes please");
        assert!((tc.check_source)("#include <../secret.h>").is_err());
    }

    #[test]
    fn forbidden_source_regex() {
        let mut r = resolved();
        r.forbidden_source = Some("badcode".into());
        let tc = Toolchain::from_resolved(&r).unwrap();
        assert!((tc.check_source)("badcode").is_err());
        assert!((tc.check_source)("goodcode").is_ok());
    }

    #[test]
    fn filter_flags_depend_on_filters() {
        let tc = Toolchain::from_resolved(&resolved()).unwrap();
        let asm = (tc.options_for_filter)(&Filters::default(), "/w/output.s");
        assert_eq!(asm, vec!["-o", "/w/output.s", "-S"]);
        let filters = Filters {
            binary: true,
            intel: true,
            ..Filters::default()
        };
        let bin = (tc.options_for_filter)(&filters, "/w/output.s");
        assert_eq!(bin, vec!["-o", "/w/output.s", "-masm=intel"]);
    }

    #[test]
    fn downgrade_clears_unsupported_binary() {
        let tc = Toolchain::new("t", "/bin/t");
        let filters = Filters {
            binary: true,
            ..Filters::default()
        };
        assert!(!tc.downgrade(&filters).binary);
        assert!(tc.with_binary(false).downgrade(&filters).binary);
    }

    #[test]
    fn stub_appended_only_in_binary_mode_without_match() {
        let tc = Toolchain::new("t", "/bin/t")
            .with_stub(r"\bmain\b", "int main(void) { return 0; }")
            .unwrap();
        let binary = Filters {
            binary: true,
            ..Filters::default()
        };
        assert_eq!(
            tc.pre_process("int f;", &binary),
            "int f;\nint main(void) { return 0; }\n"
        );
        assert_eq!(tc.pre_process("int main;", &binary), "int main;");
        assert_eq!(tc.pre_process("int f;", &Filters::default()), "int f;");
    }

    #[test]
    fn derived_paths() {
        let tc = Toolchain::new("t", "/bin/t");
        let dir = Path::new("/w");
        assert_eq!(tc.output_filename(dir), PathBuf::from("/w/output.s"));
        assert_eq!(tc.executable_filename(dir), PathBuf::from("/w/output"));
        assert_eq!(
            Toolchain::opt_output_filename(Path::new("/w/output.s")),
            PathBuf::from("/w/output.opt.yaml")
        );
        assert_eq!(
            Toolchain::sub_filename(Path::new("/w/example.src")),
            PathBuf::from("/w/example.src_tgt")
        );
    }
}
