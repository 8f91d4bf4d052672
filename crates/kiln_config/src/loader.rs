//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{CacheBackend, Config};
use std::path::Path;

/// Name of the configuration file inside a service directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a directory.
///
/// Reads `<dir>/kiln.toml`, parses it, and validates cross-field constraints.
pub fn load_config(dir: &Path) -> Result<Config, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and values are consistent.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.engine.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_concurrency must be at least 1".to_string(),
        ));
    }
    if config.cache.backend == CacheBackend::Disk && config.cache.dir.is_none() {
        return Err(ConfigError::MissingField("cache.dir".to_string()));
    }
    for (id, tc) in &config.toolchains {
        if !tc.has_exe(&config.toolchain_defaults) {
            return Err(ConfigError::MissingField(format!("toolchains.{id}.exe")));
        }
    }
    for (id, lib) in &config.libraries {
        if let Some(version) = &lib.default_version {
            if !lib.versions.contains_key(version) {
                return Err(ConfigError::ValidationError(format!(
                    "libraries.{id}.default_version '{version}' is not a listed version"
                )));
            }
        }
    }
    for (id, tool) in &config.tools {
        if tool.exe.is_empty() {
            return Err(ConfigError::MissingField(format!("tools.{id}.exe")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolKind;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.engine.max_concurrency, 1);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert!(config.toolchains.is_empty());
        assert!(config.libraries.is_empty());
        assert!(config.tools.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r##"
[engine]
max_concurrency = 4
max_asm_size = 1024
delay_cleanup = true
temp_root = "/var/tmp"
compile_timeout_ms = 20000

[cache]
backend = "disk"
dir = ".kiln-cache"

[toolchain_defaults]
objdump = "objdump"

[toolchains.mlir-tv]
exe = "/opt/mlir-tv/mlir-tv"
options = "--smt-to=10000"
stub_re = "\\bmain\\b"
stub_text = "func.func @main() { return }"
compile_filename = "example.mlir"

[libraries.fmt]
autodetect = "#include\\s*<fmt/"
default_version = "10"

[libraries.fmt.versions.10]
include = ["/opt/fmt/10/include"]
links = ["fmt"]

[tools.checker]
exe = "/usr/bin/checker"
args = ["--strict", "{input}"]
"##;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.engine.max_concurrency, 4);
        assert!(config.engine.delay_cleanup);
        assert_eq!(config.engine.compile_timeout_ms, Some(20000));
        assert_eq!(config.cache.backend, CacheBackend::Disk);
        assert!(config.toolchains.contains_key("mlir-tv"));
        assert_eq!(config.libraries["fmt"].versions["10"].links, vec!["fmt"]);
        assert_eq!(config.tools["checker"].kind, ToolKind::Independent);
        assert_eq!(config.tools["checker"].args.len(), 2);
    }

    #[test]
    fn zero_concurrency_errors() {
        let err = load_config_from_str("[engine]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn disk_cache_without_dir_errors() {
        let err = load_config_from_str("[cache]\nbackend = \"disk\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn toolchain_without_exe_errors() {
        let err = load_config_from_str("[toolchains.cc]\noptions = \"-O2\"\n").unwrap_err();
        match err {
            ConfigError::MissingField(field) => assert_eq!(field, "toolchains.cc.exe"),
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn unknown_default_version_errors() {
        let toml = r#"
[libraries.fmt]
default_version = "11"

[libraries.fmt.versions.10]
include = ["/opt/fmt/10/include"]
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[toolchains.cc]\nexe = \"/usr/bin/cc\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert!(config.toolchains.contains_key("cc"));
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
