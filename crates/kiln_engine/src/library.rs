//! Library resolution: flags, runtime paths and autodetection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_cache::CacheKey;
use kiln_config::{LibraryConfig, LibraryVersionConfig};
use regex::Regex;
use tracing::{debug, warn};

use crate::request::LibrarySpec;
use crate::result::Download;
use crate::toolchain::LibraryFlags;

/// Turns library selections into command-line flags.
///
/// Every method returns flags in selection order. Unknown selections
/// contribute nothing.
#[async_trait]
pub trait LibraryResolver: Send + Sync {
    /// Include path flags.
    fn include_args(&self, libs: &[LibrarySpec]) -> Vec<String>;

    /// Extra compiler options required by the libraries.
    fn library_options(&self, libs: &[LibrarySpec]) -> Vec<String>;

    /// Shared library link flags.
    fn link_args(&self, libs: &[LibrarySpec]) -> Vec<String>;

    /// Static library link flags.
    fn static_link_args(&self, libs: &[LibrarySpec]) -> Vec<String>;

    /// Shared library search path and runtime path flags.
    fn lib_path_args(&self, libs: &[LibrarySpec]) -> Vec<String>;

    /// Directories the built program needs on its library search path.
    fn runtime_paths(&self, libs: &[LibrarySpec]) -> Vec<PathBuf>;

    /// Infers libraries and options from the source. Returns `true` if either
    /// was changed.
    fn autodetect(
        &self,
        _source: &str,
        _libs: &mut Vec<LibrarySpec>,
        _options: &mut Vec<String>,
    ) -> bool {
        false
    }

    /// Fetches whatever a binary build of `key` needs into `dir`. Returns
    /// what was placed there.
    async fn prepare_build_environment(
        &self,
        _key: &CacheKey,
        _dir: &Path,
        _libs: &[LibrarySpec],
    ) -> Vec<Download> {
        Vec::new()
    }
}

/// A resolver that knows no libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLibraries;

#[async_trait]
impl LibraryResolver for NoLibraries {
    fn include_args(&self, _libs: &[LibrarySpec]) -> Vec<String> {
        Vec::new()
    }

    fn library_options(&self, _libs: &[LibrarySpec]) -> Vec<String> {
        Vec::new()
    }

    fn link_args(&self, _libs: &[LibrarySpec]) -> Vec<String> {
        Vec::new()
    }

    fn static_link_args(&self, _libs: &[LibrarySpec]) -> Vec<String> {
        Vec::new()
    }

    fn lib_path_args(&self, _libs: &[LibrarySpec]) -> Vec<String> {
        Vec::new()
    }

    fn runtime_paths(&self, _libs: &[LibrarySpec]) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Resolver over the `[libraries]` table.
pub struct ConfiguredLibraries {
    libraries: BTreeMap<String, LibraryConfig>,
    detectors: Vec<(String, Regex)>,
    flags: LibraryFlags,
}

impl ConfiguredLibraries {
    /// Creates a resolver. Autodetect patterns that do not compile are skipped.
    pub fn new(libraries: BTreeMap<String, LibraryConfig>, flags: LibraryFlags) -> Self {
        let detectors = libraries
            .iter()
            .filter_map(|(id, lib)| {
                let pattern = lib.autodetect.as_deref()?;
                match Regex::new(pattern) {
                    Ok(re) => Some((id.clone(), re)),
                    Err(e) => {
                        tracing::warn!(library = %id, error = %e, "ignoring invalid autodetect pattern");
                        None
                    }
                }
            })
            .collect();
        Self {
            libraries,
            detectors,
            flags,
        }
    }

    fn lookup(&self, spec: &LibrarySpec) -> Option<&LibraryVersionConfig> {
        let found = self
            .libraries
            .get(&spec.id)
            .and_then(|lib| lib.versions.get(&spec.version));
        if found.is_none() {
            debug!(library = %spec.id, version = %spec.version, "unknown library selection");
        }
        found
    }

    fn versions<'a>(
        &'a self,
        libs: &'a [LibrarySpec],
    ) -> impl Iterator<Item = &'a LibraryVersionConfig> + 'a {
        libs.iter().filter_map(|spec| self.lookup(spec))
    }

    fn prefixed<F>(&self, libs: &[LibrarySpec], prefix: &str, field: F) -> Vec<String>
    where
        F: Fn(&LibraryVersionConfig) -> &[String],
    {
        self.versions(libs)
            .flat_map(|v| field(v).iter().map(move |item| format!("{prefix}{item}")))
            .collect()
    }
}

#[async_trait]
impl LibraryResolver for ConfiguredLibraries {
    fn include_args(&self, libs: &[LibrarySpec]) -> Vec<String> {
        self.prefixed(libs, &self.flags.include, |v| v.include.as_slice())
    }

    fn library_options(&self, libs: &[LibrarySpec]) -> Vec<String> {
        self.versions(libs).flat_map(|v| v.options.iter().cloned()).collect()
    }

    fn link_args(&self, libs: &[LibrarySpec]) -> Vec<String> {
        self.prefixed(libs, &self.flags.link, |v| v.links.as_slice())
    }

    fn static_link_args(&self, libs: &[LibrarySpec]) -> Vec<String> {
        self.prefixed(libs, &self.flags.link, |v| v.static_links.as_slice())
    }

    fn lib_path_args(&self, libs: &[LibrarySpec]) -> Vec<String> {
        let mut args = Vec::new();
        for version in self.versions(libs) {
            for path in &version.lib_paths {
                args.push(format!("{}{path}", self.flags.libpath));
                args.push(format!("{}{path}", self.flags.rpath));
            }
        }
        args
    }

    fn runtime_paths(&self, libs: &[LibrarySpec]) -> Vec<PathBuf> {
        self.versions(libs)
            .flat_map(|v| v.lib_paths.iter().map(PathBuf::from))
            .collect()
    }

    fn autodetect(
        &self,
        source: &str,
        libs: &mut Vec<LibrarySpec>,
        _options: &mut Vec<String>,
    ) -> bool {
        let mut changed = false;
        for (id, re) in &self.detectors {
            if libs.iter().any(|l| &l.id == id) || !re.is_match(source) {
                continue;
            }
            let Some(lib) = self.libraries.get(id) else {
                continue;
            };
            let version = lib
                .default_version
                .clone()
                .or_else(|| lib.versions.keys().next().cloned());
            if let Some(version) = version {
                debug!(library = %id, %version, "autodetected library");
                libs.push(LibrarySpec::new(id.clone(), version));
                changed = true;
            }
        }
        changed
    }

    /// Copies each selected version's `stage` files into `dir`. A file that
    /// cannot be copied is logged and left out.
    async fn prepare_build_environment(
        &self,
        key: &CacheKey,
        dir: &Path,
        libs: &[LibrarySpec],
    ) -> Vec<Download> {
        let mut downloads = Vec::new();
        for spec in libs {
            let Some(version) = self.lookup(spec) else {
                continue;
            };
            for file in &version.stage {
                let source = Path::new(file);
                let Some(name) = source.file_name() else {
                    warn!(%key, library = %spec.id, file = %file, "stage entry has no file name");
                    continue;
                };
                match tokio::fs::copy(source, dir.join(name)).await {
                    Ok(_) => downloads.push(Download {
                        name: spec.id.clone(),
                        version: spec.version.clone(),
                        path: PathBuf::from(name),
                    }),
                    Err(e) => {
                        warn!(%key, library = %spec.id, file = %file, error = %e, "failed to stage library file");
                    }
                }
            }
        }
        if !downloads.is_empty() {
            debug!(%key, staged = downloads.len(), "prepared build environment");
        }
        downloads
    }
}
