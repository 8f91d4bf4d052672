//! Per-request temporary directories.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::WorkspaceError;
use crate::request::SourceFile;
use crate::result::CompilationResult;
use crate::toolchain::Toolchain;

/// Creates, fills and releases workspaces.
///
/// Every call to [`new_workspace`](Self::new_workspace) yields a fresh
/// directory owned by exactly one request. Nothing is reused.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceManager {
    temp_root: Option<PathBuf>,
    delay_cleanup: bool,
}

impl WorkspaceManager {
    /// Creates a manager placing workspaces under `temp_root` (the system
    /// temporary directory when `None`). With `delay_cleanup`, released
    /// workspaces stay on disk.
    pub fn new(temp_root: Option<PathBuf>, delay_cleanup: bool) -> Self {
        Self {
            temp_root,
            delay_cleanup,
        }
    }

    /// Creates a fresh, empty workspace directory.
    pub async fn new_workspace(&self) -> Result<PathBuf, WorkspaceError> {
        let root = self.temp_root.clone();
        tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("kiln-");
            let dir = match root {
                Some(root) => {
                    std::fs::create_dir_all(&root).map_err(WorkspaceError::Create)?;
                    builder.tempdir_in(root)
                }
                None => builder.tempdir(),
            }
            .map_err(WorkspaceError::Create)?;
            Ok::<_, WorkspaceError>(dir.keep())
        })
        .await
        .map_err(|e| WorkspaceError::Create(io::Error::other(e)))?
    }

    /// Writes the primary source, the secondary source and the extra files
    /// into `dir`, returning the primary source path.
    ///
    /// The secondary source always exists next to the primary one, named by
    /// [`Toolchain::sub_filename`]; it is empty when there is none. Each file
    /// is written whole, but a failure part way leaves earlier files behind.
    pub async fn materialize(
        &self,
        dir: &Path,
        compile_filename: &str,
        source: &str,
        sub_source: Option<&str>,
        files: &[SourceFile],
    ) -> Result<PathBuf, WorkspaceError> {
        let primary = dir.join(compile_filename);
        write_file(&primary, source).await?;
        write_file(&Toolchain::sub_filename(&primary), sub_source.unwrap_or_default()).await?;
        for file in files {
            write_file(&dir.join(&file.filename), &file.contents).await?;
        }
        debug!(dir = %dir.display(), files = files.len(), "workspace materialized");
        Ok(primary)
    }

    /// Releases the workspace referenced by `result` and clears `dir_path`.
    ///
    /// Also releases the workspace of a nested execution build. The paths are
    /// cleared before this returns, so calling it again is a no-op even while
    /// the first removal is pending. The returned future removes the
    /// directories. Failures are logged and otherwise ignored.
    pub fn cleanup(
        &self,
        result: &mut CompilationResult,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut dirs = Vec::new();
        let mut next = Some(result);
        while let Some(current) = next {
            dirs.extend(current.dir_path.take());
            next = current
                .exec_result
                .as_mut()
                .and_then(|e| e.build_result.as_deref_mut());
        }

        let delay_cleanup = self.delay_cleanup;
        async move {
            for dir in dirs {
                release(dir, delay_cleanup).await;
            }
        }
    }

    /// Releases a workspace that no result refers to.
    pub async fn release(&self, dir: PathBuf) {
        release(dir, self.delay_cleanup).await;
    }
}

async fn release(dir: PathBuf, delay_cleanup: bool) {
    if delay_cleanup {
        info!(dir = %dir.display(), "keeping workspace");
        return;
    }
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => debug!(dir = %dir.display(), "workspace removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove workspace"),
    }
}

/// Checks that an extra file name stays inside the workspace.
pub fn validate_filename(name: &str) -> Result<(), String> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.is_empty() || escapes {
        return Err(format!("Invalid filename: {name}"));
    }
    Ok(())
}

async fn write_file(path: &Path, contents: &str) -> Result<(), WorkspaceError> {
    let write_err = |source| WorkspaceError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(path, contents).await.map_err(write_err)
}
