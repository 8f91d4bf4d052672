//! Disassembly of binary compiler output.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::process::{ExecOptions, ProcessExecutor};

/// Rendered when the binary exceeds the size bound.
pub const TOO_MUCH_DATA: &str = "<No output: objdump returned too much data>";

/// Renders a binary as assembly text.
#[async_trait]
pub trait Disassembler: Send + Sync {
    /// Disassembles `output`. Files larger than `max_size` bytes are not
    /// disassembled; a placeholder message is returned instead.
    async fn disassemble(
        &self,
        output: &Path,
        max_size: u64,
        intel: bool,
        demangle: bool,
    ) -> Result<String, ExecError>;
}

/// [`Disassembler`] running `objdump`.
pub struct ObjdumpDisassembler {
    objdump: String,
    executor: Arc<dyn ProcessExecutor>,
    max_output: Option<usize>,
}

impl ObjdumpDisassembler {
    /// Creates a disassembler running `objdump` through `executor`.
    pub fn new(objdump: impl Into<String>, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            objdump: objdump.into(),
            executor,
            max_output: None,
        }
    }

    /// Bounds the captured disassembly.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = Some(max_output);
        self
    }

    /// The objdump argument vector for `output`.
    pub fn arguments(output: &Path, intel: bool, demangle: bool) -> Vec<String> {
        let mut args = vec![
            "-d".to_string(),
            output.display().to_string(),
            "-l".to_string(),
            "--insn-width=16".to_string(),
        ];
        if intel {
            args.extend(["-M".to_string(), "intel".to_string()]);
        }
        if demangle {
            args.push("-C".to_string());
        }
        args
    }
}

#[async_trait]
impl Disassembler for ObjdumpDisassembler {
    async fn disassemble(
        &self,
        output: &Path,
        max_size: u64,
        intel: bool,
        demangle: bool,
    ) -> Result<String, ExecError> {
        let size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .map_err(|source| ExecError::Io {
                exe: self.objdump.clone(),
                source,
            })?;
        if size > max_size {
            return Ok(TOO_MUCH_DATA.to_string());
        }

        let args = Self::arguments(output, intel, demangle);
        let opts = ExecOptions {
            cwd: output.parent().map(Path::to_path_buf),
            max_output: self.max_output,
            ..ExecOptions::default()
        };
        let out = self.executor.exec(&self.objdump, &args, &opts).await?;
        if out.code != 0 {
            return Ok(format!("<No output: objdump returned {}>", out.code));
        }
        Ok(out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExecOutput;
    use parking_lot::Mutex;

    struct Recording {
        calls: Mutex<Vec<Vec<String>>>,
        code: i32,
    }

    #[async_trait]
    impl ProcessExecutor for Recording {
        async fn exec(
            &self,
            _exe: &str,
            args: &[String],
            _opts: &ExecOptions,
        ) -> Result<ExecOutput, ExecError> {
            self.calls.lock().push(args.to_vec());
            Ok(ExecOutput {
                code: self.code,
                stdout: "0000000000001000 <main>:\n".into(),
                ..ExecOutput::default()
            })
        }
    }

    fn recording(code: i32) -> Arc<Recording> {
        Arc::new(Recording {
            calls: Mutex::new(Vec::new()),
            code,
        })
    }

    #[test]
    fn argument_shape() {
        let args = ObjdumpDisassembler::arguments(Path::new("/w/output"), true, true);
        assert_eq!(
            args,
            vec!["-d", "/w/output", "-l", "--insn-width=16", "-M", "intel", "-C"]
        );
        let args = ObjdumpDisassembler::arguments(Path::new("/w/output"), false, false);
        assert_eq!(args, vec!["-d", "/w/output", "-l", "--insn-width=16"]);
    }

    #[tokio::test]
    async fn disassembles_small_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("output");
        std::fs::write(&bin, b"\x7fELF").unwrap();
        let exec = recording(0);
        let d = ObjdumpDisassembler::new("objdump", exec.clone());
        let asm = d.disassemble(&bin, 1024, false, true).await.unwrap();
        assert!(asm.contains("<main>"));
        assert_eq!(exec.calls.lock()[0].last().unwrap(), "-C");
    }

    #[tokio::test]
    async fn oversized_binary_is_not_disassembled() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("output");
        std::fs::write(&bin, vec![0u8; 64]).unwrap();
        let exec = recording(0);
        let d = ObjdumpDisassembler::new("objdump", exec.clone());
        let asm = d.disassemble(&bin, 16, false, false).await.unwrap();
        assert_eq!(asm, TOO_MUCH_DATA);
        assert!(exec.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn objdump_failure_is_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("output");
        std::fs::write(&bin, b"junk").unwrap();
        let d = ObjdumpDisassembler::new("objdump", recording(1));
        let asm = d.disassemble(&bin, 1024, false, false).await.unwrap();
        assert_eq!(asm, "<No output: objdump returned 1>");
    }
}
