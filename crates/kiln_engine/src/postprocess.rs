//! Turning raw compiler output into the final artifact text.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::disasm::Disassembler;
use crate::optinfo::{parse_opt_records, remarks_for_source, OptRemark};
use crate::process::{ExecOptions, ProcessExecutor};
use crate::request::Filters;
use crate::result::CompilationResult;
use crate::toolchain::Toolchain;

/// Renders compiler output.
///
/// Exactly one branch produces `asm`, tried in order:
///
/// 1. binary filter and a disassembling toolchain: disassemble the output file
/// 2. a configured post-process pipeline: pipe the output file through it
/// 3. otherwise: frame the raw stdout, stderr and exit code as text, and
///    report exit code 0
///
/// Optimization records are parsed alongside, independent of the branch.
pub struct PostProcessor {
    toolchain: Arc<Toolchain>,
    executor: Arc<dyn ProcessExecutor>,
    disassembler: Arc<dyn Disassembler>,
    max_asm_size: u64,
    max_output: Option<usize>,
}

struct Rendered {
    asm: String,
    code: Option<i32>,
}

impl Rendered {
    fn asm(asm: String) -> Self {
        Self { asm, code: None }
    }
}

impl PostProcessor {
    /// Creates a post-processor. `max_asm_size` bounds both disassembly and
    /// the post-process pipeline.
    pub fn new(
        toolchain: Arc<Toolchain>,
        executor: Arc<dyn ProcessExecutor>,
        disassembler: Arc<dyn Disassembler>,
        max_asm_size: u64,
    ) -> Self {
        Self {
            toolchain,
            executor,
            disassembler,
            max_asm_size,
            max_output: None,
        }
    }

    /// Bounds captured pipeline stderr.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = Some(max_output);
        self
    }

    /// Fills in `asm` and `opt_output` for a finished compilation.
    pub async fn process(
        &self,
        mut result: CompilationResult,
        output: &Path,
        filters: &Filters,
    ) -> CompilationResult {
        let (opt_output, rendered) = tokio::join!(
            self.opt_output(&result),
            self.render(&result, output, filters)
        );
        if opt_output.is_some() {
            result.opt_output = opt_output;
        }
        result.asm = rendered.asm;
        if let Some(code) = rendered.code {
            result.code = code;
        }
        result
    }

    async fn opt_output(&self, result: &CompilationResult) -> Option<Vec<OptRemark>> {
        if !result.has_opt_output {
            return None;
        }
        let path = result.opt_path.as_deref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(yaml) => Some(remarks_for_source(
                parse_opt_records(&yaml),
                &self.toolchain.compile_filename,
            )),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "optimization record unreadable");
                None
            }
        }
    }

    async fn render(&self, result: &CompilationResult, output: &Path, filters: &Filters) -> Rendered {
        let tc = &self.toolchain;
        if filters.binary && tc.supports_objdump {
            if !output.exists() {
                return Rendered::asm(missing_output(output));
            }
            let asm = self
                .disassembler
                .disassemble(output, self.max_asm_size, filters.intel, filters.demangle)
                .await
                .unwrap_or_else(|e| format!("<No output: {e}>"));
            return Rendered::asm(asm);
        }

        if !tc.post_process.is_empty() {
            return Rendered::asm(self.run_pipeline(output).await);
        }

        Rendered {
            asm: frame(&result.raw_stdout, &result.raw_stderr, result.code),
            code: Some(0),
        }
    }

    async fn run_pipeline(&self, output: &Path) -> String {
        let size = match tokio::fs::metadata(output).await {
            Ok(meta) => meta.len(),
            Err(_) => return missing_output(output),
        };
        if size >= self.max_asm_size {
            return format!(
                "<No output: generated assembly was too large ({size} > {} bytes)>",
                self.max_asm_size
            );
        }

        let command = pipeline_command(output, &self.toolchain.post_process);
        let opts = ExecOptions {
            cwd: output.parent().map(Path::to_path_buf),
            max_output: Some(usize::try_from(self.max_asm_size).unwrap_or(usize::MAX)),
            ..ExecOptions::default()
        };
        debug!(command = %command, "running post-process pipeline");
        match self
            .executor
            .exec("sh", &["-c".to_string(), command], &opts)
            .await
        {
            Ok(out) if out.code == 0 => out.stdout,
            Ok(out) => {
                let mut stderr = out.stderr;
                if let Some(limit) = self.max_output {
                    stderr.truncate(floor_char_boundary(&stderr, limit));
                }
                if stderr.is_empty() {
                    format!("<Error during post processing: {}>", out.code)
                } else {
                    format!("<Error during post processing: {}>\n{stderr}", out.code)
                }
            }
            Err(e) => format!("<Error during post processing: {e}>"),
        }
    }
}

/// The shell command piping `output` through `commands`.
pub fn pipeline_command(output: &Path, commands: &[String]) -> String {
    let mut command = format!("cat \"{}\"", output.display());
    for step in commands {
        command.push_str(" | ");
        command.push_str(step);
    }
    command
}

/// The text-framing fallback.
pub fn frame(stdout: &str, stderr: &str, code: i32) -> String {
    format!("<stdout>\n{stdout}\n<stderr>\n{stderr}\n<exit code: {code}>\n")
}

fn missing_output(output: &Path) -> String {
    format!("<No output file {}>", output.display())
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
