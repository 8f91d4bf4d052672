//! Independent tool fan-out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_cache::CacheKey;
use kiln_config::{ToolConfig, ToolKind};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::process::{ExecOptions, ProcessExecutor};
use crate::request::ToolInvocationSpec;
use crate::result::ToolResult;

/// What a tool gets to know about the compilation it accompanies.
#[derive(Debug, Clone)]
pub struct CompilationInfo {
    /// Cache key of the compilation.
    pub key: CacheKey,
    /// The source as written to disk.
    pub source: String,
    /// Primary input path.
    pub input_filename: PathBuf,
    /// Workspace directory.
    pub dir_path: PathBuf,
    /// Compiler output path.
    pub output_filename: PathBuf,
    /// User options.
    pub options: Vec<String>,
}

/// Runs the tools that do not depend on the compiler's output.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs every independent tool in `specs` and returns one result per
    /// independent tool, in `specs` order.
    ///
    /// A failing tool yields a failed [`ToolResult`]; it never aborts the
    /// compilation.
    async fn run_independent(
        &self,
        specs: &[ToolInvocationSpec],
        info: &CompilationInfo,
    ) -> Vec<ToolResult>;
}

/// A runner with no tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolRunner for NoTools {
    async fn run_independent(
        &self,
        specs: &[ToolInvocationSpec],
        _info: &CompilationInfo,
    ) -> Vec<ToolResult> {
        specs
            .iter()
            .map(|s| ToolResult::failed(&s.id, format!("unknown tool '{}'", s.id)))
            .collect()
    }
}

/// Runner over the `[tools]` table.
pub struct ConfiguredTools {
    tools: BTreeMap<String, ToolConfig>,
    executor: Arc<dyn ProcessExecutor>,
    max_output: Option<usize>,
    timeout: Option<Duration>,
}

impl ConfiguredTools {
    /// Creates a runner executing tools with `executor`.
    pub fn new(tools: BTreeMap<String, ToolConfig>, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            tools,
            executor,
            max_output: None,
            timeout: None,
        }
    }

    /// Bounds each tool's captured output and run time.
    pub fn with_limits(mut self, max_output: Option<usize>, timeout: Option<Duration>) -> Self {
        self.max_output = max_output;
        self.timeout = timeout;
        self
    }

    fn start(
        &self,
        spec: &ToolInvocationSpec,
        tool: &ToolConfig,
        info: &CompilationInfo,
    ) -> JoinHandle<ToolResult> {
        let mut args: Vec<String> = tool.args.iter().map(|a| substitute(a, info)).collect();
        args.extend(spec.args.iter().cloned());
        let opts = ExecOptions {
            cwd: Some(info.dir_path.clone()),
            stdin: spec.stdin.clone(),
            timeout: self.timeout,
            max_output: self.max_output,
            ..ExecOptions::default()
        };
        let executor = self.executor.clone();
        let exe = tool.exe.clone();
        let id = spec.id.clone();

        debug!(tool = %id, key = %info.key, "running tool");
        tokio::spawn(async move {
            match executor.exec(&exe, &args, &opts).await {
                Ok(out) => ToolResult {
                    id,
                    code: out.code,
                    stdout: out.stdout,
                    stderr: out.stderr,
                },
                Err(e) => ToolResult::failed(&id, e.to_string()),
            }
        })
    }
}

/// A tool slot: already settled, or still running.
enum Pending {
    Done(ToolResult),
    Running(String, JoinHandle<ToolResult>),
}

#[async_trait]
impl ToolRunner for ConfiguredTools {
    async fn run_independent(
        &self,
        specs: &[ToolInvocationSpec],
        info: &CompilationInfo,
    ) -> Vec<ToolResult> {
        // All tools start before the first is awaited.
        let pending: Vec<Pending> = specs
            .iter()
            .filter_map(|spec| match self.tools.get(&spec.id) {
                Some(tool) if tool.kind == ToolKind::Independent => Some(Pending::Running(
                    spec.id.clone(),
                    self.start(spec, tool, info),
                )),
                Some(_) => None,
                None => Some(Pending::Done(ToolResult::failed(
                    &spec.id,
                    format!("unknown tool '{}'", spec.id),
                ))),
            })
            .collect();

        let mut results = Vec::with_capacity(pending.len());
        for slot in pending {
            results.push(match slot {
                Pending::Done(result) => result,
                Pending::Running(id, handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(tool = %id, error = %e, "tool task failed");
                        ToolResult::failed(&id, e.to_string())
                    }
                },
            });
        }
        results
    }
}

fn substitute(template: &str, info: &CompilationInfo) -> String {
    template
        .replace("{input}", &info.input_filename.display().to_string())
        .replace("{output}", &info.output_filename.display().to_string())
        .replace("{dir}", &info.dir_path.display().to_string())
}
