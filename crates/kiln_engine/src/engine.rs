//! The compilation engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kiln_cache::CacheKey;
use kiln_common::InternalError;
use kiln_config::{resolve_toolchain, Config, EngineConfig};
use serde::Serialize;
use tracing::{debug, info};

use crate::args::ArgumentBuilder;
use crate::disasm::{Disassembler, ObjdumpDisassembler};
use crate::error::{CompileError, ExecError, SetupError};
use crate::gateway::CacheGateway;
use crate::library::{ConfiguredLibraries, LibraryResolver, NoLibraries};
use crate::postprocess::PostProcessor;
use crate::process::{ExecOptions, ProcessExecutor, TokioProcessExecutor};
use crate::queue::ExecutionQueue;
use crate::request::{
    BackendOptions, CompileRequest, Filters, LibrarySpec, ResolvedExecution, SourceFile,
    ToolInvocationSpec,
};
use crate::result::{CompilationResult, ExecutionResult};
use crate::toolchain::Toolchain;
use crate::tools::{CompilationInfo, ConfiguredTools, NoTools, ToolRunner};
use crate::workspace::{validate_filename, WorkspaceManager};

/// Message of the execution result for toolchains that cannot run programs.
pub const EXECUTION_UNSUPPORTED: &str = "Compiler does not support execution";

/// The external services an engine calls into.
#[derive(Clone)]
pub struct Collaborators {
    /// Runs the compiler, tools, pipelines and built programs.
    pub executor: Arc<dyn ProcessExecutor>,
    /// Resolves library flags.
    pub libraries: Arc<dyn LibraryResolver>,
    /// Runs independent tools.
    pub tools: Arc<dyn ToolRunner>,
    /// Disassembles binary output.
    pub disassembler: Arc<dyn Disassembler>,
}

impl Collaborators {
    /// Collaborators running everything through `executor`, with no
    /// libraries, no tools and `objdump` for disassembly.
    pub fn with_executor(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            disassembler: Arc::new(ObjdumpDisassembler::new("objdump", executor.clone())),
            executor,
            libraries: Arc::new(NoLibraries),
            tools: Arc::new(NoTools),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::with_executor(Arc::new(TokioProcessExecutor))
    }
}

/// Engine limits and policies.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on disassembly and post-processing input, in bytes.
    pub max_asm_size: u64,
    /// Per-stream capture bound for processes, in bytes.
    pub max_output: usize,
    /// Parent directory for workspaces.
    pub temp_root: Option<PathBuf>,
    /// Keep workspaces on disk after release.
    pub delay_cleanup: bool,
    /// Compiler and tool timeout.
    pub compile_timeout: Option<Duration>,
    /// Built program timeout.
    pub execution_timeout: Option<Duration>,
    /// Release the workspace before `compile` returns. When off, callers
    /// release it with [`CompileEngine::cleanup`].
    pub cleanup_after_compile: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_asm_size: config.max_asm_size,
            max_output: config.max_output,
            temp_root: config.temp_root.clone(),
            delay_cleanup: config.delay_cleanup,
            compile_timeout: config.compile_timeout_ms.map(Duration::from_millis),
            execution_timeout: config.execution_timeout_ms.map(Duration::from_millis),
            cleanup_after_compile: true,
        }
    }
}

/// What a build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    /// The rendered compilation result.
    Compile,
    /// A runnable program.
    Executable,
}

/// Everything that determines a compilation's output.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    toolchain: &'a str,
    exe: &'a str,
    default_options: &'a str,
    source: &'a str,
    options: &'a [String],
    backend_options: BackendOptions,
    filters: &'a Filters,
    tools: &'a [ToolInvocationSpec],
    libraries: &'a [LibrarySpec],
    files: &'a [SourceFile],
}

/// Compiles requests with one toolchain.
///
/// Engines for different toolchains may share one [`ExecutionQueue`] and one
/// [`CacheGateway`]; both are handles.
pub struct CompileEngine {
    toolchain: Arc<Toolchain>,
    collaborators: Collaborators,
    queue: ExecutionQueue,
    cache: CacheGateway,
    workspaces: WorkspaceManager,
    post: PostProcessor,
    settings: EngineSettings,
}

impl CompileEngine {
    /// Creates an engine.
    pub fn new(
        toolchain: Toolchain,
        collaborators: Collaborators,
        queue: ExecutionQueue,
        cache: CacheGateway,
        settings: EngineSettings,
    ) -> Self {
        let toolchain = Arc::new(toolchain);
        let post = PostProcessor::new(
            toolchain.clone(),
            collaborators.executor.clone(),
            collaborators.disassembler.clone(),
            settings.max_asm_size,
        )
        .with_max_output(settings.max_output);
        Self {
            workspaces: WorkspaceManager::new(settings.temp_root.clone(), settings.delay_cleanup),
            toolchain,
            collaborators,
            queue,
            cache,
            post,
            settings,
        }
    }

    /// Wires an engine for toolchain `id` from configuration, with the
    /// process-backed collaborators.
    pub fn from_config(
        config: &Config,
        id: &str,
        queue: ExecutionQueue,
        cache: CacheGateway,
    ) -> Result<Self, SetupError> {
        let resolved = resolve_toolchain(config, id)?;
        let toolchain = Toolchain::from_resolved(&resolved)?;
        let settings = EngineSettings::from(&config.engine);
        let executor: Arc<dyn ProcessExecutor> = Arc::new(TokioProcessExecutor);
        let max_asm_output = usize::try_from(settings.max_asm_size).unwrap_or(usize::MAX);
        let collaborators = Collaborators {
            libraries: Arc::new(ConfiguredLibraries::new(
                config.libraries.clone(),
                toolchain.library_flags.clone(),
            )),
            tools: Arc::new(
                ConfiguredTools::new(config.tools.clone(), executor.clone())
                    .with_limits(Some(settings.max_output), settings.compile_timeout),
            ),
            disassembler: Arc::new(
                ObjdumpDisassembler::new(&toolchain.objdump, executor.clone())
                    .with_max_output(max_asm_output),
            ),
            executor,
        };
        info!(toolchain = %id, exe = %toolchain.exe, "engine configured");
        Ok(Self::new(toolchain, collaborators, queue, cache, settings))
    }

    /// The toolchain this engine compiles with.
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// The admission queue.
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// The result cache.
    pub fn cache(&self) -> &CacheGateway {
        &self.cache
    }

    /// Compiles `request`.
    ///
    /// Only pre-flight rejections ([`CompileError::Options`],
    /// [`CompileError::Source`]), a closed queue and internal errors are
    /// returned as `Err`. Compiler and tool failures are reported inside the
    /// result.
    pub async fn compile(
        &self,
        request: CompileRequest,
    ) -> Result<CompilationResult, CompileError> {
        self.validate(&request)?;
        let request = self.prepare(request);
        let key = self.key_of(&request)?;
        let execute = request.filters.execute;
        debug!(key = %key, toolchain = %self.toolchain.id, "compile requested");

        if request.backend_options.executor_request {
            let mut exec = self.handle_execution(&key, &request).await?;
            if let Some(build) = exec.build_result.as_deref_mut() {
                self.workspaces.cleanup(build).await;
            }
            return Ok(CompilationResult::from_execution(exec));
        }

        if !request.bypass_cache {
            if let Some(mut hit) = self.cache.get(&key).await {
                if execute && hit.exec_result.is_none() {
                    let mut exec = self.handle_execution(&key, &request).await?;
                    if let Some(build) = exec.build_result.as_deref_mut() {
                        self.workspaces.cleanup(build).await;
                    }
                    hit.exec_result = Some(exec);
                }
                return Ok(hit);
            }
        }

        let mut filters = request.filters.build_view();
        if !request.files.is_empty() {
            filters.dont_mask_filenames = true;
        }
        let mut result = self
            .queue
            .enqueue(|| self.build(&key, &request, &filters, BuildMode::Compile))
            .await?;

        if result.ok_to_cache {
            self.cache.put(&key, &result).await;
        }
        if execute {
            match self.handle_execution(&key, &request).await {
                Ok(exec) => result.exec_result = Some(exec),
                Err(e) => {
                    self.workspaces.cleanup(&mut result).await;
                    return Err(e);
                }
            }
        }
        if self.settings.cleanup_after_compile {
            self.workspaces.cleanup(&mut result).await;
        }
        Ok(result)
    }

    /// The cache key `compile` would use for `request`, after library
    /// autodetection and binary downgrade.
    pub fn compute_key(&self, request: &CompileRequest) -> Result<CacheKey, CompileError> {
        self.key_of(&self.prepare(request.clone()))
    }

    /// Releases the workspaces referenced by `result`. Idempotent.
    pub async fn cleanup(&self, result: &mut CompilationResult) {
        self.workspaces.cleanup(result).await;
    }

    fn validate(&self, request: &CompileRequest) -> Result<(), CompileError> {
        let tc = &self.toolchain;
        (tc.check_options)(&request.options).map_err(CompileError::Options)?;
        (tc.check_source)(&request.source).map_err(CompileError::Source)?;
        if let Some(sub) = request.sub_source() {
            (tc.check_source)(sub).map_err(CompileError::Source)?;
        }
        for file in &request.files {
            validate_filename(&file.filename).map_err(CompileError::Source)?;
            (tc.check_source)(&file.contents).map_err(CompileError::Source)?;
        }
        Ok(())
    }

    fn prepare(&self, mut request: CompileRequest) -> CompileRequest {
        if self.collaborators.libraries.autodetect(
            &request.source,
            &mut request.libraries,
            &mut request.options,
        ) {
            debug!(libraries = request.libraries.len(), "libraries autodetected");
        }
        request.filters = self.toolchain.downgrade(&request.filters);
        request
    }

    fn key_of(&self, request: &CompileRequest) -> Result<CacheKey, CompileError> {
        let tc = &self.toolchain;
        let material = KeyMaterial {
            toolchain: &tc.id,
            exe: &tc.exe,
            default_options: &tc.options,
            source: &request.source,
            options: &request.options,
            backend_options: BackendOptions {
                executor_request: false,
                ..request.backend_options.clone()
            },
            filters: &request.filters,
            tools: &request.tools,
            libraries: &request.libraries,
            files: &request.files,
        };
        CacheKey::of(&material).map_err(|e| InternalError::new(e.to_string()).into())
    }

    async fn build(
        &self,
        key: &CacheKey,
        request: &CompileRequest,
        filters: &Filters,
        mode: BuildMode,
    ) -> CompilationResult {
        let tc = &self.toolchain;
        let source = tc.pre_process(&request.source, filters);
        let sub_source = request.sub_source().map(|s| tc.pre_process(s, filters));

        let dir = match self.workspaces.new_workspace().await {
            Ok(dir) => dir,
            Err(e) => return CompilationResult::failure(e.to_string()),
        };
        let input = match self
            .workspaces
            .materialize(&dir, &tc.compile_filename, &source, sub_source.as_deref(), &request.files)
            .await
        {
            Ok(input) => input,
            Err(e) => {
                let mut failed = CompilationResult::failure(e.to_string());
                failed.dir_path = Some(dir);
                return failed;
            }
        };
        let output = match mode {
            BuildMode::Compile => tc.output_filename(&dir),
            BuildMode::Executable => tc.executable_filename(&dir),
        };

        let downloads = if filters.binary {
            self.collaborators
                .libraries
                .prepare_build_environment(key, &dir, &request.libraries)
                .await
        } else {
            Vec::new()
        };

        let args = ArgumentBuilder::new(tc, self.collaborators.libraries.as_ref()).build(
            &request.options,
            filters,
            &request.backend_options,
            &input,
            &output,
            &request.libraries,
        );
        let info = CompilationInfo {
            key: *key,
            source,
            input_filename: input.clone(),
            dir_path: dir.clone(),
            output_filename: output.clone(),
            options: request.options.clone(),
        };
        let tool_specs: &[ToolInvocationSpec] = match mode {
            BuildMode::Compile => &request.tools,
            BuildMode::Executable => &[],
        };

        let (compiled, tools) = tokio::join!(
            self.run_compiler(&args, &dir, &input, filters, &request.libraries),
            self.collaborators.tools.run_independent(tool_specs, &info)
        );

        let spawned = compiled.is_ok();
        let mut result = compiled.unwrap_or_else(|e| CompilationResult::failure(e.to_string()));
        result.tools = tools;
        result.dir_path = Some(dir);
        result.compilation_options = args;
        result.downloads = downloads;

        let opt_path = Toolchain::opt_output_filename(&output);
        if tokio::fs::try_exists(&opt_path).await.unwrap_or(false) {
            result.has_opt_output = true;
            result.opt_path = Some(opt_path);
        }
        result.asm_size = tokio::fs::metadata(&output).await.ok().map(|m| m.len());

        if spawned && mode == BuildMode::Compile {
            result = self.post.process(result, &output, filters).await;
        }
        debug!(key = %key, code = result.code, ?mode, "build finished");
        result
    }

    async fn run_compiler(
        &self,
        args: &[String],
        dir: &Path,
        input: &Path,
        filters: &Filters,
        libs: &[LibrarySpec],
    ) -> Result<CompilationResult, ExecError> {
        let opts = ExecOptions {
            cwd: Some(dir.to_path_buf()),
            ld_path: self.collaborators.libraries.runtime_paths(libs),
            timeout: self.settings.compile_timeout,
            max_output: Some(self.settings.max_output),
            ..ExecOptions::default()
        };
        let out = self
            .collaborators
            .executor
            .exec(&self.toolchain.exe, args, &opts)
            .await?;

        let input = input.display().to_string();
        let mask = |text: &str| {
            if filters.dont_mask_filenames {
                text.to_string()
            } else {
                text.replace(&input, "<source>")
            }
        };
        Ok(CompilationResult {
            code: out.code,
            timed_out: out.timed_out,
            ok_to_cache: !out.timed_out,
            stdout: mask(&out.stdout),
            stderr: mask(&out.stderr),
            raw_stdout: out.stdout,
            raw_stderr: out.stderr,
            exec_time: Some(out.exec_time),
            ..CompilationResult::default()
        })
    }

    /// Runs the program built for `key`, building it first if no executable
    /// is cached. Build and run are admitted by the queue separately.
    async fn handle_execution(
        &self,
        key: &CacheKey,
        request: &CompileRequest,
    ) -> Result<ExecutionResult, CompileError> {
        if !self.toolchain.supports_execute {
            return Ok(ExecutionResult::not_executed(EXECUTION_UNSUPPORTED));
        }
        let params = request.execution_parameters.resolve();

        if let Some(bytes) = self.cache.get_executable(key).await {
            debug!(key = %key, "running cached executable");
            let dir = match self.workspaces.new_workspace().await {
                Ok(dir) => dir,
                Err(e) => return Ok(ExecutionResult::not_executed(e.to_string())),
            };
            let exe = self.toolchain.executable_filename(&dir);
            let result = match write_executable(&exe, &bytes).await {
                Ok(()) => self
                    .queue
                    .enqueue(|| self.run_executable(&exe, &dir, &params, &request.libraries))
                    .await
                    .map_err(CompileError::from),
                Err(e) => Ok(ExecutionResult::not_executed(e.to_string())),
            };
            self.workspaces.release(dir).await;
            return result;
        }

        let mut filters = request.filters.build_view();
        filters.binary = true;
        let mut build = self
            .queue
            .enqueue(|| self.build(key, request, &filters, BuildMode::Executable))
            .await?;

        let exe = match &build.dir_path {
            Some(dir) if build.code == 0 => self.toolchain.executable_filename(dir),
            _ => return Ok(build_failed(build)),
        };
        match tokio::fs::read(&exe).await {
            Ok(bytes) => self.cache.put_executable(key, bytes).await,
            Err(e) => {
                debug!(exe = %exe.display(), error = %e, "no executable after build");
                return Ok(build_failed(build));
            }
        }

        let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        let run = self
            .queue
            .enqueue(|| self.run_executable(&exe, &dir, &params, &request.libraries))
            .await;
        let mut result = match run {
            Ok(result) => result,
            Err(e) => {
                self.workspaces.cleanup(&mut build).await;
                return Err(e.into());
            }
        };
        result.build_result = Some(Box::new(build));
        Ok(result)
    }

    async fn run_executable(
        &self,
        exe: &Path,
        dir: &Path,
        params: &ResolvedExecution,
        libs: &[LibrarySpec],
    ) -> ExecutionResult {
        let opts = ExecOptions {
            cwd: Some(dir.to_path_buf()),
            ld_path: self.collaborators.libraries.runtime_paths(libs),
            stdin: Some(params.stdin.clone()),
            timeout: self.settings.execution_timeout,
            max_output: Some(self.settings.max_output),
            ..ExecOptions::default()
        };
        let exe = exe.display().to_string();
        match self.collaborators.executor.exec(&exe, &params.args, &opts).await {
            Ok(out) => ExecutionResult {
                code: out.code,
                stdout: out.stdout,
                stderr: out.stderr,
                did_execute: true,
                timed_out: out.timed_out,
                build_result: None,
                exec_time: Some(out.exec_time),
            },
            Err(e) => ExecutionResult::not_executed(e.to_string()),
        }
    }
}

fn build_failed(build: CompilationResult) -> ExecutionResult {
    ExecutionResult {
        build_result: Some(Box::new(build)),
        ..ExecutionResult::not_executed("Build failed")
    }
}

async fn write_executable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(toolchain: Toolchain) -> CompileEngine {
        CompileEngine::new(
            toolchain,
            Collaborators::default(),
            ExecutionQueue::new(1),
            CacheGateway::memory(),
            EngineSettings::default(),
        )
    }

    #[test]
    fn identical_requests_share_a_key() {
        let e = engine(Toolchain::new("tv", "/opt/tv"));
        let a = CompileRequest::new("func");
        let b = CompileRequest::new("func");
        assert_eq!(e.compute_key(&a).unwrap(), e.compute_key(&b).unwrap());
    }

    #[test]
    fn every_field_changes_the_key() {
        let e = engine(Toolchain::new("tv", "/opt/tv"));
        let base = CompileRequest::new("func");
        let k = e.compute_key(&base).unwrap();

        let mut r = base.clone();
        r.options = vec!["-O1".into()];
        assert_ne!(e.compute_key(&r).unwrap(), k);

        let mut r = base.clone();
        r.backend_options.sub_source = Some("tgt".into());
        assert_ne!(e.compute_key(&r).unwrap(), k);

        let mut r = base.clone();
        r.filters.intel = true;
        assert_ne!(e.compute_key(&r).unwrap(), k);

        let mut r = base.clone();
        r.filters.labels = true;
        assert_ne!(e.compute_key(&r).unwrap(), k);

        let mut r = base.clone();
        r.libraries = vec![LibrarySpec::new("fmt", "10")];
        assert_ne!(e.compute_key(&r).unwrap(), k);

        let mut r = base.clone();
        r.files = vec![SourceFile {
            filename: "a.h".into(),
            contents: String::new(),
        }];
        assert_ne!(e.compute_key(&r).unwrap(), k);

        let mut r = base.clone();
        r.tools = vec![ToolInvocationSpec {
            id: "lint".into(),
            args: Vec::new(),
            stdin: None,
        }];
        assert_ne!(e.compute_key(&r).unwrap(), k);
    }

    #[test]
    fn option_order_matters() {
        let e = engine(Toolchain::new("tv", "/opt/tv"));
        let mut a = CompileRequest::new("func");
        a.options = vec!["-a".into(), "-b".into()];
        let mut b = a.clone();
        b.options.reverse();
        assert_ne!(e.compute_key(&a).unwrap(), e.compute_key(&b).unwrap());
    }

    #[test]
    fn downgraded_binary_shares_key_with_plain_request() {
        let e = engine(Toolchain::new("tv", "/opt/tv"));
        let plain = CompileRequest::new("func");
        let mut binary = plain.clone();
        binary.filters.binary = true;
        assert_eq!(e.compute_key(&plain).unwrap(), e.compute_key(&binary).unwrap());
    }

    #[test]
    fn replay_and_execution_parameters_do_not_change_the_key() {
        let e = engine(Toolchain::new("cc", "/cc").with_execute());
        let base = CompileRequest::new("int main() {}");
        let mut replay = base.clone();
        replay.backend_options.executor_request = true;
        replay.execution_parameters.stdin = Some("42".into());
        assert_eq!(e.compute_key(&base).unwrap(), e.compute_key(&replay).unwrap());
    }

    #[test]
    fn different_toolchains_have_different_keys() {
        let a = engine(Toolchain::new("a", "/opt/a"));
        let b = engine(Toolchain::new("b", "/opt/b"));
        let r = CompileRequest::new("func");
        assert_ne!(a.compute_key(&r).unwrap(), b.compute_key(&r).unwrap());
    }

    #[test]
    fn settings_from_config() {
        let config = EngineConfig {
            compile_timeout_ms: Some(1500),
            delay_cleanup: true,
            ..EngineConfig::default()
        };
        let s = EngineSettings::from(&config);
        assert_eq!(s.compile_timeout, Some(Duration::from_millis(1500)));
        assert!(s.delay_cleanup);
        assert!(s.cleanup_after_compile);
        assert!(s.execution_timeout.is_none());
    }

    #[test]
    fn from_config_rejects_unknown_toolchain() {
        let config = kiln_config::load_config_from_str("").unwrap();
        let err = CompileEngine::from_config(
            &config,
            "missing",
            ExecutionQueue::new(1),
            CacheGateway::memory(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SetupError::Config(_)));
    }
}
