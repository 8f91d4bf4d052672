//! Shared fakes for engine integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_engine::{
    CacheGateway, Collaborators, CompileEngine, EngineSettings, ExecError, ExecOptions,
    ExecOutput, ExecutionQueue, NoLibraries, NoTools, ObjdumpDisassembler, ProcessExecutor,
    Toolchain, ToolRunner,
};
use parking_lot::Mutex;

/// One recorded process invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub exe: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl Call {
    /// The path following `-o`, if any.
    pub fn output(&self) -> Option<PathBuf> {
        let pos = self.args.iter().position(|a| a == "-o")?;
        self.args.get(pos + 1).map(PathBuf::from)
    }

    /// The argument ending in `suffix`, if any.
    pub fn arg_ending(&self, suffix: &str) -> Option<&str> {
        self.args.iter().map(String::as_str).find(|a| a.ends_with(suffix))
    }
}

type Script = dyn Fn(&Call) -> Result<ExecOutput, ExecError> + Send + Sync;

/// A [`ProcessExecutor`] that answers from a script and records every call.
pub struct ScriptedExecutor {
    script: Box<Script>,
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&Call) -> Result<ExecOutput, ExecError> + Send + Sync + 'static,
    {
        Self::with_delay(Duration::ZERO, script)
    }

    pub fn with_delay<F>(delay: Duration, script: F) -> Arc<Self>
    where
        F: Fn(&Call) -> Result<ExecOutput, ExecError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, exe: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.exe == exe).collect()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessExecutor for ScriptedExecutor {
    async fn exec(
        &self,
        exe: &str,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, ExecError> {
        let call = Call {
            exe: exe.to_string(),
            args: args.to_vec(),
            cwd: opts.cwd.clone(),
            stdin: opts.stdin.clone(),
        };
        self.calls.lock().push(call.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.script)(&call);
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn output(code: i32, stdout: &str, stderr: &str) -> Result<ExecOutput, ExecError> {
    Ok(ExecOutput {
        code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        ..ExecOutput::default()
    })
}

pub fn spawn_failure(exe: &str) -> Result<ExecOutput, ExecError> {
    Err(ExecError::Spawn {
        exe: exe.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
    })
}

/// A compiler that writes `-o` output when asked.
pub fn writes_output(call: &Call, contents: &[u8]) {
    if let Some(out) = call.output() {
        std::fs::write(out, contents).unwrap();
    }
}

/// Emits `-o <output>` as the only filter-derived flags.
pub fn with_output_flag(toolchain: Toolchain) -> Toolchain {
    toolchain.with_filter_flags(|_, output| vec!["-o".to_string(), output.to_string()])
}

pub struct Harness {
    pub engine: CompileEngine,
    pub exec: Arc<ScriptedExecutor>,
    pub temp_root: tempfile::TempDir,
}

impl Harness {
    pub fn new(toolchain: Toolchain, exec: Arc<ScriptedExecutor>) -> Self {
        Self::build(toolchain, exec, Arc::new(NoTools), ExecutionQueue::new(1), |_| {})
    }

    pub fn build(
        toolchain: Toolchain,
        exec: Arc<ScriptedExecutor>,
        tools: Arc<dyn ToolRunner>,
        queue: ExecutionQueue,
        tweak: impl FnOnce(&mut EngineSettings),
    ) -> Self {
        let temp_root = tempfile::tempdir().unwrap();
        let mut settings = EngineSettings {
            temp_root: Some(temp_root.path().to_path_buf()),
            ..EngineSettings::default()
        };
        tweak(&mut settings);
        let collaborators = Collaborators {
            executor: exec.clone(),
            libraries: Arc::new(NoLibraries),
            tools,
            disassembler: Arc::new(ObjdumpDisassembler::new("objdump", exec.clone())),
        };
        let engine = CompileEngine::new(
            toolchain,
            collaborators,
            queue,
            CacheGateway::memory(),
            settings,
        );
        Self {
            engine,
            exec,
            temp_root,
        }
    }

    /// Workspaces still present under the temp root.
    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.temp_root.path()).unwrap().count()
    }

    pub fn root(&self) -> &Path {
        self.temp_root.path()
    }
}
