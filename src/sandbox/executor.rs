// ABOUTME: SandboxedExecutor - runs agent-supplied code in a separate, isolated
// ABOUTME: interpreter process with a scratch directory, timeout, and output/memory caps.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::SandboxPolicy;
use crate::error::SandboxError;

/// Marks the line carrying the value of the final expression.
const RETURN_MARKER: &str = "\u{1e}canopy-return:";

/// Prefixes the stderr line the driver writes when it refuses to run code.
const VIOLATION_MARKER: &str = "\u{1e}canopy-violation:";

/// Checks the parsed tree against the policy, then runs it with guarded
/// builtins so the last bare expression is reported back.
///
/// argv: source, return marker, violation marker, authorized imports,
/// withheld builtins, dunder flag.
const PYTHON_DRIVER: &str = r#"import ast, builtins, sys
with open(sys.argv[1], encoding="utf-8") as f:
    src = f.read()
marker, refusal = sys.argv[2], sys.argv[3]
allowed = [m for m in sys.argv[4].split(",") if m]
withheld = set(n for n in sys.argv[5].split(",") if n)
no_dunders = sys.argv[6] == "1"
plain_dunders = ("__name__", "__main__", "__init__")

class Violation(Exception):
    pass

def authorized(name):
    if "*" in allowed:
        return True
    parts = name.split(".")
    for n in range(1, len(parts) + 1):
        prefix = ".".join(parts[:n])
        if prefix in allowed or prefix + ".*" in allowed:
            return True
    return False

def refuse(message):
    sys.stdout.flush()
    sys.stderr.write(refusal + message + "\n")
    sys.exit(3)

def inspect(tree):
    for node in ast.walk(tree):
        if isinstance(node, ast.Import):
            for alias in node.names:
                if not authorized(alias.name):
                    raise Violation("Import of %s is not allowed" % alias.name)
        elif isinstance(node, ast.ImportFrom):
            module = "." * node.level + (node.module or "")
            if node.level or not authorized(module):
                raise Violation("Import from %s is not allowed" % module)
        elif no_dunders and isinstance(node, ast.Attribute) and node.attr.startswith("__") and node.attr.endswith("__"):
            raise Violation("Access to dunder attributes is not allowed")
        elif no_dunders and isinstance(node, ast.Name) and node.id.startswith("__") and node.id.endswith("__") and node.id not in plain_dunders:
            raise Violation("Access to dunder names is not allowed")

real_import = builtins.__import__

def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level or not authorized(name):
        raise Violation("Import of %s is not allowed" % name)
    return real_import(name, globals, locals, fromlist, level)

safe = {k: v for k, v in vars(builtins).items() if k not in withheld}
safe["__import__"] = guarded_import

try:
    tree = ast.parse(src, "<agent>", "exec")
    inspect(tree)
    last = None
    if tree.body and isinstance(tree.body[-1], ast.Expr):
        last = ast.Expression(tree.body.pop().value)
    ns = {"__name__": "__main__", "__builtins__": safe}
    exec(compile(tree, "<agent>", "exec"), ns)
    if last is not None:
        value = eval(compile(last, "<agent>", "eval"), ns)
        if value is not None:
            sys.stdout.flush()
            sys.stdout.write("\n" + marker + repr(value) + "\n")
except Violation as e:
    refuse(str(e))
"#;

/// Which guest language the executor runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interpreter {
    /// A Python 3 interpreter started in isolated mode.
    Python { program: String },
    /// POSIX `sh -c`.
    Shell,
}

impl Interpreter {
    /// Python using `python3` from PATH.
    pub fn python() -> Self {
        Interpreter::Python {
            program: "python3".to_string(),
        }
    }
}

/// Bounds on a single execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub max_memory_bytes: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 64 * 1024,
            max_memory_bytes: Some(512 * 1024 * 1024),
        }
    }
}

/// Captured result of a successful execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// `repr` of the final expression, when the code ended with one.
    pub return_value: Option<String>,
    /// Files the code left in its scratch directory, relative and sorted.
    pub files: Vec<String>,
}

/// Runs code under a policy in a throwaway scratch directory.
#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    interpreter: Interpreter,
    policy: SandboxPolicy,
}

impl SandboxedExecutor {
    /// Create an executor.
    pub fn new(interpreter: Interpreter, policy: SandboxPolicy) -> Self {
        Self {
            interpreter,
            policy,
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Check, then run `code` within `limits`. Any violation aborts with a typed
    /// error and no partial output.
    pub async fn execute(
        &self,
        code: &str,
        limits: &ExecutionLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, SandboxError> {
        self.policy.check(code)?;

        let root = tempfile::tempdir()?;
        let scratch = root.path().join("work");
        tokio::fs::create_dir(&scratch).await?;

        let mut cmd = match &self.interpreter {
            Interpreter::Python { program } => {
                let driver = root.path().join("driver.py");
                let source = root.path().join("source.py");
                tokio::fs::write(&driver, PYTHON_DRIVER).await?;
                tokio::fs::write(&source, code).await?;

                let imports = self
                    .policy
                    .authorized_imports()
                    .map(|m| m.join(","))
                    .unwrap_or_else(|| "*".to_string());
                let dunders = if self.policy.blocks_dunders() { "1" } else { "0" };

                let mut cmd = Command::new(program);
                cmd.arg("-I")
                    .arg("-X")
                    .arg("utf8")
                    .arg(&driver)
                    .arg(&source)
                    .arg(RETURN_MARKER)
                    .arg(VIOLATION_MARKER)
                    .arg(imports)
                    .arg(self.policy.blocked_builtins().join(","))
                    .arg(dunders);
                cmd
            }
            Interpreter::Shell => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(code);
                cmd
            }
        };

        cmd.current_dir(&scratch)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", &scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);
        limit_memory(&mut cmd, limits.max_memory_bytes);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Runtime("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Runtime("stderr not captured".into()))?;

        let max = limits.max_output_bytes;
        let total = AtomicUsize::new(0);
        let collect = async {
            let (out, err) = tokio::try_join!(
                read_capped(stdout, max, &total, "stdout"),
                read_capped(stderr, max, &total, "stderr")
            )?;
            let status = child.wait().await?;
            Ok::<_, SandboxError>((status, out, err))
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SandboxError::Cancelled),
            _ = tokio::time::sleep(limits.timeout) => Err(SandboxError::Timeout(limits.timeout)),
            result = collect => result,
        };

        kill_process_group(pid);
        let (status, out, err) = match outcome {
            Ok(done) => done,
            Err(e) => {
                let _ = child.kill().await;
                tracing::debug!(error = %e, "sandboxed execution aborted");
                return Err(e);
            }
        };

        let stdout = String::from_utf8_lossy(&out).into_owned();
        let stderr = String::from_utf8_lossy(&err).into_owned();

        if !status.success() {
            if let Some(message) = violation_message(&stderr) {
                return Err(SandboxError::Violation(message));
            }
            if stderr.contains("MemoryError") {
                return Err(SandboxError::ResourceExceeded("memory limit".into()));
            }
            let detail = if stderr.trim().is_empty() {
                format!("process exited with {}", status)
            } else {
                stderr.trim().to_string()
            };
            return Err(SandboxError::Runtime(detail));
        }

        let (stdout, return_value) = match self.interpreter {
            Interpreter::Python { .. } => split_return_value(stdout),
            Interpreter::Shell => (stdout, None),
        };

        Ok(ExecutionOutput {
            stdout,
            stderr,
            return_value,
            files: list_files(&scratch),
        })
    }
}

/// Reads one stream while charging every byte to the shared `total`.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max: usize,
    total: &AtomicUsize,
    stream: &str,
) -> Result<Vec<u8>, SandboxError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        if total.fetch_add(n, Ordering::Relaxed) + n > max {
            return Err(SandboxError::ResourceExceeded(format!(
                "{} pushed combined output past {} bytes",
                stream, max
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn violation_message(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(VIOLATION_MARKER))
        .map(|m| m.trim().to_string())
}

fn split_return_value(stdout: String) -> (String, Option<String>) {
    let needle = format!("\n{}", RETURN_MARKER);
    match stdout.rfind(&needle) {
        Some(pos) => {
            let value = stdout[pos + needle.len()..].trim_end_matches('\n').to_string();
            (stdout[..pos].to_string(), Some(value))
        }
        None => (stdout, None),
    }
}

fn list_files(scratch: &Path) -> Vec<String> {
    fn walk(dir: &Path, base: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path: PathBuf = entry.path();
            if path.is_dir() {
                walk(&path, base, out);
            } else if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.to_string_lossy().into_owned());
            }
        }
    }

    let mut files = Vec::new();
    walk(scratch, scratch, &mut files);
    files.sort();
    files
}

#[cfg(unix)]
fn limit_memory(cmd: &mut Command, max_bytes: Option<u64>) {
    use nix::sys::resource::{Resource, setrlimit};

    let Some(bytes) = max_bytes else {
        return;
    };
    // SAFETY: setrlimit is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(move || {
            setrlimit(
                Resource::RLIMIT_AS,
                bytes as nix::libc::rlim_t,
                bytes as nix::libc::rlim_t,
            )
            .map_err(std::io::Error::from)
        });
    }
}

/// Make the child lead a new process group so its descendants can be killed with it.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL everything left in the child's process group. A group that is
/// already empty is not an error.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            tracing::debug!(error = %e, pid, "failed to kill sandbox process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(not(unix))]
fn limit_memory(_cmd: &mut Command, max_bytes: Option<u64>) {
    if max_bytes.is_some() {
        tracing::warn!("memory limits are not enforced on this platform");
    }
}
