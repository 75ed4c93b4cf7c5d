//! Package script execution.
//!
//! Scripts run in a child process supervised by the parent: stdin carries
//! the script body, output comes back through a length-limited pipe, and a
//! per-script timeout kills runaways. The [`Sandbox`] trait separates the
//! invocation contract from privilege handling; the process backend can
//! drop to a configured unprivileged user, the direct backend runs with
//! the caller's privileges.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::config::Config;
use crate::error::{PkgError, Result};
use crate::events::EventBus;
use crate::types::{Package, ScriptKind, ScriptLanguage};

/// Exit status reported when a script exceeds its timeout.
pub const TIMEOUT_STATUS: i32 = 124;

/// Maximum bytes of script output relayed to events.
pub const OUTPUT_LIMIT: usize = 64 * 1024;

/// One concrete program invocation built from a script.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Interpreter to execute.
    pub program: PathBuf,
    /// Arguments to the interpreter.
    pub args: Vec<String>,
    /// Script text fed through stdin.
    pub stdin_body: String,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Wall-clock budget.
    pub timeout: Duration,
}

/// Captured result of a script run.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Process exit status; [`TIMEOUT_STATUS`] after a kill.
    pub status: i32,
    /// Combined output, truncated at [`OUTPUT_LIMIT`].
    pub output: String,
    /// Whether output was truncated.
    pub truncated: bool,
}

/// Executes invocations under some privilege regime.
pub trait Sandbox {
    /// Run one invocation to completion or timeout.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` when the interpreter cannot be spawned.
    fn run(&self, invocation: &Invocation) -> Result<ScriptOutput>;
}

/// Spawn, supervise, and reap one child process.
fn supervise(mut command: Command, invocation: &Invocation) -> Result<ScriptOutput> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &invocation.env {
        command.env(key, value);
    }
    let mut child = command.spawn()?;

    // Feed stdin and read output from helper threads so a script that
    // floods the pipe or never reads stdin cannot deadlock the
    // supervisor.
    let stdin_body = invocation.stdin_body.clone().into_bytes();
    let stdin = child.stdin.take();
    let stdin_writer = std::thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            let _ = stdin.write_all(&stdin_body);
        }
    });
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let read_limited = |stream: Option<Box<dyn Read + Send>>| {
        std::thread::spawn(move || -> (Vec<u8>, bool) {
            let Some(mut stream) = stream else {
                return (Vec::new(), false);
            };
            let mut buf = Vec::new();
            let mut truncated = false;
            let mut chunk = [0u8; 4096];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if buf.len() < OUTPUT_LIMIT {
                            let take = n.min(OUTPUT_LIMIT - buf.len());
                            buf.extend_from_slice(&chunk[..take]);
                            if take < n {
                                truncated = true;
                            }
                        } else {
                            truncated = true;
                        }
                    }
                }
            }
            (buf, truncated)
        })
    };
    let stdout_reader = read_limited(stdout.map(|s| Box::new(s) as Box<dyn Read + Send>));
    let stderr_reader = read_limited(stderr.map(|s| Box::new(s) as Box<dyn Read + Send>));

    let status = match child.wait_timeout(invocation.timeout)? {
        Some(status) => status.code().unwrap_or(-1),
        None => {
            tracing::warn!(timeout = ?invocation.timeout, "script timed out, killing");
            let _ = child.kill();
            let _ = child.wait();
            TIMEOUT_STATUS
        }
    };

    let _ = stdin_writer.join();
    let (mut out, out_truncated) = stdout_reader.join().unwrap_or_default();
    let (err, err_truncated) = stderr_reader.join().unwrap_or_default();
    if !err.is_empty() {
        if !out.is_empty() {
            out.push(b'\n');
        }
        out.extend_from_slice(&err);
    }
    Ok(ScriptOutput {
        status,
        output: String::from_utf8_lossy(&out).into_owned(),
        truncated: out_truncated || err_truncated,
    })
}

/// Child-process backend with optional privilege drop.
#[derive(Debug, Default)]
pub struct ProcessSandbox {
    /// Unprivileged user to run as, when set.
    pub user: Option<String>,
}

impl Sandbox for ProcessSandbox {
    fn run(&self, invocation: &Invocation) -> Result<ScriptOutput> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        #[cfg(unix)]
        if let Some(user) = &self.user {
            use std::os::unix::process::CommandExt;
            let resolved = nix::unistd::User::from_name(user)
                .map_err(|e| PkgError::Config(format!("SCRIPT_USER {user}: {e}")))?
                .ok_or_else(|| PkgError::Config(format!("SCRIPT_USER {user}: no such user")))?;
            command.uid(resolved.uid.as_raw());
            command.gid(resolved.gid.as_raw());
        }
        supervise(command, invocation)
    }
}

/// Same-privilege backend for unprivileged callers.
#[derive(Debug, Default)]
pub struct DirectSandbox;

impl Sandbox for DirectSandbox {
    fn run(&self, invocation: &Invocation) -> Result<ScriptOutput> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        supervise(command, invocation)
    }
}

/// What: Pick the sandbox backend for a configuration.
///
/// Inputs:
/// - `config`: Supplies `SCRIPT_USER`.
///
/// Output:
/// - Process backend with privilege drop when a user is configured,
///   direct backend otherwise.
#[must_use]
pub fn default_sandbox(config: &Config) -> Box<dyn Sandbox> {
    match &config.script_user {
        Some(user) => Box::new(ProcessSandbox {
            user: Some(user.clone()),
        }),
        None => Box::new(DirectSandbox),
    }
}

/// What: Build the invocation for one script.
///
/// Inputs:
/// - `pkg`: Owning package.
/// - `kind`: Lifecycle phase.
/// - `language`: Script language.
/// - `body`: Script body.
/// - `config`: Interpreter path, timeout, debug level.
///
/// Output:
/// - The invocation.
///
/// Details:
/// - Shell scripts get the historical prologue
///   `set -- <name>-<version> <PHASE>` (plus `set -x` at debug level 2+)
///   and run through `/bin/sh -s`.
/// - Lua scripts run through the configured interpreter reading the body
///   from stdin.
/// - Both receive `PKG_PREFIX` in the environment.
fn build_invocation(
    pkg: &Package,
    kind: ScriptKind,
    language: ScriptLanguage,
    body: &str,
    config: &Config,
) -> Invocation {
    let env = vec![("PKG_PREFIX".to_string(), pkg.prefix.clone())];
    match language {
        ScriptLanguage::Shell => {
            let mut text = String::new();
            if config.debug_level >= 2 {
                text.push_str("set -x\n");
            }
            text.push_str(&format!(
                "set -- {} {}\n",
                pkg.name_version(),
                kind.phase_arg()
            ));
            text.push_str(body);
            Invocation {
                program: PathBuf::from("/bin/sh"),
                args: vec!["-s".to_string()],
                stdin_body: text,
                env,
                timeout: config.script_timeout,
            }
        }
        ScriptLanguage::Lua => Invocation {
            program: config.lua_interpreter.clone(),
            args: vec!["-".to_string()],
            stdin_body: body.to_string(),
            env,
            timeout: config.script_timeout,
        },
    }
}

/// What: Run every script a package has for a phase.
///
/// Inputs:
/// - `pkg`: Package whose scripts run.
/// - `kind`: Lifecycle phase.
/// - `config`: Script policy.
/// - `sandbox`: Execution backend.
/// - `events`: Receives script output and skip notices.
///
/// Output:
/// - Unit when every script exited zero.
///
/// Details:
/// - `RUN_SCRIPTS=false` skips with a notice.
/// - A missing Lua interpreter surfaces as a script failure with status
///   127 after a notice, keeping the language registered without an
///   embedded VM.
///
/// # Errors
///
/// Returns `PkgError::ScriptFail` for the first non-zero exit.
pub fn run_scripts(
    pkg: &Package,
    kind: ScriptKind,
    config: &Config,
    sandbox: &dyn Sandbox,
    events: &EventBus,
) -> Result<()> {
    if !config.run_scripts {
        if pkg
            .scripts
            .iter()
            .any(|s| s.kind == kind)
        {
            events.notice(format!(
                "RUN_SCRIPTS disabled, skipping {} scripts of {}",
                kind.as_str(),
                pkg.name_version()
            ));
        }
        return Ok(());
    }
    for language in [ScriptLanguage::Shell, ScriptLanguage::Lua] {
        let Some(script) = pkg.script(kind, language) else {
            continue;
        };
        if language == ScriptLanguage::Lua && !config.lua_interpreter.exists() {
            events.notice(format!(
                "no lua interpreter at {}, cannot run {} script of {}",
                config.lua_interpreter.display(),
                kind.as_str(),
                pkg.name_version()
            ));
            return Err(PkgError::ScriptFail {
                kind: kind.as_str().to_string(),
                package: pkg.name_version(),
                status: 127,
            });
        }
        let invocation = build_invocation(pkg, kind, language, &script.body, config);
        tracing::debug!(pkg = %pkg.name_version(), kind = kind.as_str(), "running script");
        let output = sandbox.run(&invocation)?;
        if !output.output.is_empty() {
            events.notice(output.output.clone());
        }
        if output.truncated {
            events.notice(format!(
                "output of {} script of {} was truncated",
                kind.as_str(),
                pkg.name_version()
            ));
        }
        if output.status != 0 {
            return Err(PkgError::ScriptFail {
                kind: kind.as_str().to_string(),
                package: pkg.name_version(),
                status: output.status,
            });
        }
    }
    Ok(())
}
