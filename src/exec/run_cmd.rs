use std::fmt;
use std::fs::File;
use std::io::{stderr, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result};

use super::Error;

/// An external program invocation, held as data so it can be logged,
/// compared in tests, and run by any `CommandRunner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the process, if not our own.
    pub current_dir: Option<PathBuf>,
    /// Send stdout to this file instead of capturing it.
    pub stdout_to: Option<PathBuf>,
}

impl ToolCall {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::with_capacity(8),
            current_dir: None,
            stdout_to: None,
        }
    }

    pub fn arg<S: AsRef<std::ffi::OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdout_to<P: AsRef<Path>>(mut self, file: P) -> Self {
        self.stdout_to = Some(file.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(out) = &self.stdout_to {
            write!(f, " > {}", out.display())?;
        }
        Ok(())
    }
}

/// What a finished call left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    /// None if killed by a signal.
    pub code: Option<i32>,
    /// Empty when stdout was redirected to a file.
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    pub fn ok<S: Into<String>>(stdout: S) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed<S: Into<String>>(code: i32, stderr: S) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external programs. Blocks until the program exits.
pub trait CommandRunner {
    fn run(&mut self, call: &ToolCall) -> Result<ToolOutput>;
}

/// Runs calls as real subprocesses.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&mut self, call: &ToolCall) -> Result<ToolOutput> {
        log::debug!("running `{call}`");

        let mut cmd = Command::new(&call.program);
        cmd.args(&call.args).stdin(Stdio::null()).stderr(Stdio::piped());
        if let Some(dir) = &call.current_dir {
            cmd.current_dir(dir);
        }
        match &call.stdout_to {
            Some(path) => {
                let f = File::create(path)
                    .with_context(|| format!("creating stdout file {path:?}"))?;
                cmd.stdout(Stdio::from(f));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::SpawnFailed(call.program.clone(), e))?;

        // stderr is streamed on its own thread so a chatty tool
        // can't fill the pipe while we wait on stdout:
        let child_err = child.stderr.take();
        let thread_err = thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut captured = Vec::with_capacity(256);
            if let Some(stream) = child_err {
                communicate(stream, &mut captured, stderr())?;
            }
            Ok(captured)
        });

        let mut stdout = String::new();
        if let Some(mut child_out) = child.stdout.take() {
            child_out
                .read_to_string(&mut stdout)
                .context("reading child stdout")?;
        }

        let captured_err = thread_err
            .join()
            .map_err(|_| anyhow::anyhow!("stderr thread of `{}` panicked", call.program))?
            .context("reading child stderr")?;

        let status = child.wait().context("waiting on child process")?;
        log::debug!("`{}` finished with {status}", call.program);

        Ok(ToolOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&captured_err).into_owned(),
        })
    }
}

/// Copy `stream` into both `captured` and `output` until it closes.
fn communicate<R: Read, W: Write>(
    mut stream: R,
    captured: &mut Vec<u8>,
    mut output: W,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf)?;
        if num_read == 0 {
            break;
        }

        let buf = &buf[..num_read];
        captured.extend_from_slice(buf);
        output.write_all(buf)?;
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_captures_stdout() -> Result<()> {
        let out = ProcessRunner.run(&ToolCall::new("echo").arg("Submitted batch job 42"))?;
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "Submitted batch job 42");
        Ok(())
    }

    #[test]
    fn test_redirects_stdout_to_file() -> Result<()> {
        let dir = tempdir()?;
        let target = dir.path().join("out.txt");
        let call = ToolCall::new("echo").arg("chr1").stdout_to(&target);
        let out = ProcessRunner.run(&call)?;
        assert!(out.success);
        assert!(out.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&target)?, "chr1\n");
        Ok(())
    }

    #[test]
    fn test_reports_failure() -> Result<()> {
        let call = ToolCall::new("sh").args(["-c", "echo broken >&2; exit 3"]);
        let out = ProcessRunner.run(&call)?;
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr.trim(), "broken");
        Ok(())
    }

    #[test]
    fn test_missing_program() {
        let err = ProcessRunner
            .run(&ToolCall::new("/nonexistent/seqlaunch-test-tool"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::SpawnFailed(..))
        ));
    }

    #[test]
    fn test_display() {
        let call = ToolCall::new("bedtools")
            .args(["intersect", "-a", "n1.vcf.gz"])
            .stdout_to("/tmp/x.vcf");
        assert_eq!(call.to_string(), "bedtools intersect -a n1.vcf.gz > /tmp/x.vcf");
    }
}
