//! Abstractions over the filesystem and external processes.
//!
//! The collector never touches `std::fs` or `std::process` directly. Going
//! through these traits lets the whole collection pass run against
//! [`MockFs`](super::mock::MockFs) and [`MockRunner`](super::mock::MockRunner)
//! in tests, on any host.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// Abstraction for filesystem operations.
pub trait FileSystem {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns `true` if `path` exists and is a regular file.
    fn is_file(&self, path: &Path) -> bool;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        (**self).is_file(path)
    }
}

/// A fully described external process call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added on top of the inherited process environment.
    pub env: Vec<(String, String)>,
    /// Text written to the child's stdin, if any.
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Single-line rendering for log messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Abstraction for running an external program and capturing its stdout.
pub trait CommandRunner {
    /// Runs the invocation to completion.
    ///
    /// Returns the raw stdout bytes. A non-zero exit status is not an error
    /// at this level: `psql` reports connection failures on stderr and
    /// leaves stdout empty, which callers detect from the output.
    fn run(&self, invocation: &Invocation) -> io::Result<Vec<u8>>;

    /// Runs the invocation and reports whether it exited successfully.
    fn succeeds(&self, invocation: &Invocation) -> bool;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, invocation: &Invocation) -> io::Result<Vec<u8>> {
        (**self).run(invocation)
    }

    fn succeeds(&self, invocation: &Invocation) -> bool {
        (**self).succeeds(invocation)
    }
}

/// Runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        // `cmd /c` does its own quote parsing; hand it the line untouched.
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            for arg in &invocation.args {
                cmd.raw_arg(arg);
            }
        }
        #[cfg(not(windows))]
        cmd.args(&invocation.args);
        cmd.envs(invocation.env.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<Vec<u8>> {
        let mut cmd = Self::command(invocation);
        cmd.stdout(Stdio::piped());
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn()?;
        if let Some(input) = &invocation.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            use std::io::Write;
            stdin.write_all(input.as_bytes())?;
            stdin.write_all(b"\n")?;
        }
        let output = child.wait_with_output()?;
        Ok(output.stdout)
    }

    fn succeeds(&self, invocation: &Invocation) -> bool {
        Self::command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}
