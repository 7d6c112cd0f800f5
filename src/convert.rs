//! Document conversion through an external program.

use std::io::Write;
use std::process::{Command, Stdio};

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to talk to {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },

    /// The converter ran and failed. `output` is whatever it printed, which is
    /// usually the only clue to what went wrong.
    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

/// Turns an uploaded document into Markdown.
pub trait Converter: Send + Sync {
    fn convert(&self, source: &[u8]) -> Result<Vec<u8>, ConvertError>;
}

/// Converts docx to CommonMark with pandoc.
#[derive(Debug, Clone)]
pub struct Pandoc {
    program: String,
}

impl Pandoc {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-f", "docx", "-t", "commonmark", "-o", "-"]);
        cmd
    }
}

impl Default for Pandoc {
    fn default() -> Self {
        Self::new("pandoc")
    }
}

impl Converter for Pandoc {
    fn convert(&self, source: &[u8]) -> Result<Vec<u8>, ConvertError> {
        run_filter(self.command(), &self.program, source)
    }
}

/// Pipe `input` through `cmd` and collect its stdout.
///
/// stdin is fed from a separate thread so a child that writes before it has
/// read everything cannot deadlock against us.
fn run_filter(mut cmd: Command, program: &str, input: &[u8]) -> Result<Vec<u8>, ConvertError> {
    tracing::debug!(?cmd, bytes = input.len(), "running converter");
    let io_err = |source| ConvertError::Io {
        program: program.to_string(),
        source,
    };

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ConvertError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = std::thread::scope(|scope| {
        let writer = child.stdin.take().map(|mut stdin| {
            scope.spawn(move || {
                // A child that exits early closes the pipe; its exit status
                // reports the real problem.
                let _ = stdin.write_all(input);
            })
        });
        let output = child.wait_with_output();
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        output
    })
    .map_err(io_err)?;

    if !output.status.success() {
        // pandoc reports some errors on stdout rather than stderr.
        let mut diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(stdout.trim());
        }
        return Err(ConvertError::Failed {
            program: program.to_string(),
            status: output.status,
            output: diagnostic,
        });
    }

    Ok(output.stdout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_filter_output() {
        let out = run_filter(sh("tr a-z A-Z"), "tr", b"hello").unwrap();
        assert_eq!(out, b"HELLO");
    }

    #[test]
    fn test_large_input_does_not_deadlock() {
        let input = vec![b'x'; 4 * 1024 * 1024];
        let out = run_filter(sh("cat"), "cat", &input).unwrap();
        assert_eq!(out.len(), input.len());
    }

    #[test]
    fn test_failure_carries_diagnostics() {
        let err = run_filter(
            sh("cat >/dev/null; echo 'bad docx' ; echo 'unzip failed' >&2; exit 64"),
            "pandoc",
            b"not a docx",
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, ConvertError::Failed { .. }));
        assert!(msg.contains("bad docx"), "{msg}");
        assert!(msg.contains("unzip failed"), "{msg}");
    }

    #[test]
    fn test_missing_program() {
        let pandoc = Pandoc::new("definitely-not-a-real-converter");
        assert!(matches!(
            pandoc.convert(b""),
            Err(ConvertError::Spawn { .. })
        ));
    }
}
