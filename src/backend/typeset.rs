//! [`MathTypesetter`] that shells out to an external program.
//!
//! The program receives the formula (as its last argument or on stdin) and
//! must print SVG markup on stdout. `tex2svg` from `mathjax-node-cli` works
//! out of the box:
//!
//! ```rust,no_run
//! use htmlsnap::backend::CommandTypesetter;
//!
//! let typesetter = CommandTypesetter::new("tex2svg").inline_arg("--inline");
//! ```

use crate::error::ResourceError;
use crate::host::{MathKind, MathTypesetter};
use crate::pipeline::fetch::truncate;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormulaInput {
    /// Appended as the last argument.
    #[default]
    Argument,
    Stdin,
}

#[derive(Debug, Clone)]
pub struct CommandTypesetter {
    program: String,
    args: Vec<String>,
    inline_args: Vec<String>,
    input: FormulaInput,
    timeout: Duration,
}

impl CommandTypesetter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            inline_args: Vec::new(),
            input: FormulaInput::Argument,
            timeout: Duration::from_secs(30),
        }
    }

    /// Argument passed for every formula.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Argument passed for inline formulas only.
    pub fn inline_arg(mut self, arg: impl Into<String>) -> Self {
        self.inline_args.push(arg.into());
        self
    }

    pub fn input(mut self, input: FormulaInput) -> Self {
        self.input = input;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn failed(&self, source: &str, detail: impl Into<String>) -> ResourceError {
        ResourceError::TypesetFailed {
            formula: truncate(source),
            detail: detail.into(),
        }
    }

    async fn run(&self, source: &str, kind: MathKind) -> Result<Vec<u8>, ResourceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if kind == MathKind::Inline {
            cmd.args(&self.inline_args);
        }
        if self.input == FormulaInput::Argument {
            cmd.arg(source);
        }
        cmd.stdin(match self.input {
            FormulaInput::Stdin => Stdio::piped(),
            FormulaInput::Argument => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| self.failed(source, format!("cannot start '{}': {}", self.program, e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .await
                .map_err(|e| self.failed(source, e.to_string()))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| self.failed(source, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failed(source, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed(
                source,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MathTypesetter for CommandTypesetter {
    async fn typeset(&self, source: &str, kind: MathKind) -> Result<String, ResourceError> {
        let stdout = self.run(source, kind).await?;
        let text = String::from_utf8_lossy(&stdout);
        let Some(start) = text.find("<svg") else {
            return Err(self.failed(source, "output contains no <svg> element"));
        };
        debug!("Typeset {} formula '{}'", kind.as_str(), truncate(source));
        Ok(text[start..].trim_end().to_string())
    }
}
