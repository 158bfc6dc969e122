//! Scripted command executor and verification helpers
//!
//! [`MockExecutor`] records every command it is asked to run and answers
//! from scripted responses, so tests can assert on exact argument vectors
//! and stdin payloads without a running switch.

use async_trait::async_trait;
use ovs_agent_common::{format_command, CommandExecutor, OvsError, OvsResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;

/// A command observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Full argument vector
    pub argv: Vec<String>,
    /// Payload passed on stdin, if any
    pub stdin: Option<String>,
}

impl RecordedCommand {
    /// Space-joined command line
    pub fn command_line(&self) -> String {
        format_command(&self.argv)
    }

    /// True if the command line contains `pattern`
    pub fn matches(&self, pattern: &str) -> bool {
        self.command_line().contains(pattern)
    }
}

/// Scripted answer to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Command succeeds with this stdout
    Output(String),
    /// Command exits non-zero
    Fail {
        /// Exit code
        exit_code: i32,
        /// Stderr text
        stderr: String,
    },
}

impl MockResponse {
    /// Successful response with `stdout`
    pub fn output(stdout: impl Into<String>) -> Self {
        Self::Output(stdout.into())
    }

    /// Failed response with `exit_code`
    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::Fail {
            exit_code,
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug)]
struct Script {
    pattern: String,
    /// Answers consumed in order; the last one repeats forever
    responses: VecDeque<MockResponse>,
}

impl Script {
    fn next(&mut self) -> MockResponse {
        if self.responses.len() > 1 {
            self.responses.pop_front().unwrap_or_else(|| MockResponse::output(""))
        } else {
            self.responses
                .front()
                .cloned()
                .unwrap_or_else(|| MockResponse::output(""))
        }
    }
}

/// Recording executor with scripted responses.
///
/// Responses are matched by substring against the space-joined command
/// line. The most recently registered matching script wins. Commands with
/// no matching script succeed with empty output.
#[derive(Debug, Default)]
pub struct MockExecutor {
    scripts: Mutex<Vec<Script>>,
    history: Mutex<Vec<RecordedCommand>>,
}

impl MockExecutor {
    /// Create an executor that answers every command with empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `stdout`
    pub fn respond(&self, pattern: impl Into<String>, stdout: impl Into<String>) -> &Self {
        self.respond_sequence(pattern, vec![MockResponse::output(stdout)])
    }

    /// Fail commands containing `pattern` with `exit_code`
    pub fn fail(&self, pattern: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> &Self {
        self.respond_sequence(pattern, vec![MockResponse::fail(exit_code, stderr)])
    }

    /// Answer successive commands containing `pattern` from `responses`,
    /// repeating the last one once the rest are used up
    pub fn respond_sequence(
        &self,
        pattern: impl Into<String>,
        responses: Vec<MockResponse>,
    ) -> &Self {
        self.scripts.lock().push(Script {
            pattern: pattern.into(),
            responses: responses.into(),
        });
        self
    }

    /// All commands issued so far, in order
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.history.lock().clone()
    }

    /// Command lines issued so far, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.history.lock().iter().map(|c| c.command_line()).collect()
    }

    /// Commands whose command line contains `pattern`
    pub fn matching(&self, pattern: &str) -> Vec<RecordedCommand> {
        self.history
            .lock()
            .iter()
            .filter(|c| c.matches(pattern))
            .cloned()
            .collect()
    }

    /// Number of commands issued
    pub fn call_count(&self) -> usize {
        self.history.lock().len()
    }

    /// Forget recorded history, keeping scripts
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Verify a command containing `pattern` was issued
    pub fn verify_issued(&self, pattern: &str) -> VerifyResult<()> {
        if self.matching(pattern).is_empty() {
            return Err(VerificationError::NotIssued {
                pattern: pattern.to_string(),
                issued: self.command_lines(),
            });
        }
        Ok(())
    }

    /// Verify no command containing `pattern` was issued
    pub fn verify_not_issued(&self, pattern: &str) -> VerifyResult<()> {
        if let Some(found) = self.matching(pattern).first() {
            return Err(VerificationError::UnexpectedCommand {
                pattern: pattern.to_string(),
                command: found.command_line(),
            });
        }
        Ok(())
    }

    /// Verify commands matching `patterns` were issued in this relative order
    pub fn verify_order(&self, patterns: &[&str]) -> VerifyResult<()> {
        let lines = self.command_lines();
        let mut cursor = 0;
        for pattern in patterns {
            match lines[cursor..].iter().position(|l| l.contains(pattern)) {
                Some(offset) => cursor += offset + 1,
                None => {
                    return Err(VerificationError::OutOfOrder {
                        pattern: pattern.to_string(),
                        issued: lines,
                    })
                }
            }
        }
        Ok(())
    }

    fn answer(&self, command_line: &str) -> MockResponse {
        let mut scripts = self.scripts.lock();
        scripts
            .iter_mut()
            .rev()
            .find(|s| command_line.contains(&s.pattern))
            .map(Script::next)
            .unwrap_or_else(|| MockResponse::output(""))
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, argv: &[String], stdin: Option<&str>) -> OvsResult<String> {
        let recorded = RecordedCommand {
            argv: argv.to_vec(),
            stdin: stdin.map(str::to_string),
        };
        let command = recorded.command_line();
        self.history.lock().push(recorded);

        match self.answer(&command) {
            MockResponse::Output(stdout) => Ok(stdout),
            MockResponse::Fail { exit_code, stderr } => Err(OvsError::CommandFailed {
                command,
                exit_code,
                stderr,
            }),
        }
    }
}

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected a command matching '{pattern}', issued: {issued:?}")]
    NotIssued { pattern: String, issued: Vec<String> },

    #[error("Unexpected command matching '{pattern}': {command}")]
    UnexpectedCommand { pattern: String, command: String },

    #[error("Command matching '{pattern}' not found in expected order, issued: {issued:?}")]
    OutOfOrder { pattern: String, issued: Vec<String> },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;
