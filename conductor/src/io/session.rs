//! Session driver abstraction.
//!
//! The supervisor talks to its conversation through [`Session`]. The
//! standalone binary uses [`CommandSession`], which replays the whole
//! transcript to an external agent command on every turn. Tests use scripted
//! sessions that record turns without spawning anything.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use super::process::run_command_with_timeout;
use super::records::write_atomic;

/// A conversation the supervisor drives.
pub trait Session {
    /// Add a user turn and run the agent on it.
    fn process_message(&mut self, text: &str) -> Result<()>;
    /// Add a system turn without running the agent.
    fn append_system_message(&mut self, text: &str) -> Result<()>;
    /// Run the agent on the transcript as it stands.
    fn continue_turn(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Parameters for [`CommandSession`].
#[derive(Debug, Clone)]
pub struct CommandSessionConfig {
    /// Program and leading arguments; the transcript arrives on stdin.
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Markdown mirror of the transcript, rewritten after every turn.
    pub transcript_path: PathBuf,
}

/// Session backed by an external agent command.
#[derive(Debug)]
pub struct CommandSession {
    config: CommandSessionConfig,
    turns: Vec<Turn>,
}

impl CommandSession {
    pub fn new(config: CommandSessionConfig) -> Result<Self> {
        if config.command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("session command must be a non-empty array"));
        }
        Ok(Self {
            config,
            turns: Vec::new(),
        })
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    fn push(&mut self, role: Role, text: &str) -> Result<()> {
        self.turns.push(Turn {
            role,
            text: text.to_string(),
        });
        self.mirror()
    }

    fn mirror(&self) -> Result<()> {
        write_atomic(&self.config.transcript_path, &render_transcript(&self.turns))
            .context("write session transcript")
    }

    #[instrument(skip_all, fields(turns = self.turns.len()))]
    fn run_agent(&mut self) -> Result<()> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("session command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.config.workdir);

        let transcript = render_transcript(&self.turns);
        debug!(bytes = transcript.len(), "running session command");
        let output = run_command_with_timeout(
            cmd,
            Some(transcript.as_bytes()),
            self.config.timeout,
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run session command {program}"))?;

        if !output.success() {
            return Err(anyhow!(
                "session command {program} failed: {}",
                output.failure_summary()
            ));
        }
        let reply = output.stdout_text();
        info!(reply_bytes = reply.len(), "session turn complete");
        self.push(Role::Assistant, &reply)
    }
}

impl Session for CommandSession {
    fn process_message(&mut self, text: &str) -> Result<()> {
        self.push(Role::User, text)?;
        self.run_agent()
    }

    fn append_system_message(&mut self, text: &str) -> Result<()> {
        self.push(Role::System, text)
    }

    fn continue_turn(&mut self) -> Result<()> {
        self.run_agent()
    }
}

/// Markdown rendering of a transcript: one `## <role>` section per turn.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut buf = String::new();
    for turn in turns {
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str("## ");
        buf.push_str(turn.role.as_str());
        buf.push_str("\n\n");
        buf.push_str(turn.text.trim_end());
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn session(dir: &std::path::Path, script: &str) -> CommandSession {
        CommandSession::new(CommandSessionConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            workdir: dir.to_path_buf(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
            transcript_path: dir.join("sessions").join("g1.md"),
        })
        .expect("session")
    }

    #[test]
    fn empty_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = CommandSession::new(CommandSessionConfig {
            command: Vec::new(),
            workdir: temp.path().to_path_buf(),
            timeout: Duration::from_secs(1),
            output_limit_bytes: 1,
            transcript_path: temp.path().join("t.md"),
        })
        .expect_err("empty");
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn agent_sees_transcript_and_reply_is_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path(), "grep -c '^## ' ");

        session.process_message("status summary").expect("first turn");
        session
            .append_system_message("[INCOMING AGENT MESSAGES]")
            .expect("system");
        session.continue_turn().expect("second turn");

        let turns = session.turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].text, "1");
        assert_eq!(turns[3].text, "3");

        let mirror =
            fs::read_to_string(temp.path().join("sessions").join("g1.md")).expect("mirror");
        assert!(mirror.starts_with("## user\n\nstatus summary\n"));
        assert!(mirror.contains("## system\n\n[INCOMING AGENT MESSAGES]\n"));
    }

    #[test]
    fn failing_command_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path(), "cat > /dev/null; exit 2");
        let err = session.process_message("hi").expect_err("fails");
        assert!(format!("{err:#}").contains("exit code 2"));
    }
}
