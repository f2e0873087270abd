/**
 * DECODER PROCESS - Supervision of the external rtl_433 decoder
 *
 * ROLE :
 * Starts the decoder as a child process, merges its stdout and stderr into a
 * single stream of trimmed lines, and reports when it exits.
 *
 * OPERATION :
 * - One reader task per pipe pushes lines into a shared channel
 * - Once the decoder exits the channel is closed: lines already buffered are
 *   handed out, then the exit code, with no waiting on the pipes
 * - No restart logic: the decoder exiting ends the program
 */

use regex::Regex;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, Level};

const LINE_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("empty decoder command")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("failed to query decoder status: {0}")]
    Status(#[from] std::io::Error),
}

/// Observable lifecycle of the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    Exited(i32),
}

/// Sole owner of the decoder child process.
#[derive(Debug)]
pub struct DecoderProcess {
    program: String,
    child: Child,
    lines: mpsc::Receiver<String>,
    exited: Option<i32>,
    important: Regex,
    verbose: bool,
}

impl DecoderProcess {
    /// Spawns `argv[0]` with the remaining arguments.
    pub fn start(argv: &[String], important: Regex, verbose: bool) -> Result<Self, LaunchError> {
        let (program, args) = argv.split_first().ok_or(LaunchError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx));
        }

        info!("Started {} (pid {:?})", program, child.id());

        Ok(Self {
            program: program.clone(),
            child,
            lines: rx,
            exited: None,
            important,
            verbose,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Non-blocking status check.
    pub fn state(&mut self) -> Result<ProcessState, ReaderError> {
        if let Some(code) = self.exited {
            return Ok(ProcessState::Exited(code));
        }
        match self.child.try_wait()? {
            Some(status) => Ok(ProcessState::Exited(self.record_exit(status))),
            None => Ok(ProcessState::Running),
        }
    }

    pub fn exit_code(&mut self) -> Result<Option<i32>, ReaderError> {
        Ok(match self.state()? {
            ProcessState::Running => None,
            ProcessState::Exited(code) => Some(code),
        })
    }

    /// Waits for the next output line or for the decoder to exit.
    ///
    /// After the exit only lines already buffered are returned; nothing waits
    /// on pipes a grandchild may still hold open.
    pub async fn next_line(&mut self) -> Result<LineEvent, ReaderError> {
        if let ProcessState::Exited(code) = self.state()? {
            return Ok(self.buffered_or_exit(code));
        }

        tokio::select! {
            biased;
            line = self.lines.recv() => match line {
                Some(line) => Ok(self.surface(line)),
                None => {
                    // both pipes closed
                    let status = self.child.wait().await?;
                    Ok(LineEvent::Exited(self.record_exit(status)))
                }
            },
            status = self.child.wait() => {
                let code = self.record_exit(status?);
                Ok(self.buffered_or_exit(code))
            }
        }
    }

    fn record_exit(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code(status);
        self.exited = Some(code);
        // pumps stop sending, buffered lines stay readable
        self.lines.close();
        code
    }

    fn buffered_or_exit(&mut self, code: i32) -> LineEvent {
        match self.lines.try_recv() {
            Ok(line) => self.surface(line),
            Err(_) => LineEvent::Exited(code),
        }
    }

    /// Level a raw decoder line is logged at, if at all.
    fn log_level(&self, line: &str) -> Option<Level> {
        if self.verbose {
            Some(Level::DEBUG)
        } else if self.important.is_match(line) {
            Some(Level::INFO)
        } else {
            None
        }
    }

    fn surface(&self, line: String) -> LineEvent {
        match self.log_level(&line) {
            Some(level) if level == Level::DEBUG => debug!("RTL: {}", line),
            Some(_) => info!("{}", line),
            None => {}
        }
        LineEvent::Line(line)
    }
}

async fn pump_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("decoder pipe read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
