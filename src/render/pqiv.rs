use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow, bail, ensure};
use tracing::{debug, info, trace, warn};

use super::Renderer;

pub const DEFAULT_PQIV_PATH: &str = "/usr/bin/pqiv";

const STATUS_PREFIX: &str = "CURRENT_FILE_NAME=\"";

/// Actions understood by `pqiv --actions-from-stdin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    SetStatusOutput(bool),
    GotoFileRelative(i32),
    Quit,
}

impl ViewerCommand {
    pub fn to_line(self) -> String {
        match self {
            ViewerCommand::SetStatusOutput(on) => format!("set_status_output({})", u8::from(on)),
            ViewerCommand::GotoFileRelative(step) => format!("goto_file_relative({step})"),
            ViewerCommand::Quit => "quit()".to_string(),
        }
    }
}

/// Extracts the file name from a `CURRENT_FILE_NAME="..."` status line.
pub fn parse_status_line(line: &str) -> Option<PathBuf> {
    let start = line.find(STATUS_PREFIX)? + STATUS_PREFIX.len();
    let rest = &line[start..];
    let end = rest.rfind('"')?;
    let name = &rest[..end];
    (!name.is_empty()).then(|| PathBuf::from(name))
}

/// Drives an external `pqiv` process through its stdin action interface.
pub struct PqivRenderer {
    executable: PathBuf,
    process: Mutex<Option<ViewerProcess>>,
    current: Arc<Mutex<Option<PathBuf>>>,
}

struct ViewerProcess {
    child: Child,
    stdin: ChildStdin,
    reader: Option<JoinHandle<()>>,
}

impl ViewerProcess {
    fn send(&mut self, command: ViewerCommand) -> Result<()> {
        let line = command.to_line();
        writeln!(self.stdin, "{line}")
            .and_then(|()| self.stdin.flush())
            .with_context(|| format!("failed to send '{line}' to pqiv"))?;
        trace!(command = line, "sent viewer command");
        Ok(())
    }
}

impl PqivRenderer {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            process: Mutex::new(None),
            current: Arc::new(Mutex::new(None)),
        }
    }

    fn process(&self) -> MutexGuard<'_, Option<ViewerProcess>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn probe(&self) -> Result<()> {
        let status = Command::new(&self.executable)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("could not start {}", self.executable.display()))?;
        ensure!(
            status.success(),
            "trying to execute '{} --help' failed",
            self.executable.display()
        );
        Ok(())
    }
}

impl Default for PqivRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_PQIV_PATH)
    }
}

impl Renderer for PqivRenderer {
    fn init(&self, picture_directory: &Path) -> Result<()> {
        let mut process = self.process();
        if process.is_some() {
            bail!("pqiv renderer is already initialized");
        }
        self.probe()?;

        let mut child = Command::new(&self.executable)
            .args([
                "--fullscreen",
                "--hide-info-box",
                "--fade",
                "--scale-images-up",
                "--end-of-files-action=wrap",
                "--shuffle",
                "--watch-directories",
                "--actions-from-stdin",
            ])
            .arg(picture_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.executable.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("pqiv stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("pqiv stdout was not captured"))?;

        let current = Arc::clone(&self.current);
        let reader = std::thread::Builder::new()
            .name("pqiv-status".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if line.is_empty() {
                        continue;
                    }
                    trace!(line, "pqiv");
                    if let Some(path) = parse_status_line(&line) {
                        debug!(path = %path.display(), "pqiv switched picture");
                        *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
                    }
                }
                debug!("pqiv stdout closed");
            })
            .context("failed to spawn pqiv status reader")?;

        let mut viewer = ViewerProcess {
            child,
            stdin,
            reader: Some(reader),
        };
        viewer.send(ViewerCommand::SetStatusOutput(true))?;
        info!(
            executable = %self.executable.display(),
            directory = %picture_directory.display(),
            pid = viewer.child.id(),
            "pqiv started"
        );
        *process = Some(viewer);
        Ok(())
    }

    fn go_to_next_picture(&self) -> Result<()> {
        match self.process().as_mut() {
            Some(viewer) => viewer.send(ViewerCommand::GotoFileRelative(1)),
            None => bail!("init() must be called before go_to_next_picture()"),
        }
    }

    fn current_picture_path(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn dispose(&self) -> Result<()> {
        let Some(mut viewer) = self.process().take() else {
            return Ok(());
        };
        info!("quitting pqiv");
        if let Err(err) = viewer.send(ViewerCommand::Quit) {
            warn!(error = %err, "pqiv did not accept quit; waiting for exit anyway");
        }
        let ViewerProcess {
            mut child,
            stdin,
            reader,
        } = viewer;
        drop(stdin);
        let status = child.wait().context("failed waiting for pqiv to exit")?;
        if let Some(reader) = reader {
            if reader.join().is_err() {
                warn!("pqiv status reader panicked");
            }
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!(%status, "pqiv exited");
        Ok(())
    }
}
