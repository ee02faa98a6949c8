#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use anyhow::{Result, bail};
use pi_picture_frame::Configuration;
use pi_picture_frame::error::FrameError;
use pi_picture_frame::platform::system_power::{CommandOutput, CommandRunner};
use pi_picture_frame::render::Renderer;
use pi_picture_frame::web::FrameControl;

/// Renderer that counts advances and reports a fixed picture.
#[derive(Default)]
pub struct CountingRenderer {
    pub advances: AtomicUsize,
    pub disposals: AtomicUsize,
    pub picture: Mutex<Option<PathBuf>>,
    /// Requested directories and the thread each switch ran on.
    pub directory_changes: Mutex<Vec<(PathBuf, ThreadId)>>,
}

impl CountingRenderer {
    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }
}

impl Renderer for CountingRenderer {
    fn init(&self, _: &Path) -> Result<()> {
        Ok(())
    }

    fn go_to_next_picture(&self) -> Result<()> {
        self.advances.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn current_picture_path(&self) -> Option<PathBuf> {
        self.picture.lock().unwrap().clone()
    }

    fn dispose(&self) -> Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn change_directory(&self, picture_directory: &Path) -> Result<()> {
        self.directory_changes
            .lock()
            .unwrap()
            .push((picture_directory.to_path_buf(), thread::current().id()));
        Ok(())
    }
}

/// Runner that records commands instead of executing them.
pub fn recording_runner() -> (CommandRunner, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let runner: CommandRunner = {
        let seen = Arc::clone(&seen);
        Arc::new(move |command: &str| {
            seen.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                success: true,
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    };
    (runner, seen)
}

/// Writes a headless configuration listening on an ephemeral port.
pub fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let photos = dir.join("photos");
    fs::create_dir_all(&photos).unwrap();
    fs::write(photos.join("a.jpg"), b"a").unwrap();
    fs::write(photos.join("b.jpg"), b"b").unwrap();
    let path = dir.join("frame.yaml");
    fs::write(
        &path,
        format!(
            "photo-directory: {}\nhttp-port: 0\nquit-grace-period: 1s\n\
             display:\n  kind: headless\nviewer:\n  kind: headless\n{extra}",
            photos.display()
        ),
    )
    .unwrap();
    path
}

/// In-memory stand-in for the running frame behind the control pages.
pub struct FakeFrame {
    pub config: Mutex<Configuration>,
    pub advances: AtomicUsize,
    pub screen_on: AtomicBool,
    pub fail_toggle: AtomicBool,
    pub panic_on_picture: AtomicBool,
    pub picture: Mutex<Option<PathBuf>>,
}

impl FakeFrame {
    pub fn new(config: Configuration) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            advances: AtomicUsize::new(0),
            screen_on: AtomicBool::new(true),
            fail_toggle: AtomicBool::new(false),
            panic_on_picture: AtomicBool::new(false),
            picture: Mutex::new(None),
        })
    }
}

impl FrameControl for FakeFrame {
    fn current_config(&self) -> Configuration {
        self.config.lock().unwrap().clone()
    }

    fn configure(&self, config: Configuration) -> Result<(), FrameError> {
        config.validate()?;
        *self.config.lock().unwrap() = config;
        Ok(())
    }

    fn toggle_next_photo(&self) {
        self.advances.fetch_add(1, Ordering::SeqCst);
    }

    fn screen_is_on(&self) -> bool {
        self.screen_on.load(Ordering::SeqCst)
    }

    fn toggle_screen(&self) -> Result<bool> {
        if self.fail_toggle.load(Ordering::SeqCst) {
            bail!("backlight is not writable");
        }
        let on = !self.screen_on.load(Ordering::SeqCst);
        self.screen_on.store(on, Ordering::SeqCst);
        Ok(on)
    }

    fn current_picture(&self) -> Option<PathBuf> {
        if self.panic_on_picture.load(Ordering::SeqCst) {
            panic!("picture lookup exploded");
        }
        self.picture.lock().unwrap().clone()
    }
}
