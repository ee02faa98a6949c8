use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Supplies the pictures the frame cycles through.
pub trait PictureSource: Send + Sync {
    /// Rebuilds the picture list from `directory`. Returns the number of pictures found.
    fn reload(&self, directory: &Path) -> Result<usize>;
    /// Selects and returns another picture, or `None` when nothing usable remains.
    fn next_picture(&self) -> Option<PathBuf>;
    fn current_picture(&self) -> Option<PathBuf>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Randomly ordered picture list discovered by walking a directory tree.
pub struct PictureLibrary {
    state: Mutex<LibraryState>,
}

struct LibraryState {
    pictures: Vec<PathBuf>,
    current: Option<PathBuf>,
    rng: StdRng,
}

impl Default for PictureLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PictureLibrary {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(LibraryState {
                pictures: Vec::new(),
                current: None,
                rng,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LibraryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PictureSource for PictureLibrary {
    fn reload(&self, directory: &Path) -> Result<usize> {
        ensure!(
            directory.is_dir(),
            "picture directory {} does not exist",
            directory.display()
        );
        let pictures = discover_pictures(directory);
        let count = pictures.len();

        let mut state = self.state();
        state.pictures = pictures;
        let keep_current = state
            .current
            .as_ref()
            .is_some_and(|current| state.pictures.contains(current));
        if !keep_current {
            state.current = None;
            state.select_next();
        }
        info!(directory = %directory.display(), count, "picture list loaded");
        Ok(count)
    }

    fn next_picture(&self) -> Option<PathBuf> {
        self.state().select_next()
    }

    fn current_picture(&self) -> Option<PathBuf> {
        self.state().current.clone()
    }

    fn len(&self) -> usize {
        self.state().pictures.len()
    }
}

impl LibraryState {
    /// Draws uniformly among the other pictures that still exist on disk.
    /// Vanished entries are dropped from the list as they are found.
    fn select_next(&mut self) -> Option<PathBuf> {
        if self.pictures.is_empty() {
            debug!("picture list is empty");
            return None;
        }
        let repeat_allowed = self.pictures.len() == 1;
        let mut candidates: Vec<usize> = (0..self.pictures.len())
            .filter(|&index| repeat_allowed || self.current.as_ref() != Some(&self.pictures[index]))
            .collect();

        let mut vanished = Vec::new();
        let mut chosen = None;
        while !candidates.is_empty() {
            let index = candidates.swap_remove(self.rng.random_range(0..candidates.len()));
            if self.pictures[index].is_file() {
                chosen = Some(self.pictures[index].clone());
                break;
            }
            debug!(path = %self.pictures[index].display(), "skipping vanished picture");
            vanished.push(index);
        }

        if !vanished.is_empty() {
            vanished.sort_unstable();
            for index in vanished.into_iter().rev() {
                self.pictures.remove(index);
            }
        }
        match chosen {
            Some(path) => {
                self.current = Some(path.clone());
                Some(path)
            }
            None => {
                warn!(count = self.pictures.len(), "no other existing picture found in list");
                None
            }
        }
    }
}

/// All picture files below `root`, following symlinks, in walk order.
pub fn discover_pictures(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_picture(path))
        .collect()
}

#[inline]
fn is_picture(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "gif", "tif", "tiff"].contains(&e.as_str())
    )
}
