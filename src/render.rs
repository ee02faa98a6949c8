pub mod pqiv;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::library::PictureSource;

pub use pqiv::PqivRenderer;

/// Puts pictures on the screen.
pub trait Renderer: Send + Sync {
    /// Prepares to show pictures from `picture_directory`. Called once before anything else.
    fn init(&self, picture_directory: &Path) -> Result<()>;
    fn go_to_next_picture(&self) -> Result<()>;
    /// Path of the picture currently displayed, if known.
    fn current_picture_path(&self) -> Option<PathBuf>;
    /// Releases the display. Safe to call more than once.
    fn dispose(&self) -> Result<()>;

    /// Switches to pictures from another directory by restarting the renderer.
    fn change_directory(&self, picture_directory: &Path) -> Result<()> {
        self.dispose()?;
        self.init(picture_directory)
    }
}

/// Renderer that only tracks the selection made by a [`PictureSource`].
///
/// Used when no viewer process is wanted; the control pages still serve
/// the current picture.
pub struct LibraryRenderer {
    source: Arc<dyn PictureSource>,
}

impl LibraryRenderer {
    pub fn new(source: Arc<dyn PictureSource>) -> Self {
        Self { source }
    }
}

impl Renderer for LibraryRenderer {
    fn init(&self, picture_directory: &Path) -> Result<()> {
        let count = self.source.reload(picture_directory)?;
        info!(count, directory = %picture_directory.display(), "headless renderer ready");
        Ok(())
    }

    fn go_to_next_picture(&self) -> Result<()> {
        match self.source.next_picture() {
            Some(path) => debug!(path = %path.display(), "selected picture"),
            None => warn!("no picture available to show"),
        }
        Ok(())
    }

    fn current_picture_path(&self) -> Option<PathBuf> {
        self.source.current_picture()
    }

    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
