pub mod config;
pub mod config_store;
pub mod error;
pub mod events;
pub mod frame;
pub mod library;
pub mod platform {
    pub mod display_power;
    pub mod system_power;
}
pub mod render;
pub mod schedule;
pub mod screen;
pub mod tasks {
    pub mod refresh;
    pub mod rotation;
    pub mod signal;
}
pub mod web;

pub use config::Configuration;
pub use error::FrameError;
pub use events::QuitReason;
pub use frame::{FrameOptions, PictureFrame};
