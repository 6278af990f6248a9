pub mod chip;
pub mod config;
pub mod error;
pub mod instrument;
pub mod module;
pub mod opna;
pub mod pitch;
pub mod playback;
pub mod s98;
pub mod vgm;

pub use config::Config;
pub use error::{Error, Result};
pub use module::{Module, Project};
pub use opna::OpnaController;
pub use playback::PlaybackManager;
