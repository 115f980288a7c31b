//! KDL settings-file parsing.

mod helpers;
mod settings;

pub use settings::{parse_settings, Settings};
