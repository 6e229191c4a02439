mod model;
mod resolution;

pub use model::Model;
pub use resolution::{FormatPresets, Resolution, DEFAULT_RESOLUTION};
