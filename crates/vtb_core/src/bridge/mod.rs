//! Concrete collaborators backed by external programs.

mod command;

pub use command::{CommandModels, CommandPipeline, BLEND_DIR, BLEND_VIDEO, ITEM_CONFIG_FILE};
