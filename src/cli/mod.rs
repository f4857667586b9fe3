pub mod commands;
pub mod handlers;

pub use commands::{CliArgs, Commands, DownloadArgs, StageArgs};
pub use handlers::{handle_download, handle_stage};
