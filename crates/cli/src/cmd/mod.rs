mod build;
mod clean;
mod info;

pub use build::{BuildArgs, cmd_build};
pub use clean::cmd_clean;
pub use info::cmd_info;
