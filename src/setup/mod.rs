//! Viewer configuration: start-up prompts, config-file validation and the
//! live console.

pub mod console;
pub mod prompt;
pub mod validate;

pub use console::{parse_command, run_console, ViewerCommand};
pub use prompt::Prompter;
pub use validate::{settings_from_spec, RateCap};
