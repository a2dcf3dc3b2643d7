pub mod log;
pub mod paths;
pub mod process;
pub mod shell;

pub use log::init_logging;
