//! 命令定义和实现

pub mod config;
pub mod ports;
pub mod record;
pub mod summary;

pub use config::ConfigCommand;
pub use record::RecordCommand;
pub use summary::SummaryCommand;
