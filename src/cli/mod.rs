pub mod commands;
pub mod runtime;

pub use commands::run;
pub use runtime::Runtime;
