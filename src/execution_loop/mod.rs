pub mod prompt;
pub mod runner;

pub use prompt::build_query_prompt;
pub use runner::ExecutionLoop;
