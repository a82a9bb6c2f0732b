pub mod compaction;
pub mod dispatcher;
pub mod engine;
pub mod tools;
pub mod user_lock;

pub use dispatcher::{Dispatcher, DispatcherSettings};
pub use engine::{ChatOutcome, ConversationEngine, EngineSettings};
pub use user_lock::{UserGuard, UserLocks};
