pub mod history;
pub mod orchestrator;
pub mod subscription;

pub use history::{HistoryReplays, ReplayToken};
pub use orchestrator::{Orchestrator, State};
pub use subscription::SubscriptionHub;
