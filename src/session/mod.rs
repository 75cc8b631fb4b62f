pub mod store;
pub mod topic;

pub use store::{SessionSnapshot, SessionStore, Turn, TurnContent, TurnRole};
pub use topic::TopicBoundaryDetector;
