pub mod pending_action;

pub use pending_action::{ConfirmationReply, PendingAction, PendingActionManager};
