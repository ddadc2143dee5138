//! Chat sessions: the message state machine and its async driver.

mod service;
mod state;

pub use service::{ChatEvent, ChatService, SendOutcome};
pub use state::{ChatSnapshot, DeleteOutcome, PendingSend, SEND_ERROR_MESSAGE};
