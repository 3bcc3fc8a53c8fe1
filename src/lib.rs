pub mod addr;
pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod jitter;
pub mod logging;
pub mod mailbox;
pub mod protocol;
pub mod router;
pub mod state;
pub mod tone;
pub mod transport;

pub use engine::Engine;
pub use mailbox::Mailbox;
pub use state::{CallState, Command};
