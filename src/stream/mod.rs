//! Stream sessions
//!
//! Each subscriber gets a `StreamSession` task that replays history from
//! its resume id and then tails the log. The subscriber holds a
//! `Subscription`; the hub keeps a `SessionManager` of live sessions.

mod session;
mod subscription;

pub use session::{CloseReason, SessionState, StreamItem, StreamSession};
pub use subscription::{SessionInfo, SessionManager, Subscription};
