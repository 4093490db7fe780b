pub mod auth_cmd;
pub mod common;
pub mod conversations;
pub mod history;
pub mod notifications;
pub mod watch;
