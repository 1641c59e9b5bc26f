mod init;
mod tail;

pub use init::{execute_init, InitArgs};
pub use tail::{execute_tail, resolve_settings, TailSettings};
