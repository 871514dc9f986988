//! A TFTP (RFC 1350) server library: wire codec, path jail, session engine,
//! and listener, assembled by the `tftpd` binary in `src/main.rs`.

pub mod config;
pub mod error;
pub mod listener;
pub mod path;
pub mod protocol;
pub mod session;

pub use config::ServerConfig;
pub use error::{Outcome, RequestError, SessionError};
pub use protocol::{Message, Mode};
