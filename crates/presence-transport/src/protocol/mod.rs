//! Wire protocol definitions
//!
//! Control frames the client sends, frames the server sends back, and the
//! close codes that decide between reconnecting and giving up.

mod close_codes;
mod frames;

pub use close_codes::{is_fatal_close, CloseCode};
pub use frames::{ClientFrame, ServerFrame};
