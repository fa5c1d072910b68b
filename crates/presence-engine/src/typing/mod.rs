//! Typing indicators
//!
//! `TypingMachine` holds who is typing where; `TypingDebouncer` decides which
//! local typing calls actually go out on the wire.

mod debounce;
mod machine;

pub use debounce::TypingDebouncer;
pub use machine::TypingMachine;
