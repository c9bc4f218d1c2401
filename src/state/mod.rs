//! Observable session state exposed to the presentation layer.

pub mod session_state;

pub use session_state::{ConnectionState, Route, SessionEvent, SessionSnapshot};
