//! Request routing for recording and replay

mod control;
mod http;

pub use control::{is_control_path, CONTROL_PREFIX};
pub use http::{HttpProxy, Outcome};
