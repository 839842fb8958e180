//! Route handlers for the status endpoint

mod status;
mod system;

pub use status::*;
pub use system::*;
