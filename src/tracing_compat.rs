//! Optional tracing integration.
//!
//! With the `tracing-integration` feature (on by default) the logging macros
//! are the ones from the `tracing` crate. Without it they expand to nothing,
//! so the library carries no logging dependency at all.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    macro_rules! noop_log {
        ($($arg:tt)*) => {};
    }

    pub(crate) use noop_log as debug;
    pub(crate) use noop_log as error;
    pub(crate) use noop_log as info;
    pub(crate) use noop_log as trace;
    pub(crate) use noop_log as warn;
}

#[cfg(not(feature = "tracing-integration"))]
pub(crate) use noop::{debug, error, info, trace, warn};
