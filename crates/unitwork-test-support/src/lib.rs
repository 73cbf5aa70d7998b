//! Shared test mocks and utilities for unitwork.

mod clock;
mod dispatcher;

pub use clock::{FixedClock, fixed_clock};
pub use dispatcher::{
    CascadingDispatcher, FailingDispatcher, RecordingDispatcher, SlowDispatcher,
};
