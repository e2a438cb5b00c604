//! Location sampling.
//!
//! `LocationSource` is the platform seam (native or browser, chosen at
//! startup); `LocationStream` turns whichever source is available into a
//! geographically-filtered, watchdog-guarded, backoff-retrying sample
//! stream.

mod source;
mod stream;

pub use source::{
    FixRequest, LocationError, LocationSource, ReplaySource, WatchGuard, WatchRequest,
};
pub use stream::{Backoff, LocationStream, LocationWatch, StreamConfig};
