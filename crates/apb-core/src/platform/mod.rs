//! Chat platform port and the decorators every outbound call goes through.
//!
//! Composition is `RetryingPlatform(ThrottledPlatform(adapter))`: each retry
//! attempt waits for bucket capacity again.

pub mod port;
pub mod retrying;
pub mod throttled;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;

use crate::{retry::RetryPolicy, throttle::OutboundThrottler};

pub use port::PlatformPort;
pub use retrying::RetryingPlatform;
pub use throttled::ThrottledPlatform;

/// Wrap a raw adapter with throttling and retry.
pub fn layered(
    raw: Arc<dyn PlatformPort>,
    throttler: Arc<OutboundThrottler>,
    retry: RetryPolicy,
) -> Arc<dyn PlatformPort> {
    let throttled: Arc<dyn PlatformPort> = Arc::new(ThrottledPlatform::new(raw, throttler));
    Arc::new(RetryingPlatform::new(throttled, retry))
}
