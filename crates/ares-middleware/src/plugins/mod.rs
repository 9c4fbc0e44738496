//! Standard plugins.

mod access_log;
mod breaker;
mod metrics;
mod rate_limit;
mod recovery;
mod retry;
mod tracer;

pub use self::access_log::AccessLog;
pub use self::breaker::{BreakerState, CircuitBreaker};
pub use self::metrics::{Metrics, UNMATCHED_ROUTE};
pub use self::rate_limit::{RateLimit, TokenBucket};
pub use self::recovery::Recovery;
pub use self::retry::{Backoff, Retry};
pub use self::tracer::{Tracer, CLIENT_ID_HEADER, CLIENT_UID_HEADER};
