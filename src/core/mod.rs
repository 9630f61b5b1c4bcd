pub mod breaker;
pub mod context;
pub mod gateway;
pub mod rate_limiter;
pub mod route_table;

pub use breaker::{BreakerBank, BreakerState, CallOutcome, CircuitBreaker};
pub use context::RequestContext;
pub use gateway::GatewayService;
pub use rate_limiter::{Admission, ClientRateLimiter};
pub use route_table::{RouteEntry, RouteTable};
