//! Adaptive concurrency limits with AIMD backpressure feedback.
//!
//! Bounds how many operations run against a rate-sensitive downstream
//! resource at once, and continuously retunes that bound: every unsignaled
//! success grows the limit by a fixed step, every backpressure signal cuts it
//! by a multiplicative factor. Utilization traces the classic sawtooth —
//! a slow linear climb towards capacity, a sharp drop on overload, repeat.
//!
//! The limiter never inspects the wrapped resource and never interprets its
//! responses; deciding that a response means "back off" is entirely the
//! caller's job. It is in-process only: no shared state across processes, and
//! no request-rate shaping — only concurrency is limited.
//!
//! ```
//! use sawtooth::{Backpressure, Config, Limiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = Limiter::new(Config::default()).unwrap();
//!
//! // Explicit form: hold a permit across the call, then resolve it.
//! let permit = limiter.acquire().await;
//! let throttled = false; // e.g. a 429 from the downstream service
//! if throttled {
//!     permit.backpressure();
//! } else {
//!     permit.success();
//! }
//!
//! // Scoped form: the job's result resolves the permit.
//! let result: Result<(), Backpressure> = limiter
//!     .run(|| async {
//!         // call the downstream resource here
//!         Err(Backpressure)
//!     })
//!     .await;
//! assert_eq!(result, Err(Backpressure));
//! # }
//! ```

mod aimd;
mod config;
mod limiter;

pub use config::{Config, ConfigError};
pub use limiter::{
    Acquire, Backpressure, BackpressureSignal, Limiter, LimiterState, Outcome, Permit,
};
