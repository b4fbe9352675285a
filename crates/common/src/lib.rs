//! Common utilities and shared types for cmsvs-rs.
//!
//! This crate provides foundational components used across all cmsvs-rs crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Clock**: Fixed-offset application time via [`Clock`]
//! - **Filename minting**: Collision-resistant stored names via [`FilenameMinter`]
//! - **Cache**: Redis-preferred key/value cache via [`CacheManager`]
//! - **Metrics**: Request and query timing windows via [`PerformanceMetrics`]
//!
//! # Example
//!
//! ```no_run
//! use cmsvs_common::{Clock, Config, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let clock = Clock::new(config.timezone.offset_hours);
//!     println!("Local time: {}", clock.to_local(clock.now()));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod filename;
pub mod metrics;

pub use cache::{CacheBackend, CacheManager, CacheStats, CachedFn, MemoryCache, RedisCache};
pub use clock::{Clock, TimeStyle};
pub use config::Config;
pub use error::{AppError, AppResult, FieldErrors};
pub use filename::FilenameMinter;
pub use metrics::{PerformanceMetrics, PerformanceSummary};
