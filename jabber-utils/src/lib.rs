//! Shared utilities for the jabber bridge
//!
//! Provides the unified error type, logging setup, XDG path helpers, and
//! the monotonic clock anchor used for inbox timestamps.

pub mod clock;
pub mod error;
pub mod logging;
pub mod paths;

pub use clock::monotonic_ts;
pub use error::{BridgeError, Result};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
pub use paths::{address_book_file, config_dir, config_file, data_dir, log_dir};
