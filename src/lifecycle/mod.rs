//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! SIGINT / SIGTERM → Shutdown::trigger
//!     → cluster receiver, config watcher, admin server stop
//!     → metrics endpoint stopped, listeners removed
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
