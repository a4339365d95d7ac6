//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Directory + static services → Server → Listeners
//!
//! Stop (signals.rs → shutdown.rs):
//!     SIGTERM/SIGINT → trigger once → relay + admin stop accepting
//!     → in-flight calls drain → pools close → resolvers cancel their watches
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then directory, then listeners
//! - Config file changes republish the static service table only

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
