//! Courier webhook server library: route assembly and handler wiring.

pub mod app;
pub mod bootstrap;

pub use app::build_router;
pub use bootstrap::build_handler;
