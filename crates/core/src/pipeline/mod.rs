pub mod infrastructure;
pub mod overlay_logger;
pub mod overlay_session;
pub mod poll_scheduler;
