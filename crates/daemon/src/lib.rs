// Re-export modules for library use
pub mod config;
pub mod session;
