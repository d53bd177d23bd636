pub mod error;
pub mod http;
pub mod sessions;
pub mod state;
pub mod subsystems;
