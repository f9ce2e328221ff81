pub mod cli;
pub mod http;
pub mod state;

pub use state::AppState;
