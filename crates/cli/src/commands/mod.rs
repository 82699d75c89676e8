//! Command handlers for the Relay CLI.

pub mod chat;
pub mod classify;
pub mod index;
pub mod retrieve;
pub mod route;
mod runtime;

pub use chat::ChatCommand;
pub use classify::ClassifyCommand;
pub use index::IndexCommand;
pub use retrieve::RetrieveCommand;
pub use route::RouteCommand;
