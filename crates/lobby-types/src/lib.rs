//! Wire and domain types shared by the store, gateway and REST layers.

pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use error::ChatError;
