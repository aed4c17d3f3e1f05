pub mod client;
pub mod models;
pub mod parse;

pub use client::*;
pub use models::*;
