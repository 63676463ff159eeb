pub mod audio;
pub mod catalog;
pub mod config;
pub mod core;
pub mod providers;
pub mod registry;
pub mod runtime;
pub mod selection;
pub mod streaming;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use core::types::*;
pub use runtime::{GenerationGateway, GenerationGatewayBuilder};
