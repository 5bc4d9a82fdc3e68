//! HTTP layer: request extractors and endpoint handlers

pub mod auth;
pub mod handlers;
pub mod soil_input;
