//! Munda ML service: HTTP surface over the prediction and detection engines

pub mod api;
pub mod config;
