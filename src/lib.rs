// Library exports for procguard

pub mod cli;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod logger;
