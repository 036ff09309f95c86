pub mod config;
pub mod corrections;
pub mod evaluation;
