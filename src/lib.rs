pub mod error;
pub mod graph;
pub mod models;
pub mod nn;
pub mod utils;
