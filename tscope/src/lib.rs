// Expose modules for testing and for engines embedding the tracer
pub mod analysis;
pub mod classification;
pub mod cli;
pub mod config;
pub mod domain;
pub mod offline;
pub mod runner;
pub mod runtime;
