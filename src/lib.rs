// src/lib.rs
pub mod config;
pub mod error;
pub mod pocketbase;
pub mod materializer;
pub mod artifact;
pub mod supervisor;
pub mod prober;
pub mod sync;
pub mod metrics;
