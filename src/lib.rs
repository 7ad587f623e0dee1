//! nethealth - network health monitoring engine.
//!
//! Probes devices and gateway test IPs, classifies their health, keeps a
//! rolling check history and persists gateway configuration and speed tests.

pub mod config;
pub mod db;
pub mod engine;
pub mod health;
pub mod probe;
pub mod scheduler;
