//! Launches external network diagnostic tools, streams their output to live
//! observers and keeps an in-memory history of every run.

pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod findings;
pub mod hub;
pub mod registry;
pub mod runner;
