//! Marathon REST API client feeding apps and tasks to the synchronizer

pub mod client;

pub use client::MarathonClient;
