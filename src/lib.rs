pub mod api;
pub mod certificate;
pub mod config;
pub mod course;
pub mod database;
pub mod error;
pub mod progress;
pub mod service;
pub mod student;
pub mod utils;
pub mod watch;

#[cfg(test)]
mod test_support;
