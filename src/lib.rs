pub mod camera;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod pose;
pub mod session;
pub mod sim;
pub mod sizing;
pub mod tracker;
