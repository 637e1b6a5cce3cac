pub mod config;
pub mod diagnosis;
pub mod forensic;
pub mod healthbar;
pub mod library;
pub mod model;
pub mod rescue;
pub mod scoring;

/// Application name for XDG paths
pub const APP_NAME: &str = "setdoctor";
