//! Timelapse capture server: scheduled frame grabs from network and hardware
//! cameras, retention of the captured stills and video export through ffmpeg.

pub mod api;
pub mod capture;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod recorder;

pub use error::Error;
