pub mod acquire;
pub mod compose;
pub mod config;
pub mod deliver;
pub mod ffmpeg;
pub mod filter;
pub mod job;
pub mod pipeline;
pub mod speech;
pub mod tmdb;
