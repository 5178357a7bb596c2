pub mod commands;
pub mod config;
pub mod connection;
pub mod console_display;
pub mod coordinator;
pub mod export;
pub mod frame_pipeline;
pub mod frame_source;
pub mod lyrics;
pub mod metrics;
pub mod overlay;
pub mod protocol;
pub mod session;
pub mod tone;
pub mod tracks;
pub mod types;
pub mod ws_client;
