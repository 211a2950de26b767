pub mod config;
pub mod connection;
pub mod envelope;
pub mod history;
pub mod logging;
pub mod monitor;
pub mod normalize;
pub mod registry;
pub mod render;
pub mod retry;
pub mod sequencer;
pub mod shape;
pub mod ticker;
