pub mod api;
pub mod config;
pub mod event;
pub mod pipeline;
pub mod processing;
pub mod profile;
pub mod prometheus;
pub mod recommend;
pub mod stats;
pub mod store;
pub mod time;
pub mod trends;
pub mod window;
