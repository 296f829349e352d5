pub mod client;
pub mod completion;
pub mod config;
pub mod engine;
pub mod labels;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod samples;
pub mod server;
pub mod templates;
pub mod types;
pub mod worker;
