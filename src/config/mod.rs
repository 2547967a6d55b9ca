//! Configuration management for logtail

pub mod settings;

pub use settings::{
    Config, HarvesterConfig, JsonConfig, MultilineConfig, ReaderConfig, TailConfig,
};
