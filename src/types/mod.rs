//! Core data types shared by every reader stage

pub mod message;

pub use message::{Fields, Message};
