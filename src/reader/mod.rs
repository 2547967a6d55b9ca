//! Reader pipeline stages
//!
//! Every stage implements [`Reader`] and exclusively owns the stage below it.
//! Data flows bottom-up on each call to `next`:
//!
//! ```text
//! tail -> line (decode) -> strip_newline -> json -> timeout -> multiline -> limit
//! ```
//!
//! [`Pipeline`] assembles the chain for one source.

pub mod json;
pub mod limit;
pub mod line;
pub mod multiline;
pub mod pipeline;
pub mod strip;
pub mod tail;
pub mod timeout;

use crate::types::Message;
use crate::Result;
use async_trait::async_trait;

pub use json::JsonReader;
pub use limit::LimitReader;
pub use line::LineReader;
pub use multiline::{MatchMode, Matcher, MultilineReader, MultilineRules};
pub use pipeline::Pipeline;
pub use strip::StripNewline;
pub use tail::TailReader;
pub use timeout::TimeoutReader;

/// A source of messages
#[async_trait]
pub trait Reader: Send {
    /// Produce the next message
    async fn next(&mut self) -> Result<Message>;

    /// Release resources held by this stage and the stages below it
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<R: Reader + ?Sized> Reader for Box<R> {
    async fn next(&mut self) -> Result<Message> {
        (**self).next().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
