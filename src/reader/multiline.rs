//! Multiline event grouping
//!
//! Consecutive lines are folded into one event while a regular expression
//! predicate says they belong together. The reader is a small state machine:
//!
//! - `ReadFirst` waits for the first non-empty line and starts an event
//! - `ReadNext` extends the event until the predicate, a flush pattern, a
//!   timeout or an error ends it
//! - `ReadFailed` hands out an error that was held back so the pending event
//!   could be emitted first

use super::Reader;
use crate::config::MultilineConfig;
use crate::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use regex::bytes::Regex;
use std::fmt;
use std::str::FromStr;

/// Flag added to events built from more than one line
pub const MULTILINE_FLAG: &str = "multiline";

/// Which line the pattern is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Test the previous line; a match means the current line continues it
    Before,
    /// Test the current line; a match means it continues the previous one
    After,
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "before" => Ok(MatchMode::Before),
            "after" => Ok(MatchMode::After),
            other => Err(Error::InvalidMatchMode(other.to_string())),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Before => write!(f, "before"),
            MatchMode::After => write!(f, "after"),
        }
    }
}

/// Continuation predicate over the previous and the current line
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: Regex,
    mode: MatchMode,
    negate: bool,
}

impl Matcher {
    /// Build a matcher
    pub fn new(pattern: Regex, mode: MatchMode, negate: bool) -> Self {
        Self { pattern, mode, negate }
    }

    /// Returns true if `current` belongs to the same event as `last`
    pub fn matches(&self, last: &[u8], current: &[u8]) -> bool {
        let line = match self.mode {
            MatchMode::Before => last,
            MatchMode::After => current,
        };
        self.pattern.is_match(line) != self.negate
    }
}

/// Compiled multiline settings
#[derive(Debug, Clone)]
pub struct MultilineRules {
    /// Continuation predicate
    pub matcher: Matcher,
    /// Lines matching this end the current event, inclusively
    pub flush: Option<Regex>,
    /// Maximum number of lines folded into one event, 0 for unlimited
    pub max_lines: usize,
}

impl MultilineRules {
    /// Compile the patterns in `config`
    pub fn from_config(config: &MultilineConfig) -> Result<Self> {
        if config.pattern.is_empty() {
            return Err(Error::Config("multiline pattern cannot be empty".to_string()));
        }

        let mode = config.match_mode.parse()?;
        let pattern = Regex::new(&config.pattern)?;
        let flush = config.flush_pattern.as_deref().map(Regex::new).transpose()?;

        Ok(Self {
            matcher: Matcher::new(pattern, mode, config.negate),
            flush,
            max_lines: config.max_lines,
        })
    }
}

enum State {
    ReadFirst,
    ReadNext,
    ReadFailed(Error),
}

/// Buffers the event being assembled
struct Accumulator {
    message: Message,
    num_lines: usize,
    last: BytesMut,
    separator: Vec<u8>,
    max_bytes: usize,
    max_lines: usize,
}

impl Accumulator {
    fn is_empty(&self) -> bool {
        self.message.bytes == 0
    }

    fn last(&self) -> &[u8] {
        &self.last
    }

    /// Start a new event with `line`
    fn load(&mut self, line: Message) {
        self.message.ts = line.ts;
        self.add_line(line);
    }

    /// Fold `line` into the event. Content beyond the byte or line caps is
    /// dropped, but its raw bytes are always counted.
    fn add_line(&mut self, line: Message) {
        if line.bytes == 0 {
            return;
        }

        let mut size = self.message.content.len();
        let add_separator = !self.separator.is_empty() && size > 0;
        if add_separator {
            size += self.separator.len();
        }

        let fits_bytes = self.max_bytes == 0 || size < self.max_bytes;
        let fits_lines = self.max_lines == 0 || self.num_lines < self.max_lines;
        if fits_bytes && fits_lines {
            let take = if self.max_bytes == 0 {
                line.content.len()
            } else {
                line.content.len().min(self.max_bytes - size)
            };
            if add_separator {
                self.message.content.extend_from_slice(&self.separator);
            }
            self.message.content.extend_from_slice(&line.content[..take]);
            self.num_lines += 1;
        }

        self.message.bytes += line.bytes;
        self.message.add_fields(&line.fields);
        self.last = line.content;
    }

    /// Take the assembled event, leaving the accumulator empty
    fn finalize(&mut self) -> Message {
        let mut event = std::mem::take(&mut self.message);
        if self.num_lines > 1 {
            event.add_flag(MULTILINE_FLAG);
        }
        self.clear();
        event
    }

    fn clear(&mut self) {
        self.message = Message::default();
        self.num_lines = 0;
        self.last.clear();
    }
}

/// Groups lines from the wrapped reader into multiline events
pub struct MultilineReader<R> {
    reader: R,
    matcher: Matcher,
    flush: Option<Regex>,
    acc: Accumulator,
    state: State,
}

impl<R: Reader> MultilineReader<R> {
    /// Group lines from `reader`, joining them with `separator` and keeping
    /// at most `max_bytes` of content per event
    pub fn new(reader: R, rules: MultilineRules, separator: &str, max_bytes: usize) -> Self {
        Self {
            reader,
            matcher: rules.matcher,
            flush: rules.flush,
            acc: Accumulator {
                message: Message::default(),
                num_lines: 0,
                last: BytesMut::new(),
                separator: separator.as_bytes().to_vec(),
                max_bytes,
                max_lines: rules.max_lines,
            },
            state: State::ReadFirst,
        }
    }

    async fn read_first(&mut self) -> Result<Message> {
        loop {
            let message = match self.reader.next().await {
                Ok(message) => message,
                Err(Error::Timeout) => continue,
                Err(err) => return Err(err),
            };

            if message.is_empty() {
                continue;
            }

            self.acc.clear();
            self.acc.load(message);
            return self.read_next().await;
        }
    }

    async fn read_next(&mut self) -> Result<Message> {
        loop {
            let message = match self.reader.next().await {
                Ok(message) => message,
                Err(Error::Timeout) => {
                    if self.acc.is_empty() {
                        continue;
                    }
                    self.state = State::ReadFirst;
                    return Ok(self.acc.finalize());
                }
                Err(err) => return self.on_error(err),
            };

            if self.flush.as_ref().is_some_and(|flush| flush.is_match(&message.content)) {
                self.acc.add_line(message);
                self.state = State::ReadFirst;
                return Ok(self.acc.finalize());
            }

            if !self.acc.is_empty() && !self.matcher.matches(self.acc.last(), &message.content) {
                let event = self.acc.finalize();
                self.acc.load(message);
                self.state = State::ReadNext;
                return Ok(event);
            }

            self.acc.add_line(message);
        }
    }

    /// Emit what is pending before an error is reported.
    ///
    /// Cancellation discards the pending event instead.
    fn on_error(&mut self, err: Error) -> Result<Message> {
        let (partial, cause) = err.into_parts();

        if matches!(cause, Error::Closed) {
            self.acc.clear();
            self.state = State::ReadFirst;
            return Err(cause);
        }

        let Some(line) = partial.filter(|line| !line.is_empty()) else {
            if self.acc.is_empty() {
                self.state = State::ReadFirst;
                return Err(cause);
            }
            self.state = State::ReadFailed(cause);
            return Ok(self.acc.finalize());
        };

        if self.acc.is_empty() || self.matcher.matches(self.acc.last(), &line.content) {
            if self.acc.is_empty() {
                self.acc.load(line);
            } else {
                self.acc.add_line(line);
            }
            self.state = State::ReadFailed(cause);
            return Ok(self.acc.finalize());
        }

        // The partial line starts a new event; the failure resurfaces on the next read
        let event = self.acc.finalize();
        self.acc.load(line);
        self.state = State::ReadNext;
        Ok(event)
    }
}

#[async_trait]
impl<R: Reader> Reader for MultilineReader<R> {
    async fn next(&mut self) -> Result<Message> {
        match std::mem::replace(&mut self.state, State::ReadFirst) {
            State::ReadFirst => self.read_first().await,
            State::ReadNext => self.read_next().await,
            State::ReadFailed(err) => {
                self.acc.clear();
                Err(err)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::testing::{line, ScriptReader};

    fn rules(pattern: &str, mode: &str, negate: bool) -> MultilineRules {
        MultilineRules::from_config(&MultilineConfig {
            pattern: pattern.to_string(),
            match_mode: mode.to_string(),
            negate,
            ..Default::default()
        })
        .unwrap()
    }

    async fn events<R: Reader>(reader: &mut MultilineReader<R>) -> Vec<(String, usize)> {
        let mut events = Vec::new();
        loop {
            match reader.next().await {
                Ok(message) => events.push((message.text().into_owned(), message.bytes)),
                Err(Error::Eof) => return events,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }

    #[test]
    fn test_match_mode_parsing() {
        assert_eq!("before".parse::<MatchMode>().unwrap(), MatchMode::Before);
        assert_eq!("after".parse::<MatchMode>().unwrap(), MatchMode::After);
        assert!(matches!("sideways".parse::<MatchMode>(), Err(Error::InvalidMatchMode(m)) if m == "sideways"));
    }

    #[test]
    fn test_rules_reject_bad_settings() {
        let base = MultilineConfig {
            pattern: "^ ".to_string(),
            ..Default::default()
        };

        let bad_regex = MultilineConfig {
            pattern: "([".to_string(),
            ..base.clone()
        };
        assert!(matches!(MultilineRules::from_config(&bad_regex), Err(Error::Regex(_))));

        let bad_flush = MultilineConfig {
            flush_pattern: Some("(".to_string()),
            ..base.clone()
        };
        assert!(matches!(MultilineRules::from_config(&bad_flush), Err(Error::Regex(_))));

        let empty = MultilineConfig {
            pattern: String::new(),
            ..base
        };
        assert!(matches!(MultilineRules::from_config(&empty), Err(Error::Config(_))));
    }

    #[test]
    fn test_matcher_modes() {
        let after = Matcher::new(Regex::new("^ ").unwrap(), MatchMode::After, false);
        assert!(after.matches(b"x", b" y"));
        assert!(!after.matches(b" x", b"y"));

        let before = Matcher::new(Regex::new(r"\\$").unwrap(), MatchMode::Before, false);
        assert!(before.matches(b"x \\", b"y"));
        assert!(!before.matches(b"x", b"y \\"));

        let negated = Matcher::new(Regex::new("^ ").unwrap(), MatchMode::After, true);
        assert!(negated.matches(b"x", b"y"));
    }

    #[tokio::test]
    async fn test_groups_continuation_lines() {
        let script = ScriptReader::lines(&["line1", "  line1.1", "  line1.2", "line2", "  line2.1"]);
        let mut reader = MultilineReader::new(script, rules("^[ \t]", "after", false), "\n", 0);

        let events = events(&mut reader).await;
        assert_eq!(
            events,
            vec![
                ("line1\n  line1.1\n  line1.2".to_string(), 6 + 10 + 10),
                ("line2\n  line2.1".to_string(), 6 + 10),
            ]
        );
    }

    #[tokio::test]
    async fn test_multiline_flag() {
        let script = ScriptReader::lines(&["a", " b", "c"]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        assert!(reader.next().await.unwrap().has_flag(MULTILINE_FLAG));
        // the final event is emitted together with end of file
        assert!(!reader.next().await.unwrap().has_flag(MULTILINE_FLAG));
        assert!(matches!(reader.next().await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn test_before_mode() {
        let script = ScriptReader::lines(&["one \\", "two \\", "three", "four"]);
        let mut reader = MultilineReader::new(script, rules(r"\\$", "before", false), "\n", 0);

        let events: Vec<String> = events(&mut reader).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(events, vec!["one \\\ntwo \\\nthree", "four"]);
    }

    #[tokio::test]
    async fn test_negate_with_flush_pattern() {
        let script = ScriptReader::lines(&["Start a", "x", "End", "Start b", "y", "Start c"]);
        let mut config = MultilineConfig {
            pattern: "^Start".to_string(),
            negate: true,
            match_mode: "after".to_string(),
            flush_pattern: Some("^End".to_string()),
            ..Default::default()
        };
        let mut reader = MultilineReader::new(script, MultilineRules::from_config(&config).unwrap(), "\n", 0);

        let events: Vec<String> = events(&mut reader).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(events, vec!["Start a\nx\nEnd", "Start b\ny", "Start c"]);

        config.flush_pattern = None;
        let script = ScriptReader::lines(&["Start a", "x", "End", "Start b"]);
        let mut reader = MultilineReader::new(script, MultilineRules::from_config(&config).unwrap(), "\n", 0);
        let events: Vec<String> = self::events(&mut reader).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(events, vec!["Start a\nx\nEnd", "Start b"]);
    }

    #[tokio::test]
    async fn test_flush_pattern_closes_delimited_records() {
        let script = ScriptReader::lines(&[
            "EventStart",
            "EventId: 1",
            "EventEnd",
            "OtherThingInBetween",
            "EventStart",
            "EventId: 2",
            "EventEnd",
        ]);
        let config = MultilineConfig {
            pattern: "EventStart".to_string(),
            negate: true,
            match_mode: "after".to_string(),
            flush_pattern: Some("EventEnd".to_string()),
            ..Default::default()
        };
        let mut reader = MultilineReader::new(script, MultilineRules::from_config(&config).unwrap(), "\n", 0);

        let events: Vec<String> = events(&mut reader).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            events,
            vec![
                "EventStart\nEventId: 1\nEventEnd",
                "OtherThingInBetween",
                "EventStart\nEventId: 2\nEventEnd",
            ]
        );
    }

    #[tokio::test]
    async fn test_max_lines_counts_all_bytes() {
        let script = ScriptReader::lines(&["a", " b", " c", " d", "e"]);
        let config = MultilineConfig {
            pattern: "^ ".to_string(),
            max_lines: 2,
            ..Default::default()
        };
        let mut reader = MultilineReader::new(script, MultilineRules::from_config(&config).unwrap(), "\n", 0);

        let events = events(&mut reader).await;
        assert_eq!(events[0], ("a\n b".to_string(), 2 + 3 + 3 + 3));
        assert_eq!(events[1], ("e".to_string(), 2));
    }

    #[tokio::test]
    async fn test_max_bytes_counts_all_bytes() {
        let script = ScriptReader::lines(&["abcdef", " ghijkl", " mnop"]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 10);

        let message = reader.next().await.unwrap();
        assert_eq!(&message.content[..], b"abcdef\n gh");
        assert_eq!(message.bytes, 7 + 8 + 6);
    }

    #[tokio::test]
    async fn test_skips_empty_messages_before_first_line() {
        let script = ScriptReader::new(vec![
            Ok(Message::default()),
            Err(Error::Timeout),
            Ok(line("first")),
        ]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        let events = events(&mut reader).await;
        assert_eq!(events, vec![("first".to_string(), 6)]);
    }

    #[tokio::test]
    async fn test_timeout_flushes_pending_event() {
        let script = ScriptReader::new(vec![
            Ok(line("first")),
            Ok(line(" cont")),
            Err(Error::Timeout),
            Ok(line(" orphan")),
        ]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        let events: Vec<String> = events(&mut reader).await.into_iter().map(|(t, _)| t).collect();
        assert_eq!(events, vec!["first\n cont", " orphan"]);
    }

    #[tokio::test]
    async fn test_error_held_until_event_emitted() {
        let script = ScriptReader::new(vec![Ok(line("first")), Ok(line(" cont")), Err(Error::Truncated)]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        let message = reader.next().await.unwrap();
        assert_eq!(&message.content[..], b"first\n cont");
        assert!(matches!(reader.next().await, Err(Error::Truncated)));
        // state was reset, so the reader carries on with the next read
        assert!(matches!(reader.next().await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn test_cancellation_discards_pending_event() {
        let script = ScriptReader::new(vec![Ok(line("head")), Ok(line(" cont")), Err(Error::Closed)]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        assert!(matches!(reader.next().await, Err(Error::Closed)));
        assert!(reader.acc.is_empty());
        assert!(matches!(reader.next().await, Err(Error::Eof)));
    }

    #[tokio::test]
    async fn test_cancellation_drops_partial_line() {
        let closed = Error::Partial {
            partial: Box::new(line(" tail")),
            source: Box::new(Error::Closed),
        };
        let script = ScriptReader::new(vec![Ok(line("head")), Err(closed)]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        assert!(matches!(reader.next().await, Err(Error::Closed)));
        assert!(reader.acc.is_empty());
    }

    #[tokio::test]
    async fn test_error_with_nothing_buffered() {
        let script = ScriptReader::new(vec![Err(Error::Inactive)]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        assert!(matches!(reader.next().await, Err(Error::Inactive)));
    }

    #[tokio::test]
    async fn test_partial_continuation_joins_event() {
        let partial = Error::Partial {
            partial: Box::new(line(" tail")),
            source: Box::new(Error::Removed),
        };
        let script = ScriptReader::new(vec![Ok(line("head")), Err(partial)]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        let message = reader.next().await.unwrap();
        assert_eq!(&message.content[..], b"head\n tail");
        assert_eq!(message.bytes, 5 + 6);
        assert!(matches!(reader.next().await, Err(Error::Removed)));
    }

    #[tokio::test]
    async fn test_partial_new_event_defers_error() {
        let partial = Error::Partial {
            partial: Box::new(line("next")),
            source: Box::new(Error::Removed),
        };
        let script = ScriptReader::new(vec![Ok(line("head")), Err(partial)]);
        let mut reader = MultilineReader::new(script, rules("^ ", "after", false), "\n", 0);

        assert_eq!(&reader.next().await.unwrap().content[..], b"head");
        // the partial line waits for its continuation; the script then reports eof
        assert_eq!(&reader.next().await.unwrap().content[..], b"next");
        assert!(matches!(reader.next().await, Err(Error::Eof)));
    }
}
