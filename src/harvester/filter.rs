//! include_lines / exclude_lines filtering

use crate::config::HarvesterConfig;
use crate::Result;
use regex::bytes::Regex;

/// Decides which events are published
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl LineFilter {
    /// Compile the patterns of `config`, failing on the first invalid one
    pub fn from_config(config: &HarvesterConfig) -> Result<Self> {
        Ok(Self {
            include: compile(&config.include_lines)?,
            exclude: compile(&config.exclude_lines)?,
        })
    }

    /// Returns true when no pattern is configured
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Returns false for content missing every include pattern or matching
    /// any exclude pattern
    pub fn accepts(&self, content: &[u8]) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(content)) {
            return false;
        }
        !self.exclude.iter().any(|re| re.is_match(content))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).map_err(Into::into))
        .collect()
}
