//! Source reference validation applied before admission

use regex::Regex;
use url::Url;

use crate::config::SourceConfig;
use crate::error::{Error, Result};

/// Compiled accepted-locator pattern set
#[derive(Clone, Debug)]
pub struct SourceValidator {
    patterns: Vec<Regex>,
    max_length: usize,
}

impl SourceValidator {
    /// Compile the configured patterns
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first pattern that fails to compile.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    Error::config(
                        "sources.patterns",
                        format!("invalid pattern {:?}: {}", pattern, e),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            max_length: config.max_length,
        })
    }

    /// Validate a raw source reference and return its normalized (trimmed) form
    ///
    /// A source is accepted when it is a well-formed http(s) URL with a host,
    /// fits in the configured length, and matches at least one pattern.
    pub fn validate(&self, raw: &str) -> Result<String> {
        let source = raw.trim();
        let reject = |reason: &str| Error::InvalidSource {
            source_ref: source.to_string(),
            reason: reason.to_string(),
        };

        if source.is_empty() {
            return Err(reject("source is empty"));
        }
        if source.len() > self.max_length {
            return Err(reject("source is too long"));
        }

        let url = Url::parse(source).map_err(|e| reject(&format!("not a valid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(reject("only http and https URLs are supported"));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(reject("URL has no host"));
        }

        if !self.patterns.iter().any(|p| p.is_match(source)) {
            return Err(reject("not a supported video URL"));
        }

        Ok(source.to_string())
    }
}
