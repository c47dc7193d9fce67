use std::fmt;

use thiserror::Error;

use crate::ServerName;

/// A pattern could not be compiled into a [`Matcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{pattern}' is not a valid server name pattern")]
pub struct PatternError {
    pub pattern: String,
}

/// Matches a server name pattern against an incoming request's server name.
///
/// Supported shapes are `*` (catch-all), `*.*`, `<prefix>.*`, `*.<suffix>`,
/// `*.<middle>.*` and exact domain names. Matching produces a score: zero
/// means no match, longer literal matches outrank shorter ones, and an exact
/// match outranks every wildcard match.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: String,
    wild_prefix: bool,
    wild_suffix: bool,
    fixed_part: String,
}

impl Matcher {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern == "*" {
            return Ok(Matcher {
                pattern: pattern.to_string(),
                wild_prefix: true,
                wild_suffix: true,
                fixed_part: String::new(),
            });
        } else if pattern == "*.*" {
            return Ok(Matcher {
                pattern: pattern.to_string(),
                wild_prefix: true,
                wild_suffix: true,
                fixed_part: ".".to_string(),
            });
        }

        let lowered = pattern.to_lowercase();
        let wild_prefix = lowered.starts_with("*.");
        let wild_suffix = lowered.ends_with(".*");

        // The fixed part keeps the dots adjacent to the wildcards; the bare
        // domain fragment between them must parse as a server name.
        let mut fixed_part = lowered.clone();
        let mut domain_part = lowered.as_str();

        if wild_prefix {
            fixed_part.remove(0);
            domain_part = &domain_part[2..];
        }

        if wild_suffix {
            fixed_part.pop();
            domain_part = &domain_part[..domain_part.len() - 2];
        }

        if ServerName::parse(domain_part).is_err() {
            return Err(PatternError {
                pattern: domain_part.to_string(),
            });
        }

        Ok(Matcher {
            pattern: pattern.to_string(),
            wild_prefix,
            wild_suffix,
            fixed_part,
        })
    }

    /// The pattern this matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Score the pattern against a server name.
    ///
    /// Returns zero when the pattern does not match. Wildcard matches score
    /// `1 + len(fixed_part)`; an exact match scores `i32::MAX` so that it
    /// outranks any wildcard match of the same length.
    pub fn score(&self, server_name: &ServerName) -> i32 {
        let wildcard_score = 1 + self.fixed_part.len() as i32;

        if self.wild_prefix && self.wild_suffix {
            if server_name.unicode.contains(&self.fixed_part) {
                return wildcard_score;
            }
        } else if self.wild_prefix {
            if server_name.unicode.ends_with(&self.fixed_part) {
                return wildcard_score;
            }
        } else if self.wild_suffix {
            if server_name.unicode.starts_with(&self.fixed_part) {
                return wildcard_score;
            }
        } else if server_name.unicode == self.fixed_part {
            return i32::MAX;
        }

        0
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}
