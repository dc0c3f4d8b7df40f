//! Path prefix normalization and matching shared by mounts, the API and the shutdown path.

use crate::error::ConfigurationError;

/// A validated URL path prefix.
///
/// Stored without a trailing slash; the root prefix `/` is stored as `""` so
/// that it matches every path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPrefix(String);

impl PathPrefix {
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidPathPrefix`] unless `prefix` is `/`
    /// or starts with `/`, does not end with `/`, and contains no empty segment.
    pub fn parse(prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix == "/" {
            return Ok(Self(String::new()));
        }
        let valid = prefix.starts_with('/')
            && !prefix.ends_with('/')
            && !prefix.contains("//")
            && !prefix.chars().any(|c| c.is_whitespace() || c == '?' || c == '#');
        if valid {
            Ok(Self(prefix.to_string()))
        } else {
            Err(ConfigurationError::InvalidPathPrefix(prefix.to_string()))
        }
    }

    /// The prefix as configured (`/` for the root prefix).
    #[must_use]
    pub fn as_str(&self) -> &str {
        if self.0.is_empty() {
            "/"
        } else {
            &self.0
        }
    }

    /// Number of bytes matched; used for longest-prefix-first ordering.
    #[must_use]
    pub fn match_len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the remainder of `path` below this prefix, always starting with `/`.
    ///
    /// `/winery` matches `/winery`, `/winery/` and `/winery/x`, but not `/winery-x`.
    #[must_use]
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.0.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Joins a `/`-leading path below this prefix.
    #[must_use]
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

impl std::fmt::Display for PathPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
