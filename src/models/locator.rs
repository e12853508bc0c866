use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to an object in the document store.
///
/// Messages and stage maps carry locators, never payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `s3://bucket/key` form used in review documents
    pub fn url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    /// Parse the `s3://bucket/key` form
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("s3://")?;
        let (bucket, key) = rest.split_once('/')?;
        let locator = Self::new(bucket, key);
        locator.validate().ok().map(|_| locator)
    }

    /// Final path segment without its extension, e.g. `acquire/001.png` -> `001`
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.key.rsplit('/').next()?;
        let stem = name.split('.').next()?;
        (!stem.is_empty()).then_some(stem)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.trim().is_empty() {
            return Err("locator bucket is empty".to_string());
        }
        if self.key.trim().is_empty() {
            return Err("locator key is empty".to_string());
        }
        if self.key.starts_with('/') {
            return Err(format!("locator key must be relative: {}", self.key));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parse() {
        let locator = ObjectLocator::parse("s3://docs/acquire/001.png").unwrap();
        assert_eq!(locator.bucket, "docs");
        assert_eq!(locator.key, "acquire/001.png");
        assert_eq!(locator.url(), "s3://docs/acquire/001.png");
        assert!(ObjectLocator::parse("https://docs/key").is_none());
        assert!(ObjectLocator::parse("s3://docs/").is_none());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(
            ObjectLocator::new("b", "acquire/inv-42.pdf").file_stem(),
            Some("inv-42")
        );
        assert_eq!(ObjectLocator::new("b", "acquire/").file_stem(), None);
    }
}
