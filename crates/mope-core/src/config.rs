//! Tree configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Height difference between siblings tolerated before a local rebuild
pub const DEFAULT_BALANCE_THRESHOLD: u32 = 5;

/// Server-side tree parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Rebuild a subtree once `|height(left) - height(right)|` exceeds this
    #[serde(default = "default_balance_threshold")]
    pub balance_threshold: u32,
}

fn default_balance_threshold() -> u32 {
    DEFAULT_BALANCE_THRESHOLD
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            balance_threshold: DEFAULT_BALANCE_THRESHOLD,
        }
    }
}

impl TreeConfig {
    pub fn with_balance_threshold(balance_threshold: u32) -> Result<Self> {
        let config = Self { balance_threshold };
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// A zero threshold demands perfect balance, which two nodes cannot meet
    pub fn validate(&self) -> Result<()> {
        if self.balance_threshold == 0 {
            return Err(Error::InvalidConfig(
                "balance_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_threshold() {
        assert_eq!(TreeConfig::default().balance_threshold, 5);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(matches!(
            TreeConfig::with_balance_threshold(0),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(TreeConfig::with_balance_threshold(2).unwrap().balance_threshold, 2);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"balance_threshold": 3}}"#).unwrap();
        assert_eq!(TreeConfig::load(file.path()).unwrap().balance_threshold, 3);

        let mut empty = tempfile::NamedTempFile::new().unwrap();
        write!(empty, "{{}}").unwrap();
        assert_eq!(TreeConfig::load(empty.path()).unwrap(), TreeConfig::default());
    }
}
