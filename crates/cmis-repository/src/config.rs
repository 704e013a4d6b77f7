use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much mapping metadata is purged when a remote entity is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteDepth {
    /// Never delete mapping rows
    #[default]
    None,
    /// Delete only the deleted entity's own rows
    Shallow,
    /// Delete rows for the entity and everything below it
    Deep,
}

impl fmt::Display for DeleteDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeleteDepth::None => "none",
            DeleteDepth::Shallow => "shallow",
            DeleteDepth::Deep => "deep",
        };
        f.write_str(name)
    }
}

impl FromStr for DeleteDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(DeleteDepth::None),
            "shallow" | "1" => Ok(DeleteDepth::Shallow),
            "deep" | "-1" => Ok(DeleteDepth::Deep),
            other => Err(format!(
                "Invalid delete depth '{}', expected none, shallow or deep",
                other
            )),
        }
    }
}

/// Configuration of one adapter instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Owning repository id written to every mapping row
    #[serde(default)]
    pub repository_id: i64,
    #[serde(default)]
    pub delete_depth: DeleteDepth,
}

impl RepositoryConfig {
    pub fn new(repository_id: i64) -> Self {
        Self {
            repository_id,
            delete_depth: DeleteDepth::default(),
        }
    }

    pub fn with_delete_depth(mut self, delete_depth: DeleteDepth) -> Self {
        self.delete_depth = delete_depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delete_depth() {
        assert_eq!("none".parse::<DeleteDepth>(), Ok(DeleteDepth::None));
        assert_eq!("Shallow".parse::<DeleteDepth>(), Ok(DeleteDepth::Shallow));
        assert_eq!("-1".parse::<DeleteDepth>(), Ok(DeleteDepth::Deep));
        assert!("everything".parse::<DeleteDepth>().is_err());
        assert_eq!(DeleteDepth::Deep.to_string(), "deep");
    }

    #[test]
    fn test_config_defaults() {
        let config: RepositoryConfig = serde_json::from_str(r#"{"repository_id": 42}"#).unwrap();
        assert_eq!(config.repository_id, 42);
        assert_eq!(config.delete_depth, DeleteDepth::None);

        let config: RepositoryConfig =
            serde_json::from_str(r#"{"repository_id": 7, "delete_depth": "deep"}"#).unwrap();
        assert_eq!(config, RepositoryConfig::new(7).with_delete_depth(DeleteDepth::Deep));
    }
}
