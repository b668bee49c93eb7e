//! Policy store configuration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the policy forest lives and how it is written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the root document and every sub-document
    pub root: PathBuf,
    /// Root document name (`<root>/<name>.json`)
    pub name: String,
    /// Quiescence delay before a dirty forest is written
    #[serde(with = "duration_ms")]
    pub write_delay: Duration,
    /// Named values guards can read with `param("id")`
    pub parameters: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("policies"),
            name: "policy".to_owned(),
            write_delay: Duration::from_millis(50), // coalesce bursts of learning
            parameters: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Path of the root document.
    pub fn root_file(&self) -> PathBuf {
        self.root.join(format!("{}.json", self.name))
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
