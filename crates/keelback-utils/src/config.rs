// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Trait for loading configuration from a YAML file.
pub trait LoadConfig: DeserializeOwned {
    /// Load the configuration from a YAML file located at the provided path.
    fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "reading config from file");

        let reader = std::fs::File::open(path)
            .with_context(|| format!("unable to load config from {}", path.display()))?;
        Ok(serde_yaml::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Eq, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        retries: u32,
    }

    impl LoadConfig for Sample {}

    #[test]
    fn loads_yaml_with_defaults() -> keelback_test_utils::Result {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "name: nightly")?;
        let sample = Sample::load(file.path())?;
        assert_eq!(
            sample,
            Sample {
                name: "nightly".to_owned(),
                retries: 0
            }
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Sample::load("/definitely/not/a/config.yaml").is_err());
    }
}
