use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct MoasConfig {
    /// Directory the output documents and the log file are written to
    pub output_dir: PathBuf,

    /// Maximum number of files ingested in parallel (default: one per file)
    pub max_workers: Option<usize>,

    /// Fail the run on RIB entries referring to unknown peer indices
    pub strict_peer_index: bool,
}

const EMPTY_CONFIG: &str = r#"### moas-detector configuration file

### directory for moasIPv4.json, moasIPv6.json, statistics.json and log.txt
# output_dir = "."

### maximum number of files processed in parallel (default: one per file)
# max_workers = 8

### fail when a RIB entry refers to a peer missing from the peer table
# strict_peer_index = false
"#;

impl Default for MoasConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_workers: None,
            strict_peer_index: false,
        }
    }
}

impl MoasConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<MoasConfig> {
        let mut builder = Config::builder();

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    builder = builder.add_source(config::File::from(path));
                } else {
                    std::fs::write(path, EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file {}: {}", p, e))?;
                }
            }
            None => {
                // By default use $HOME/.moas-detector.toml when present
                if let Some(default_path) = Self::config_file_path() {
                    if default_path.exists() {
                        builder = builder.add_source(config::File::from(default_path.as_path()));
                    }
                }
            }
        }

        // Add in settings from the environment (with a prefix of MOAS)
        // E.g., `MOAS_OUTPUT_DIR=/tmp/moas ./moas-detector` would set the output directory
        builder = builder.add_source(config::Environment::with_prefix("MOAS"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config)
    }

    fn from_map(config: &HashMap<String, String>) -> Result<MoasConfig> {
        let output_dir = config
            .get("output_dir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let max_workers = match config.get("max_workers") {
            Some(s) => match s.parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(anyhow!(
                        "max_workers must be a positive integer, got '{}'",
                        s
                    ))
                }
                Ok(n) => Some(n),
            },
            None => None,
        };

        let strict_peer_index = match config.get("strict_peer_index") {
            Some(s) => s
                .parse::<bool>()
                .map_err(|_| anyhow!("strict_peer_index must be true or false, got '{}'", s))?,
            None => false,
        };

        Ok(MoasConfig {
            output_dir,
            max_workers,
            strict_peer_index,
        })
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let max_workers = self
            .max_workers
            .map(|n| n.to_string())
            .unwrap_or_else(|| "one per file".to_string());
        [
            format!("Output Directory:   {}", self.output_dir.display()),
            format!("Max Workers:        {}", max_workers),
            format!("Strict Peer Index:  {}", self.strict_peer_index),
        ]
        .join("\n")
    }

    /// Get the default config file path
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".moas-detector.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MoasConfig::default();
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.max_workers, None);
        assert!(!config.strict_peer_index);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moas.toml");
        std::fs::write(
            &path,
            "output_dir = \"/tmp/moas\"\nmax_workers = 4\nstrict_peer_index = true\n",
        )
        .unwrap();

        let config = MoasConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/moas"));
        assert_eq!(config.max_workers, Some(4));
        assert!(config.strict_peer_index);
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.toml");

        let config = MoasConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("."));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("# max_workers"));
    }

    #[test]
    fn test_invalid_values() {
        let map = HashMap::from([("max_workers".to_string(), "0".to_string())]);
        assert!(MoasConfig::from_map(&map).is_err());
        let map = HashMap::from([("max_workers".to_string(), "many".to_string())]);
        assert!(MoasConfig::from_map(&map).is_err());
        let map = HashMap::from([("strict_peer_index".to_string(), "yes".to_string())]);
        assert!(MoasConfig::from_map(&map).is_err());
    }

    #[test]
    fn test_summary() {
        let config = MoasConfig {
            max_workers: Some(8),
            ..Default::default()
        };
        let summary = config.summary();
        assert!(summary.contains("Max Workers:        8"));
        assert!(summary.contains("Strict Peer Index:  false"));
    }
}
