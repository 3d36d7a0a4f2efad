//! Canonical on-disk layout under the llmchain base directory.

use std::path::PathBuf;

/// Environment variable that overrides the base directory.
pub const HOME_ENV: &str = "LLMCHAIN_HOME";

/// All canonical paths for a base directory.
///
/// ```text
/// <base>/config.toml
/// <base>/chains/<chain>.json
/// <base>/prompts/<key>.txt
/// <base>/state/<chain>/...
/// <base>/logs/<chain>/...
/// ```
#[derive(Debug, Clone)]
pub struct ChainPaths {
    pub base: PathBuf,
    pub config_path: PathBuf,
    pub chains_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ChainPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            config_path: base.join("config.toml"),
            chains_dir: base.join("chains"),
            prompts_dir: base.join("prompts"),
            state_dir: base.join("state"),
            logs_dir: base.join("logs"),
            base,
        }
    }

    pub fn chain_path(&self, chain: &str) -> PathBuf {
        self.chains_dir.join(format!("{chain}.json"))
    }

    pub fn chain_logs_dir(&self, chain: &str) -> PathBuf {
        self.logs_dir.join(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn paths_are_stable() {
        let paths = ChainPaths::new("/work");
        assert_eq!(paths.config_path, Path::new("/work/config.toml"));
        assert_eq!(paths.chain_path("demo"), Path::new("/work/chains/demo.json"));
        assert_eq!(paths.state_dir, Path::new("/work/state"));
        assert_eq!(paths.chain_logs_dir("demo"), Path::new("/work/logs/demo"));
    }
}
