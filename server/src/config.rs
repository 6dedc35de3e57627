//! Recorder configuration consumed from the server's settings

use std::path::{Path, PathBuf};

pub const DEFAULT_DEMO_EXTENSION: &str = ".wdz20";
pub const DEFAULT_RACE_PURGE_MAX: usize = 10;

/// Settings the demo recorder reads from the hosting server
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Filesystem directory that relative demo paths are resolved against
    pub base_dir: PathBuf,
    /// Operator-configured subdirectory below `demos/server`, may be empty
    pub demo_subdir: String,
    pub max_clients: usize,
    /// Demo file extension including the leading dot
    pub demo_extension: String,
    /// Race demos kept per map after each committed race demo, 0 keeps all
    pub race_purge_max: usize,
    pub max_auto_demos: usize,
    pub autorecord: bool,
}

impl DemoConfig {
    pub fn new(base_dir: impl Into<PathBuf>, max_clients: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            demo_subdir: String::new(),
            max_clients,
            demo_extension: DEFAULT_DEMO_EXTENSION.to_string(),
            race_purge_max: DEFAULT_RACE_PURGE_MAX,
            max_auto_demos: 0,
            autorecord: false,
        }
    }

    /// Relative demo root: `demos/server[/<subdir>]`
    pub fn demo_dir(&self) -> String {
        if self.demo_subdir.is_empty() {
            "demos/server".to_string()
        } else {
            format!("demos/server/{}", self.demo_subdir)
        }
    }

    /// Relative folder holding the race demos of one map
    pub fn map_dir(&self, mapname: &str) -> String {
        format!("{}/{}", self.demo_dir(), mapname)
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.base_dir.join(Path::new(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_dir_without_subdir() {
        let config = DemoConfig::new("/srv/game", 8);
        assert_eq!(config.demo_dir(), "demos/server");
        assert_eq!(config.map_dir("wdm1"), "demos/server/wdm1");
    }

    #[test]
    fn test_demo_dir_with_subdir() {
        let mut config = DemoConfig::new("/srv/game", 8);
        config.demo_subdir = "cup".to_string();
        assert_eq!(config.demo_dir(), "demos/server/cup");
        assert_eq!(
            config.resolve("demos/server/cup/a.wdz20"),
            PathBuf::from("/srv/game/demos/server/cup/a.wdz20")
        );
    }
}
