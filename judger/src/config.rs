use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Host-side configuration of the judger, loadable from a TOML file and
/// overridable from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgerConfig {
    /// Root for per-run working directories.
    pub tmp_dir: PathBuf,
    /// Directory containing `<language>.yaml` definition records.
    pub language_dir: PathBuf,
    /// Mirror configuration handed to the sandbox-root overlay helper.
    pub mirror_fs_config: PathBuf,
    /// Path of the sandbox binary.
    pub sandbox_bin: PathBuf,
    /// Path of the sandbox-root overlay helper.
    pub mirror_fs_bin: PathBuf,
    /// Number of concurrent judging workers.
    pub max_workers: usize,
    /// Optional `host:port` of the UDP status sink.
    pub status_host: Option<String>,
}

impl Default for JudgerConfig {
    fn default() -> Self {
        JudgerConfig {
            tmp_dir: std::env::temp_dir(),
            language_dir: "/language".into(),
            mirror_fs_config: "/.mirrorfs.conf".into(),
            sandbox_bin: "/usr/local/bin/lrun".into(),
            mirror_fs_bin: "/usr/local/bin/lrun-mirrorfs".into(),
            max_workers: 1,
            status_host: None,
        }
    }
}

impl JudgerConfig {
    pub fn load(path: &Path) -> anyhow::Result<JudgerConfig> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
