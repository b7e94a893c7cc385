//! pid 文件读写。

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("pid file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pid in {path}: {value:?}")]
    Invalid { path: String, value: String },
}

/// 已写入的 pid 文件，释放时删除。
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// 写入当前进程 pid。
    pub fn create(path: &Path) -> Result<Self, PidFileError> {
        let pid = std::process::id();
        fs::write(path, pid.to_string()).map_err(|source| PidFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(target: "mfx.app", pid, path = %path.display(), "pidfile_written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        info!(target: "mfx.app", path = %self.path.display(), "pidfile_removed");
        let _ = fs::remove_file(&self.path);
    }
}

/// 读取 pid 文件中的进程号。
///
/// 只接受正数：0 与负数在 kill(2) 中表示进程组或全部进程。
pub fn read_pid(path: &Path) -> Result<i32, PidFileError> {
    let raw = fs::read_to_string(path).map_err(|source| PidFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let value = raw.trim();
    match value.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(PidFileError::Invalid {
            path: path.display().to_string(),
            value: value.to_string(),
        }),
    }
}
