use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kinds of side effect a tool can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    FsRead,
    FsWrite,
    Exec,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FsRead => "fs_read",
            Self::FsWrite => "fs_write",
            Self::Exec => "exec",
        })
    }
}

/// One concrete side effect, checked before it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityRequest {
    /// Read a file or list a directory at an absolute path.
    Read(PathBuf),
    /// Create or overwrite a file at an absolute path.
    Write(PathBuf),
    /// Spawn a program; holds the full command line.
    Exec(String),
}

impl CapabilityRequest {
    pub fn read(path: impl Into<PathBuf>) -> Self {
        Self::Read(path.into())
    }

    pub fn write(path: impl Into<PathBuf>) -> Self {
        Self::Write(path.into())
    }

    pub fn exec(command_line: impl Into<String>) -> Self {
        Self::Exec(command_line.into())
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Read(_) => CapabilityKind::FsRead,
            Self::Write(_) => CapabilityKind::FsWrite,
            Self::Exec(_) => CapabilityKind::Exec,
        }
    }

    /// Target path for filesystem requests.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read(path) | Self::Write(path) => Some(path),
            Self::Exec(_) => None,
        }
    }
}

impl fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(path) => write!(f, "read {}", path.display()),
            Self::Write(path) => write!(f, "write {}", path.display()),
            Self::Exec(line) => write!(f, "exec `{line}`"),
        }
    }
}
