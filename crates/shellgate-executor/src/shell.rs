//! Command interpreter detection and small path helpers.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Interpreter invocation used for every command: `program flag <command>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: PathBuf,
    pub flag: &'static str,
}

impl ShellCommand {
    /// Detect the interpreter for the current platform.
    ///
    /// - Windows: `cmd /C`
    /// - Unix-like: `$SHELL -c` when it points at a file, else `sh -c`
    #[must_use]
    pub fn detect() -> Self {
        if cfg!(windows) {
            Self {
                program: PathBuf::from("cmd"),
                flag: "/C",
            }
        } else {
            Self {
                program: UnixShell::current_shell().path().to_path_buf(),
                flag: "-c",
            }
        }
    }

    /// Use a specific interpreter.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, flag: &'static str) -> Self {
        Self {
            program: program.into(),
            flag,
        }
    }
}

impl Default for ShellCommand {
    fn default() -> Self {
        Self::detect()
    }
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Get the current shell from `$SHELL`, falling back to `sh` on `PATH`.
    #[must_use]
    pub fn current_shell() -> Self {
        if let Ok(shell) = std::env::var("SHELL") {
            if let Some(shell) = Self::from_path(Path::new(&shell)) {
                return shell;
            }
        }
        let sh = which::which("sh").unwrap_or_else(|_| PathBuf::from("/bin/sh"));
        Self::Sh(sh)
    }

    /// Create from an absolute path to an existing file.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        let shell = match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(path_buf),
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        };
        Some(shell)
    }
}

/// Name of the OS account running this process.
#[must_use]
pub fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Expand a leading `~` to the home directory.
///
/// Paths like `~user` are returned unchanged.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(path);
    };
    if path == "~" {
        home
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}
