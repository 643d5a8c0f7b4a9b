//! Ahead-of-time output images
//!
//! A program that terminates normally is run once with its output
//! captured; the output is then baked into a static executable that
//! prints it again without any runtime:
//!
//! ```text
//! source → VM (captured stdout) → ELF image → PATH
//! ```

mod elf;

pub use elf::{image, BASE, CODE_OFFSET, DATA_OFFSET};

use std::path::Path;

use thiserror::Error;
use tracing::info;

/// Errors that can occur while writing an image
#[derive(Debug, Error)]
pub enum AotError {
    /// I/O error
    #[error("cannot write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type AotResult<T> = Result<T, AotError>;

/// Write an image replaying `output` to `path` and mark it executable
pub fn write_image(path: &Path, output: &[u8]) -> AotResult<()> {
    let io = |source| AotError::Io {
        path: path.display().to_string(),
        source,
    };
    let bytes = image(output);
    std::fs::write(path, &bytes).map_err(io)?;
    set_executable(path).map_err(io)?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote ELF image");
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_an_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        write_image(&path, b"3\n").unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, image(b"3\n"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn missing_directories_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/out");
        let err = write_image(&path, b"").unwrap_err();
        assert!(err.to_string().starts_with("cannot write "));
    }
}
