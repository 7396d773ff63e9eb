//! Plain-text sample and parameter files.
//!
//! - [`samples`]: whitespace-separated sample rows, token validation and the
//!   dataset manifest that lists one sample file per class.
//! - [`sigfile`]: the parameter file holding a trained [`SignatureSet`].
//!
//! Writers never leave a truncated file behind: output goes to a sibling
//! temporary file that is renamed over the target once fully written.
//!
//! [`SignatureSet`]: crate::signature::SignatureSet

pub mod samples;
pub mod sigfile;

pub use samples::{
    is_numeric_token, parse_number, parse_row, read_manifest, read_samples, trim_invalid_tokens,
    write_samples, RejectedRow, SampleFile,
};
pub use sigfile::{
    format_signature_set, parse_signature_set, read_signature_set, write_signature_set,
};

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Read a whole file as UTF-8.
pub(crate) fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Write `contents` to `path` through a temporary sibling + rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = temp_sibling(path);
    let result = (|| -> std::io::Result<()> {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(path, e));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, "first\n").unwrap();
        write_atomic(&path, "second\n").unwrap();
        assert_eq!(read_text(&path).unwrap(), "second\n");

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn atomic_write_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.txt");
        let err = write_atomic(&path, "x").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_text(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
