use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tar::Archive;

/// Unpack a gzip tarball into `dest`.
pub(crate) fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let mut archive_reader = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive_reader
        .unpack(dest)
        .with_context(|| format!("extract {} to {}", archive.display(), dest.display()))?;
    Ok(())
}

/// Find `name` at the extraction root or one level below it.
///
/// Children are visited in file-name order so the first match does not
/// depend on filesystem enumeration order.
pub(crate) fn locate_binary(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let direct = root.join(name);
    if direct.is_file() {
        return Ok(Some(direct));
    }

    let mut entries = fs::read_dir(root)
        .with_context(|| format!("read {}", root.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read {}", root.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            let candidate = path.join(name);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        } else if entry.file_name() == name {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
