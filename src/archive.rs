//! Zipping a database folder and restoring archived copies, including
//! archives that contain nested zips.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DataBaseDicom;
use crate::error::{Error, Result};

/// Archive a database folder into a zip file.
pub fn archive(folder: &Path, zip_path: &Path) -> Result<()> {
    let file = fs::File::create(zip_path)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0usize;
    for item in WalkDir::new(folder) {
        let item = item.map_err(|e| Error::dicom(format!("archive scan failed: {e}")))?;
        if !item.file_type().is_file() {
            continue;
        }
        let path = item.path();
        let name = path
            .strip_prefix(folder)
            .map_err(|_| Error::config(format!("{} escapes the folder", path.display())))?;
        let name = name.to_string_lossy().replace('\\', "/");
        writer.start_file(name, options)?;
        let bytes = fs::read(path)?;
        writer.write_all(&bytes)?;
        count += 1;
    }
    writer.finish()?;
    tracing::info!(archive = %zip_path.display(), files = count, "archived folder");
    Ok(())
}

/// Extract an archive into a folder and open it as a database. Zip files
/// found inside the archive are extracted in place as well.
pub fn restore(zip_path: &Path, folder: &Path) -> Result<DataBaseDicom> {
    fs::create_dir_all(folder)?;
    let bytes = fs::read(zip_path)?;
    extract(&bytes, folder)?;

    // Nested archives: extract each one next to itself, then drop it
    loop {
        let mut nested = Vec::new();
        for item in WalkDir::new(folder).into_iter().flatten() {
            if !item.file_type().is_file() {
                continue;
            }
            let path = item.path();
            if path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
            {
                nested.push(path.to_path_buf());
            }
        }
        if nested.is_empty() {
            break;
        }
        for path in nested {
            let bytes = fs::read(&path)?;
            let dest = path.with_extension("");
            extract(&bytes, &dest)?;
            fs::remove_file(&path)?;
            tracing::debug!(archive = %path.display(), "extracted nested archive");
        }
    }

    DataBaseDicom::open(folder)
}

fn extract(bytes: &[u8], dest: &Path) -> Result<()> {
    let reader = std::io::Cursor::new(bytes);
    let mut zip = ZipArchive::new(reader)?;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let outpath = dest.join(file.mangled_name());
        if file.name().ends_with('/') {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)?;
            fs::write(&outpath, bytes)?;
        }
    }
    Ok(())
}
