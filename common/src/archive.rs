use std::fs::File;
use std::io;
use std::path::{Component, Path};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::Error;

/// Checks that the file at `path` parses as a well-formed zip archive.
pub fn verify(path: &Path) -> Result<(), Error> {
    ZipArchive::new(File::open(path)?)?;
    Ok(())
}

/// Extracts a support bundle archive into `destination`, refusing
/// entries that would escape it.
pub fn unzip(bundle_zip: &Path, destination: &Path) -> Result<(), Error> {
    let mut archive = ZipArchive::new(File::open(bundle_zip)?)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::GenericError(format!("invalid dest path {}", entry.name())))?;
        let dest_path = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut dest_file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut dest_file)?;
        }
    }
    Ok(())
}

/// Zips `parent/dir_name` into `out_file`. Entry names are prefixed with
/// `dir_name/`, matching an archive produced from inside `parent`, which
/// is the layout bundle consumers expect.
pub fn zip_directory(parent: &Path, dir_name: &str, out_file: &Path) -> Result<(), Error> {
    let src = parent.join(dir_name);
    let file = File::create(out_file)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(&src).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::GenericError(format!("walking {}: {}", src.display(), e)))?;
        let path = entry.path();
        let relative = path
            .strip_prefix(parent)
            .map_err(|e| Error::GenericError(e.to_string()))?;
        let name = zip_entry_name(relative);
        if name.is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut src_file = File::open(path)?;
            io::copy(&mut src_file, &mut zip)?;
        }
    }
    zip.finish()?;
    Ok(())
}

// Zip entries always use forward slashes, regardless of platform.
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zips_and_unzips_a_directory_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("bundle");
        std::fs::create_dir_all(root.join("logs/demo/pod")).unwrap();
        std::fs::write(root.join("metadata.yaml"), "projectName: test\n").unwrap();
        std::fs::write(root.join("logs/demo/pod/app.log"), "line\n").unwrap();

        let out = tmp.path().join("bundle.zip");
        zip_directory(tmp.path(), "bundle", &out).unwrap();
        verify(&out).unwrap();

        let dest = tmp.path().join("extracted");
        unzip(&out, &dest).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("bundle/metadata.yaml")).unwrap(),
            "projectName: test\n"
        );
        assert_eq!(
            std::fs::read_to_string(dest.join("bundle/logs/demo/pod/app.log")).unwrap(),
            "line\n"
        );
    }

    #[test]
    fn verify_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("not-a.zip");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"certainly not pkzip").unwrap();
        assert!(verify(&path).is_err());
    }

    #[test]
    fn entry_names_use_forward_slashes() {
        let name = zip_entry_name(Path::new("bundle/logs/app.log"));
        assert_eq!(name, "bundle/logs/app.log");
    }
}
