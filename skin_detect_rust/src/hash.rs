use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::Path;

fn update_from_file(path: &Path, hasher: &mut blake3::Hasher) -> Result<()> {
    let f = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    hasher.update_reader(f)?;
    Ok(())
}

fn update_from_dir(dir: &Path, hasher: &mut blake3::Hasher) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.path().to_string_lossy().to_lowercase());
    for entry in entries {
        let path = entry.path();
        hasher.update(entry.file_name().to_string_lossy().as_bytes());
        if path.is_file() {
            update_from_file(&path, hasher)?;
        } else if path.is_dir() {
            update_from_dir(&path, hasher)?;
        }
    }
    Ok(())
}

/// Digest of a directory tree: changes with file names, contents or count.
pub fn hash_dir(dir: &Path) -> Result<String> {
    if !dir.is_dir() { bail!("Argument is not a directory: {}", dir.display()); }
    let mut hasher = blake3::Hasher::new();
    update_from_dir(dir, &mut hasher)?;
    Ok(hasher.finalize().to_hex().as_str()[..16].to_string())
}

/// Digest of a file's content; the name is not part of it.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    update_from_file(path, &mut hasher)?;
    Ok(hasher.finalize().to_hex().as_str()[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_hash_tracks_names_and_content() {
        let tmp = tempfile::tempdir().unwrap();
        let d = tmp.path();
        fs::create_dir_all(d.join("p")).unwrap();
        fs::write(d.join("p").join("a.png"), b"one").unwrap();
        let h1 = hash_dir(d).unwrap();
        assert_eq!(h1, hash_dir(d).unwrap());

        fs::write(d.join("p").join("a.png"), b"two").unwrap();
        let h2 = hash_dir(d).unwrap();
        assert_ne!(h1, h2);

        fs::rename(d.join("p").join("a.png"), d.join("p").join("b.png")).unwrap();
        assert_ne!(h2, hash_dir(d).unwrap());
        assert_eq!(hash_file(&d.join("p").join("b.png")).unwrap().len(), 16);
        assert!(hash_dir(&d.join("p").join("b.png")).is_err());
    }
}
