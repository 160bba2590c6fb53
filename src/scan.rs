use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Extensions accepted as program inputs.
pub fn is_input_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e == "class" || e == "jar" || e == "zip")
}

/// Collects every class file and archive below `base_path`, in path order.
pub fn scan_inputs(base_path: &Path) -> Result<Vec<PathBuf>> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if entry.file_type().is_some_and(|t| t.is_file()) && is_input_file(path) {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut found: Vec<PathBuf> = rx.iter().collect();
    found.sort();
    Ok(found)
}

/// Internal class name for an archive entry or relative file path, if it
/// names a class file.
pub fn class_name_from_entry(entry: &str) -> Option<&str> {
    let name = entry.strip_suffix(".class")?;
    if name.is_empty() || name.ends_with("module-info") {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn scan_inputs_finds_classes_and_jars() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("a/b");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("C.class"), b"x").unwrap();
        fs::write(dir.path().join("lib.jar"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let found = scan_inputs(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("a/b/C.class")));
        assert!(found.iter().any(|p| p.ends_with("lib.jar")));
    }

    #[test]
    fn class_name_from_entry_skips_module_info() {
        assert_eq!(class_name_from_entry("a/b/C.class"), Some("a/b/C"));
        assert_eq!(class_name_from_entry("module-info.class"), None);
        assert_eq!(class_name_from_entry("META-INF/MANIFEST.MF"), None);
    }
}
