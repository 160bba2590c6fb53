//! Input files of a matching project: archives, directories and loose
//! class files, described by size and content hash.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::scan::{class_name_from_entry, scan_inputs};

pub const HASH_ALGORITHM: &str = "SHA-256";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub size: u64,
    pub hash_algorithm: String,
    pub hash: Vec<u8>,
    pub file_name: String,
}

impl InputFile {
    pub fn from_bytes(file_name: &str, bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            hash: Sha256::digest(bytes).to_vec(),
            file_name: file_name.to_string(),
        }
    }

    pub fn hash_base64(&self) -> String {
        STANDARD.encode(&self.hash)
    }

    pub fn decode_hash(encoded: &str) -> Option<Vec<u8>> {
        STANDARD.decode(encoded).ok()
    }
}

/// Input descriptors grouped the way the persisted match file lists them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSet {
    pub a: Vec<InputFile>,
    pub b: Vec<InputFile>,
    pub cp: Vec<InputFile>,
    pub cp_a: Vec<InputFile>,
    pub cp_b: Vec<InputFile>,
}

/// Unparsed class file bytes with a human readable origin for diagnostics.
#[derive(Debug, Clone)]
pub struct RawClass {
    pub origin: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct LoadedInputs {
    pub files: Vec<InputFile>,
    pub classes: Vec<RawClass>,
}

/// Reads every class reachable from `paths`, descending into directories
/// and archives.
pub fn load_inputs(paths: &[PathBuf]) -> Result<LoadedInputs> {
    let mut loaded = LoadedInputs::default();
    for path in paths {
        if path.is_dir() {
            for file in scan_inputs(path)? {
                load_file(&file, &mut loaded)?;
            }
        } else {
            load_file(path, &mut loaded)?;
        }
    }
    Ok(loaded)
}

fn load_file(path: &Path, loaded: &mut LoadedInputs) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file).with_context(|| format!("Failed to mmap input: {}", path.display()))? };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    loaded.files.push(InputFile::from_bytes(&file_name, &mmap));

    if path.extension().is_some_and(|e| e == "class") {
        loaded.classes.push(RawClass {
            origin: path.display().to_string(),
            bytes: mmap.to_vec(),
        });
        return Ok(());
    }

    let classes = read_archive(&mmap, &path.display().to_string())
        .with_context(|| format!("Failed to read archive: {}", path.display()))?;
    loaded.classes.extend(classes);
    Ok(())
}

/// Extracts class entries from an in-memory archive, including archives
/// nested inside it.
pub fn read_archive(bytes: &[u8], origin: &str) -> Result<Vec<RawClass>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .with_context(|| format!("Failed to read zip structure: {origin}"))?;

    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let nested = name.ends_with(".jar") || name.ends_with(".zip");
        if class_name_from_entry(&name).is_none() && !nested {
            continue;
        }

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to read {name} in {origin}"))?;
        let entry_origin = format!("{origin}!{name}");
        if nested {
            out.extend(read_archive(&buf, &entry_origin)?);
        } else {
            out.push(RawClass {
                origin: entry_origin,
                bytes: buf,
            });
        }
    }
    Ok(out)
}
