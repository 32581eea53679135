//! Package loading from ZIP files with manifest support.
//!
//! Packages are ZIP files containing text files and an optional `manifest.mf`
//! JSON file. The manifest names the package and may map archive entries to
//! install paths; entries it does not mention install at their archive path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Seek};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{ResultExt, VfsResult};
use crate::filesystem::FileSystem;
use crate::path::{normalize, parent, qualify, ROOT};

/// File entry in a package manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path inside the archive.
    pub src: String,
    /// Install path on the drive; defaults to `src`.
    #[serde(default)]
    pub dst: Option<String>,
}

/// Package manifest schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl PackageManifest {
    fn unnamed(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            version: None,
            description: None,
            files: Vec::new(),
        }
    }
}

/// Loaded package, keyed by drive-relative install path.
#[derive(Debug, Clone)]
pub struct LoadedPackage {
    pub manifest: PackageManifest,
    pub files: BTreeMap<String, String>,
}

impl LoadedPackage {
    /// Write every file onto drive `letter`, creating parent directories.
    ///
    /// Returns the number of files installed.
    pub fn install(&self, fs: &FileSystem, letter: char) -> VfsResult<usize> {
        for (path, content) in &self.files {
            ensure_parents(fs, letter, path)?;
            fs.write_file(&qualify(letter, path), content)?;
        }
        debug!(
            package = %self.manifest.name,
            drive = %letter,
            files = self.files.len(),
            "installed package"
        );
        Ok(self.files.len())
    }
}

fn ensure_parents(fs: &FileSystem, letter: char, path: &str) -> VfsResult<()> {
    let dir = parent(path);
    if dir == ROOT {
        return Ok(());
    }
    let mut current = String::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        fs.create_directory(&qualify(letter, &current))?;
    }
    Ok(())
}

fn is_manifest(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "manifest.mf" || lower.ends_with("/manifest.mf")
}

/// Load packages from ZIP data.
/// Supports manifest.mf as single object or array of objects.
/// Returns multiple packages if the manifest is an array.
pub fn load_packages<R: Read + Seek>(reader: R) -> VfsResult<Vec<LoadedPackage>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut all_files: HashMap<String, String> = HashMap::new();
    let mut manifests: Vec<PackageManifest> = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;

        let text = match String::from_utf8(content) {
            Ok(text) => text,
            Err(_) => {
                warn!(entry = %name, "skipping binary archive entry");
                continue;
            }
        };

        if is_manifest(&name) {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(parsed) => manifests = normalize_manifest_data(parsed),
                Err(e) => warn!(entry = %name, "ignoring unreadable manifest: {}", e),
            }
        } else {
            all_files.insert(name, text);
        }
    }

    if manifests.is_empty() {
        manifests.push(PackageManifest::unnamed("Unknown Package"));
    }

    let mut packages: Vec<LoadedPackage> = Vec::new();
    let mut assigned_files: HashSet<String> = HashSet::new();

    for manifest in manifests {
        let mut pkg_files = BTreeMap::new();
        for entry in &manifest.files {
            let Some(content) = all_files.get(&entry.src) else {
                warn!(package = %manifest.name, entry = %entry.src, "manifest lists a missing file");
                continue;
            };
            let dst = normalize(entry.dst.as_deref().unwrap_or(&entry.src))
                .context("loadPackage", &entry.src)?;
            pkg_files.insert(dst, content.clone());
            assigned_files.insert(entry.src.clone());
        }
        packages.push(LoadedPackage {
            manifest,
            files: pkg_files,
        });
    }

    // Any unassigned files go to the first package
    if let Some(first) = packages.first_mut() {
        for (name, content) in &all_files {
            if !assigned_files.contains(name) {
                let dst = normalize(name).context("loadPackage", name)?;
                first.files.insert(dst, content.clone());
            }
        }
    }

    Ok(packages)
}

/// Load a single package from ZIP data, merging multi-package manifests.
pub fn load_package<R: Read + Seek>(reader: R) -> VfsResult<LoadedPackage> {
    let mut packages = load_packages(reader)?.into_iter();
    let Some(mut merged) = packages.next() else {
        return Ok(LoadedPackage {
            manifest: PackageManifest::unnamed("Empty Package"),
            files: BTreeMap::new(),
        });
    };
    for pkg in packages {
        merged.manifest.files.extend(pkg.manifest.files);
        merged.files.extend(pkg.files);
    }
    Ok(merged)
}

/// Load a package from a file path.
pub fn load_package_from_path(path: &std::path::Path) -> VfsResult<LoadedPackage> {
    let file = std::fs::File::open(path)?;
    load_package(std::io::BufReader::new(file))
}

/// Normalize manifest data to array format.
fn normalize_manifest_data(data: serde_json::Value) -> Vec<PackageManifest> {
    if let Ok(arr) = serde_json::from_value::<Vec<PackageManifest>>(data.clone()) {
        return arr;
    }
    if let Ok(single) = serde_json::from_value::<PackageManifest>(data) {
        return vec![single];
    }
    Vec::new()
}
