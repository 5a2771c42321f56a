//! Repository directory layout.
//!
//! ```text
//! <root>/
//! ├─ pack-names          # Manifest
//! ├─ lock                # Advisory write lock
//! ├─ packs/NAME.pack     # Published containers
//! ├─ indices/NAME.rix    # Indices (.rix .iix .tix .six)
//! ├─ upload/             # Staging containers
//! └─ obsolete_packs/     # Superseded packs and their indices
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::IndexKind;

const MANIFEST_FILE: &str = "pack-names";
const MANIFEST_TEMP: &str = "pack-names.tmp";
const LOCK_FILE: &str = "lock";
const PACKS_DIR: &str = "packs";
const INDICES_DIR: &str = "indices";
const UPLOAD_DIR: &str = "upload";
const OBSOLETE_DIR: &str = "obsolete_packs";

/// Paths of every file the engine touches
#[derive(Debug, Clone)]
pub struct PackLayout {
    root: PathBuf,
}

impl PackLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create every directory of the layout
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.packs_dir(),
            self.indices_dir(),
            self.upload_dir(),
            self.obsolete_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Scratch file the manifest is written to before the rename
    pub fn manifest_temp_path(&self) -> PathBuf {
        self.root.join(MANIFEST_TEMP)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn packs_dir(&self) -> PathBuf {
        self.root.join(PACKS_DIR)
    }

    pub fn indices_dir(&self) -> PathBuf {
        self.root.join(INDICES_DIR)
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.root.join(UPLOAD_DIR)
    }

    pub fn obsolete_dir(&self) -> PathBuf {
        self.root.join(OBSOLETE_DIR)
    }

    /// "packs/NAME.pack"
    pub fn pack_path(&self, name: &str) -> PathBuf {
        self.packs_dir().join(Self::pack_file_name(name))
    }

    /// "indices/NAME.rix" and friends
    pub fn index_path(&self, name: &str, kind: IndexKind) -> PathBuf {
        self.indices_dir().join(Self::index_file_name(name, kind))
    }

    /// Staging container for an in-flight write or compaction
    pub fn upload_path(&self, staging_name: &str, suffix: &str) -> PathBuf {
        self.upload_dir().join(format!("{}.{}", staging_name, suffix))
    }

    pub fn obsolete_pack_path(&self, name: &str) -> PathBuf {
        self.obsolete_dir().join(Self::pack_file_name(name))
    }

    pub fn obsolete_index_path(&self, name: &str, kind: IndexKind) -> PathBuf {
        self.obsolete_dir().join(Self::index_file_name(name, kind))
    }

    /// Parse a pack name from a container file name
    /// "0f3a...e1.pack" → Some("0f3a...e1")
    pub fn parse_pack_name(path: &Path) -> Option<String> {
        if path.extension()? != "pack" {
            return None;
        }
        Some(path.file_stem()?.to_string_lossy().into_owned())
    }

    fn pack_file_name(name: &str) -> String {
        format!("{}.pack", name)
    }

    fn index_file_name(name: &str, kind: IndexKind) -> String {
        format!("{}.{}", name, kind.suffix())
    }
}
