// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Walking and classifying an unpacked data tree. */

use {
    crate::{
        deb::reader::ArchiveManifest,
        elf::ELF_MAGIC,
        error::{InspectError, Result},
    },
    chrono::{DateTime, TimeZone, Utc},
    log::warn,
    serde::Serialize,
    std::{
        io::Read,
        os::unix::fs::MetadataExt,
        path::{Component, Path},
    },
};

/// How many leading bytes of a file are inspected for classification.
pub const SNIFF_LENGTH: u64 = 512;

/// The type tag of a [FileRecord].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Elf,
    Desktop,
}

impl FileType {
    /// Whether size of entries of this type counts towards the extracted size.
    pub fn has_content(&self) -> bool {
        !matches!(self, Self::Directory | Self::Symlink)
    }
}

/// A filesystem entry found in a package's data archive.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the archive root, `/` separated, without leading `/`.
    pub path: String,
    /// Size in bytes. Always 0 for directories and symlinks.
    pub size: u64,
    /// Permission bits as a 4 digit octal string.
    pub mode: String,
    pub uid: u64,
    pub gid: u64,
    pub mtime: DateTime<Utc>,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(rename = "isELF")]
    pub is_elf: bool,
    pub is_desktop: bool,
    /// Target of a symlink. Never resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

/// Whether a path names a desktop entry.
///
/// This holds for symlinks and directories too. Only regular files are
/// tagged [FileType::Desktop] and analyzed.
pub fn is_desktop_path(path: &str) -> bool {
    path.ends_with(".desktop")
}

/// Whether a file begins with the ELF magic.
///
/// Read errors are logged and treated as not ELF.
pub fn sniff_elf(path: &Path) -> bool {
    let mut head = Vec::with_capacity(SNIFF_LENGTH as usize);

    let res = std::fs::File::open(path)
        .and_then(|fh| fh.take(SNIFF_LENGTH).read_to_end(&mut head));

    match res {
        Ok(_) => head.starts_with(&ELF_MAGIC),
        Err(e) => {
            warn!("unable to read {}: {}", path.display(), e);
            false
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

/// Walk an unpacked data tree, producing a record for every entry.
///
/// Records are ordered depth first with siblings sorted by name. Symlinks are
/// recorded but never followed. Ownership, mode and mtime come from
/// `manifest` when it has the entry, and from the filesystem otherwise.
pub fn walk_data_tree(root: &Path, manifest: Option<&ArchiveManifest>) -> Result<Vec<FileRecord>> {
    let mut records = vec![];

    for entry in walkdir::WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            InspectError::WorkingDirectory(format!("{}", root.display()), e.into())
        })?;
        let metadata = entry.metadata().map_err(|e| {
            InspectError::WorkingDirectory(format!("{}", entry.path().display()), e.into())
        })?;

        let path = relative_path(root, entry.path());
        let member = manifest.and_then(|m| m.get(&path));

        let (uid, gid, mode, mtime) = match member {
            Some(member) => (
                member.uid,
                member.gid,
                member.mode,
                timestamp(member.mtime as i64),
            ),
            None => (
                metadata.uid() as u64,
                metadata.gid() as u64,
                metadata.mode(),
                timestamp(metadata.mtime()),
            ),
        };

        let file_type = entry.file_type();
        let is_desktop = is_desktop_path(&path);

        let (file_type, size, is_elf, link_target) = if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map(|p| p.to_string_lossy().to_string())
                .map_err(|e| warn!("unable to read link {}: {}", entry.path().display(), e))
                .ok();

            (FileType::Symlink, 0, false, target)
        } else if file_type.is_dir() {
            (FileType::Directory, 0, false, None)
        } else if file_type.is_file() {
            let is_elf = sniff_elf(entry.path());

            // The path based desktop classification wins the type tag.
            let tag = if is_desktop {
                FileType::Desktop
            } else if is_elf {
                FileType::Elf
            } else {
                FileType::File
            };

            (tag, metadata.len(), is_elf, None)
        } else {
            // Device nodes and fifos have no content worth sniffing.
            (FileType::File, 0, false, None)
        };

        records.push(FileRecord {
            path,
            size,
            mode: format!("{:04o}", mode & 0o7777),
            uid,
            gid,
            mtime,
            file_type,
            is_elf,
            is_desktop,
            link_target,
        });
    }

    Ok(records)
}
