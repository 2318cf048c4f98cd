// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! .deb file reading functionality. */

use {
    crate::{
        deb::{DebError, Result},
        workdir::{relax_mode, CancellationFlag},
    },
    log::warn,
    std::{
        collections::HashMap,
        io::{Cursor, Read},
        ops::{Deref, DerefMut},
        path::Path,
    },
};

fn reader_from_filename(extension: &str, data: Cursor<Vec<u8>>) -> Result<Box<dyn Read>> {
    match extension {
        "" => Ok(Box::new(data)),
        ".gz" => Ok(Box::new(libflate::gzip::Decoder::new(data)?)),
        ".xz" => Ok(Box::new(xz2::read::XzDecoder::new(data))),
        ".lzma" => {
            let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                .map_err(std::io::Error::from)?;
            Ok(Box::new(xz2::read::XzDecoder::new_stream(data, stream)))
        }
        ".bz2" => Ok(Box::new(bzip2::read::BzDecoder::new(data))),
        ".zst" => Ok(Box::new(zstd::Decoder::new(data)?)),
        _ => Err(DebError::UnknownCompression(extension.to_string())),
    }
}

/// A reader of .deb files.
///
/// A .deb binary package file is an ar archive with 3 entries:
///
/// 1. `debian-binary` holding the version of the binary package format.
/// 2. `control.tar[.<ext>]` holding package metadata.
/// 3. `data.tar[.<ext>]` holding file content.
///
/// Members whose name begins with `_` are reserved for local additions (such as
/// signatures) and are surfaced as [BinaryPackageEntry::Other].
pub struct BinaryPackageReader<R: Read> {
    archive: ar::Archive<R>,
    format_seen: bool,
}

impl<R: Read> BinaryPackageReader<R> {
    /// Construct a new instance from a reader.
    pub fn new(reader: R) -> Self {
        Self {
            archive: ar::Archive::new(reader),
            format_seen: false,
        }
    }

    /// Obtain the next entry from the underlying ar archive.
    ///
    /// The entry will be converted to an enum that richly represents its content.
    /// The first entry must be a supported `debian-binary` member or an error
    /// is returned.
    pub fn next_entry(&mut self) -> Option<Result<BinaryPackageEntry>> {
        let entry = self.archive.next_entry()?;

        Some(entry.map_err(DebError::from).and_then(|mut entry| {
            // Filenames should be ASCII. Some ar writers terminate names with `/`.
            let filename = String::from_utf8_lossy(entry.header().identifier())
                .trim_end_matches('/')
                .to_string();

            let mut data = vec![];
            entry.read_to_end(&mut data)?;

            if !self.format_seen {
                self.format_seen = true;

                if filename != "debian-binary" {
                    return Err(DebError::NotBinaryPackage(format!(
                        "first archive member is {} instead of debian-binary",
                        filename
                    )));
                }

                let version = String::from_utf8_lossy(&data).trim().to_string();
                if !version.starts_with("2.") {
                    return Err(DebError::UnsupportedFormatVersion(version));
                }

                return Ok(BinaryPackageEntry::DebianBinary(version));
            }

            if let Some(tail) = filename.strip_prefix("control.tar") {
                Ok(BinaryPackageEntry::Control(TarMember::new(tail, data)))
            } else if let Some(tail) = filename.strip_prefix("data.tar") {
                Ok(BinaryPackageEntry::Data(TarMember::new(tail, data)))
            } else if filename.starts_with('_') {
                Ok(BinaryPackageEntry::Other(filename))
            } else {
                Err(DebError::UnknownBinaryPackageEntry(filename))
            }
        }))
    }
}

/// Represents an entry in a .deb archive.
pub enum BinaryPackageEntry {
    /// The `debian-binary` file, holding the format version.
    DebianBinary(String),
    /// The `control.tar[.<ext>]` tar archive.
    Control(TarMember),
    /// The `data.tar[.<ext>]` tar archive.
    Data(TarMember),
    /// A reserved `_`-prefixed member.
    Other(String),
}

/// A still compressed tar archive member of a .deb archive.
///
/// Nothing is decompressed until the member is opened, so a corrupt member
/// only fails the reader that asks for it.
pub struct TarMember {
    compression: String,
    data: Vec<u8>,
}

impl TarMember {
    fn new(compression: &str, data: Vec<u8>) -> Self {
        Self {
            compression: compression.to_string(),
            data,
        }
    }

    /// Filename extension of the compression format, including the leading `.`.
    ///
    /// Empty for uncompressed archives.
    pub fn compression(&self) -> &str {
        &self.compression
    }

    fn open(self) -> Result<tar::Archive<Box<dyn Read>>> {
        Ok(tar::Archive::new(reader_from_filename(
            &self.compression,
            Cursor::new(self.data),
        )?))
    }

    /// Open as a control archive.
    pub fn into_control(self) -> Result<ControlTarReader> {
        Ok(ControlTarReader {
            archive: self.open()?,
        })
    }

    /// Open as a data archive.
    pub fn into_data(self) -> Result<DataTarReader> {
        Ok(DataTarReader {
            archive: self.open()?,
        })
    }
}

/// Header metadata for a member of a tar archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArchiveMember {
    pub uid: u64,
    pub gid: u64,
    pub mode: u32,
    /// Seconds since the UNIX epoch.
    pub mtime: u64,
}

/// Header metadata of unpacked members, keyed by their normalized relative path.
pub type ArchiveManifest = HashMap<String, ArchiveMember>;

/// Normalize a tar member path to a slash separated relative path.
///
/// Debian archives in the wild name members `./usr/bin/foo` and directories
/// `./usr/bin/`. Both normalize to `usr/bin/foo` and `usr/bin`. The archive
/// root normalizes to the empty string.
pub fn normalize_member_path(path: &[u8]) -> String {
    let path = String::from_utf8_lossy(path);

    let mut trimmed = path.as_ref();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }

    let trimmed = trimmed.trim_start_matches('/').trim_end_matches('/');

    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

fn unpack_archive(
    archive: &mut tar::Archive<Box<dyn Read>>,
    dest: &Path,
    cancellation: &CancellationFlag,
) -> Result<ArchiveManifest> {
    // Modes are recorded in the manifest. What lands on disk only needs to be
    // readable and removable by us.
    archive.set_preserve_permissions(false);
    archive.set_preserve_mtime(true);
    archive.set_unpack_xattrs(false);
    archive.set_overwrite(true);

    let mut manifest = ArchiveManifest::new();

    for entry in archive.entries()? {
        if cancellation.is_cancelled() {
            return Err(DebError::Cancelled);
        }

        let mut entry = entry?;

        let path = normalize_member_path(&entry.path_bytes());
        let header = entry.header();
        let member = ArchiveMember {
            uid: header.uid()?,
            gid: header.gid()?,
            mode: header.mode()?,
            mtime: header.mtime()?,
        };

        if path.is_empty() {
            continue;
        }

        if !entry.unpack_in(dest)? {
            warn!("skipping archive member with unsafe path: {}", path);
            continue;
        }

        relax_mode(&dest.join(&path));

        manifest.insert(path, member);
    }

    Ok(manifest)
}

/// A reader for `control.tar` files.
pub struct ControlTarReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl Deref for ControlTarReader {
    type Target = tar::Archive<Box<dyn Read>>;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl DerefMut for ControlTarReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.archive
    }
}

impl ControlTarReader {
    /// Unpack all members beneath `dest`.
    ///
    /// Stops with [DebError::Cancelled] between members once `cancellation`
    /// is raised.
    pub fn unpack_in(
        &mut self,
        dest: &Path,
        cancellation: &CancellationFlag,
    ) -> Result<ArchiveManifest> {
        unpack_archive(&mut self.archive, dest, cancellation)
    }
}

/// A reader for `data.tar` files.
pub struct DataTarReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl Deref for DataTarReader {
    type Target = tar::Archive<Box<dyn Read>>;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

impl DerefMut for DataTarReader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.archive
    }
}

impl DataTarReader {
    /// Unpack all members beneath `dest`.
    ///
    /// Member paths escaping `dest` are skipped. Stops with
    /// [DebError::Cancelled] between members once `cancellation` is raised.
    pub fn unpack_in(
        &mut self,
        dest: &Path,
        cancellation: &CancellationFlag,
    ) -> Result<ArchiveManifest> {
        unpack_archive(&mut self.archive, dest, cancellation)
    }
}

/// Find the `control.tar` member of a `.deb` archive.
pub fn find_control_tar(reader: impl Read) -> Result<ControlTarReader> {
    let mut reader = BinaryPackageReader::new(reader);

    while let Some(entry) = reader.next_entry() {
        if let BinaryPackageEntry::Control(member) = entry? {
            return member.into_control();
        }
    }

    Err(DebError::MemberNotFound("control.tar"))
}

/// Find the `data.tar` member of a `.deb` archive.
pub fn find_data_tar(reader: impl Read) -> Result<DataTarReader> {
    let mut reader = BinaryPackageReader::new(reader);

    while let Some(entry) = reader.next_entry() {
        if let BinaryPackageEntry::Data(member) = entry? {
            return member.into_data();
        }
    }

    Err(DebError::MemberNotFound("data.tar"))
}
