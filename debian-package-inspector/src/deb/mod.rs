// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Interfaces for .deb package files.

The .deb file specification lives at <https://manpages.debian.org/unstable/dpkg-dev/deb.5.en.html>.
*/

use thiserror::Error;

pub mod reader;

/// Represents an error related to .deb file handling.
#[derive(Debug, Error)]
pub enum DebError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("not a Debian binary package: {0}")]
    NotBinaryPackage(String),
    #[error("unsupported binary package format version: {0}")]
    UnsupportedFormatVersion(String),
    #[error("Unknown binary package entry: {0}")]
    UnknownBinaryPackageEntry(String),
    #[error("Unknown compression for filename: {0}")]
    UnknownCompression(String),
    #[error("archive member {0} not found")]
    MemberNotFound(&'static str),
    #[error("unpacking cancelled")]
    Cancelled,
}

/// Result type for .deb functionality.
pub type Result<T> = std::result::Result<T, DebError>;
