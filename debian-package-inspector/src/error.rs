// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {std::time::Duration, thiserror::Error};

/// Coarse classification of an [InspectError].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Extraction,
    ControlExtraction,
    MetadataParse,
    Timeout,
    Read,
    Io,
    Cancelled,
    Internal,
}

/// Primary crate error type.
///
/// Extraction and metadata failures are fatal to a package parse. Failures
/// analyzing individual files never surface as this type; they are logged and
/// the file is left out of the corresponding analysis map.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to extract package data: {0}")]
    Extraction(String),

    #[error("failed to extract control information: {0}")]
    ControlExtraction(String),

    #[error("failed to parse package metadata: {0}")]
    MetadataParse(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("failed to read file content: {0}")]
    Read(String),

    #[error("working directory error on path {0}: {1:?}")]
    WorkingDirectory(String, std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl InspectError {
    /// The [ErrorKind] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::ControlExtraction(_) => ErrorKind::ControlExtraction,
            Self::MetadataParse(_) => ErrorKind::MetadataParse,
            Self::Timeout(_, _) => ErrorKind::Timeout,
            Self::Read(_) => ErrorKind::Read,
            Self::WorkingDirectory(_, _) => ErrorKind::Io,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Join(_) => ErrorKind::Internal,
        }
    }

    /// A stable machine readable code for this error.
    ///
    /// These are the codes front-ends key their messages on.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Extraction => "EXTRACT_ERROR",
            ErrorKind::ControlExtraction => "CONTROL_EXTRACT_ERROR",
            ErrorKind::MetadataParse => "METADATA_PARSE_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Read => "READ_ERROR",
            ErrorKind::Io => "IO_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// The underlying tool or library diagnostic, if this error carries one.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Extraction(detail)
            | Self::ControlExtraction(detail)
            | Self::MetadataParse(detail)
            | Self::Read(detail) => Some(detail.clone()),
            Self::WorkingDirectory(_, e) => Some(e.to_string()),
            Self::Join(e) => Some(e.to_string()),
            Self::Timeout(_, _) | Self::Cancelled => None,
        }
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, InspectError>;
