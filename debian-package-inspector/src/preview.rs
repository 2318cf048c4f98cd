// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Previewing file content. */

use {
    crate::error::{InspectError, Result},
    serde::Serialize,
    std::{
        io::{BufRead, BufReader, Cursor, Read},
        path::Path,
    },
};

/// Content shown in place of binary files.
pub const BINARY_PLACEHOLDER: &str = "<binary file>";

/// Bytes read up front to sniff for binary content.
const HEAD_LENGTH: u64 = 8192;

/// A NUL byte within this many leading bytes marks a file as binary.
const BINARY_SNIFF_LENGTH: usize = 512;

/// A preview of a file's content.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub is_text: bool,
    pub is_truncated: bool,
    /// Size of the file in bytes.
    pub size: u64,
}

fn read_error(path: &Path, e: impl std::fmt::Display) -> InspectError {
    InspectError::Read(format!("{}: {}", path.display(), e))
}

/// Read up to `max_lines` lines of a file for display.
///
/// Binary files produce [BINARY_PLACEHOLDER]. Longer text is cut off with a
/// trailer giving the number of omitted and total lines.
pub fn read_file_content(path: &Path, max_lines: usize) -> Result<FileContent> {
    let metadata = std::fs::metadata(path).map_err(|e| read_error(path, e))?;
    if !metadata.is_file() {
        return Err(read_error(path, "not a regular file"));
    }

    let mut fh = std::fs::File::open(path).map_err(|e| read_error(path, e))?;
    let mut head = vec![];
    (&mut fh)
        .take(HEAD_LENGTH)
        .read_to_end(&mut head)
        .map_err(|e| read_error(path, e))?;

    let path_string = path.display().to_string();

    if head.iter().take(BINARY_SNIFF_LENGTH).any(|b| *b == 0) {
        return Ok(FileContent {
            path: path_string,
            content: BINARY_PLACEHOLDER.to_string(),
            is_text: false,
            is_truncated: false,
            size: metadata.len(),
        });
    }

    let mut reader = BufReader::new(Cursor::new(head).chain(fh));
    let mut kept = vec![];
    let mut line = vec![];
    let mut total_lines = 0usize;

    loop {
        line.clear();
        if reader
            .read_until(b'\n', &mut line)
            .map_err(|e| read_error(path, e))?
            == 0
        {
            break;
        }

        total_lines += 1;
        if total_lines <= max_lines {
            kept.extend_from_slice(&line);
        }
    }

    let mut content = String::from_utf8_lossy(&kept).into_owned();
    let is_truncated = total_lines > max_lines;

    if is_truncated {
        if content.ends_with('\n') {
            content.pop();
        }
        content.push_str(&format!(
            "\n\n... ({} more lines truncated, total {} lines)",
            total_lines - max_lines,
            total_lines
        ));
    }

    Ok(FileContent {
        path: path_string,
        content,
        is_text: true,
        is_truncated,
        size: metadata.len(),
    })
}
