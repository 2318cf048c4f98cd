// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Desktop entry parsing.

See <https://specifications.freedesktop.org/desktop-entry-spec/latest/> for the
file format.
*/

use {log::warn, std::collections::BTreeMap, std::path::Path};

/// Key/value pairs from the `[Desktop Entry]` group of a desktop file.
///
/// Well-known keys include `Name`, `Exec`, `Icon`, `Categories`, `NoDisplay`
/// and `Hidden`. Other keys, including localized ones like `Name[de]`, are
/// kept verbatim.
pub type DesktopEntry = BTreeMap<String, String>;

const DESKTOP_ENTRY_GROUP: &str = "[Desktop Entry]";

/// Parse the `[Desktop Entry]` group out of desktop file text.
pub fn parse_desktop_entry(text: &str) -> DesktopEntry {
    let mut entry = DesktopEntry::new();

    let mut lines = text
        .lines()
        .map(|line| line.trim())
        .skip_while(|line| *line != DESKTOP_ENTRY_GROUP)
        .skip(1);

    for line in &mut lines {
        if line.starts_with('[') && line.ends_with(']') {
            break;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            entry.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    entry
}

/// Parse the desktop file at `path`.
///
/// Returns an empty entry if the file cannot be read or is not UTF-8.
pub fn analyze_desktop_file(path: &Path) -> DesktopEntry {
    let text = std::fs::read(path).map_err(|e| e.to_string()).and_then(|data| {
        String::from_utf8(data).map_err(|e| e.to_string())
    });

    match text {
        Ok(text) => parse_desktop_entry(&text),
        Err(e) => {
            warn!("unable to read desktop file {}: {}", path.display(), e);
            DesktopEntry::new()
        }
    }
}
