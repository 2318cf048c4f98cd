// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Parsing of the binary package `control` file.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for the canonical source of truth for how control files work.

Parsing here is deliberately lenient: a binary package only carries one
paragraph, so blank lines merely end the field being accumulated and lines
that are not `Key: value` pairs are skipped instead of failing the parse.
*/

use {
    crate::error::{InspectError, Result},
    log::debug,
    serde::{ser::SerializeMap, Serialize, Serializer},
    std::path::Path,
};

/// Field names every [PackageMetadata] exposes, even when absent from the input.
pub const REQUIRED_FIELDS: [&str; 3] = ["Package", "Version", "Architecture"];

/// A single `Name: value` field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// The field name, as written in the control file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field value.
    ///
    /// Multiple line values have their continuation lines joined with `\n`
    /// after stripping leading whitespace.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Metadata parsed from a binary package's `control` file.
///
/// This is an open mapping of field name to value. Fields are kept in file
/// order and lookups are case-insensitive, as field names are in Debian.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageMetadata {
    fields: Vec<ControlField>,
}

impl PackageMetadata {
    /// Obtain the value of a named field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Whether a named field is present.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in the order they were defined.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    /// The number of fields defined.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `Package` field, or an empty string.
    pub fn package(&self) -> &str {
        self.field("Package").unwrap_or_default()
    }

    /// The `Version` field, or an empty string.
    pub fn version(&self) -> &str {
        self.field("Version").unwrap_or_default()
    }

    /// The `Architecture` field, or an empty string.
    pub fn architecture(&self) -> &str {
        self.field("Architecture").unwrap_or_default()
    }

    /// The `Installed-Size` field as an integer of kibibytes.
    ///
    /// `None` if the field is absent or not an integer.
    pub fn installed_size(&self) -> Option<u64> {
        self.field("Installed-Size")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    fn insert(&mut self, name: String, value: String) {
        if self.has_field(&name) {
            debug!("ignoring duplicate control field {}", name);
        } else {
            self.fields.push(ControlField { name, value });
        }
    }
}

impl Serialize for PackageMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let extra = self.fields.iter().filter(|f| {
            !REQUIRED_FIELDS
                .iter()
                .any(|required| f.name.eq_ignore_ascii_case(required))
        });

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Package", self.package())?;
        map.serialize_entry("Version", self.version())?;
        map.serialize_entry("Architecture", self.architecture())?;
        for field in extra {
            map.serialize_entry(&field.name, &field.value)?;
        }
        map.end()
    }
}

/// A line-based parser for a binary package control file.
///
/// Feed lines with [Self::write_line()] and obtain the result with [Self::finish()].
#[derive(Default)]
pub struct ControlFileParser {
    metadata: PackageMetadata,
    field: Option<(String, String)>,
}

impl ControlFileParser {
    /// Write a line to the parser.
    ///
    /// Trailing newline characters are ignored.
    pub fn write_line(&mut self, line: &str) {
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

        // Blank lines end the current field. Later indented lines must not
        // attach to it.
        if line.trim().is_empty() {
            self.flush();
            return;
        }

        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            match self.field.as_mut() {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                None => debug!("ignoring orphaned continuation line: {}", line),
            }
            return;
        }

        // Malformed lines are skipped without ending the current field.
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                self.flush();
                self.field = Some((name.trim().to_string(), value.trim().to_string()));
            }
            _ => debug!("ignoring malformed control line: {}", line),
        }
    }

    /// Finish parsing, consuming self.
    pub fn finish(mut self) -> PackageMetadata {
        self.flush();
        self.metadata
    }

    fn flush(&mut self) {
        if let Some((name, value)) = self.field.take() {
            self.metadata.insert(name, value);
        }
    }
}

/// Parse control file text into [PackageMetadata].
pub fn parse_control_text(text: &str) -> PackageMetadata {
    let mut parser = ControlFileParser::default();
    for line in text.lines() {
        parser.write_line(line);
    }

    parser.finish()
}

/// Parse the `control` file inside an unpacked control archive.
///
/// Fails with [InspectError::MetadataParse] if the file is missing, unreadable
/// or not UTF-8.
pub fn parse_control_file(control_dir: &Path) -> Result<PackageMetadata> {
    let path = control_dir.join("control");

    let data = std::fs::read(&path)
        .map_err(|e| InspectError::MetadataParse(format!("{}: {}", path.display(), e)))?;
    let text = String::from_utf8(data)
        .map_err(|e| InspectError::MetadataParse(format!("{}: {}", path.display(), e)))?;

    Ok(parse_control_text(&text))
}
