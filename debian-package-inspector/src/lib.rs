// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package inspection.

This crate takes a Debian binary package (`.deb` or `.udeb`) file and produces a
structured description of it: control metadata, a classified listing of every
file in the data archive, maintainer scripts, raw control files, and analyses of
embedded ELF binaries and freedesktop.org desktop entries.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>. Please file issues
and pull requests there.

# A Tour of Functionality

[pipeline::PackageInspector] is the main entry point. Its
[pipeline::PackageInspector::parse_package()] runs the whole pipeline and returns a
[pipeline::ParseResult], which serializes to JSON with `serde`.

Packages are unpacked by an [extract::ArchiveExtractor]. [extract::NativeExtractor]
reads the ar container and tar members in process via the [deb::reader] module.
[extract::DpkgDebExtractor] shells out to `dpkg-deb` instead.

The [control] module parses the `control` file into [control::PackageMetadata]. The
[walk] module turns an unpacked data tree into [walk::FileRecord]s, classifying ELF
files by content and desktop entries by name. ELF files are analyzed by an
[elf::ElfReader], by default the `object` crate backed [elf::ObjectElfReader].
Desktop entries are parsed by the [desktop] module. Maintainer scripts and raw
control files are collected by the [scripts] module.

Every parse owns a [workdir::WorkingDirectory] that is removed when the parse
finishes, fails or is dropped. Time budgets, caps and concurrency come from
[config::InspectorConfig].

[preview::read_file_content()] and [pipeline::PackageInspector::preview_member()]
render file content for display.
*/

pub mod config;
pub mod control;
pub mod deb;
pub mod desktop;
pub mod elf;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod preview;
pub mod scripts;
mod task;
pub mod walk;
pub mod workdir;

#[cfg(test)]
mod testutil;

pub use {
    error::{InspectError, Result},
    pipeline::{PackageInspector, ParseResult},
};
