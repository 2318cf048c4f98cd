// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Inspector configuration. */

use {
    serde::{Deserialize, Serialize},
    std::{path::PathBuf, time::Duration},
    strum::{AsRefStr, EnumIter, EnumString},
};

/// How package archives get unpacked.
#[derive(
    AsRefStr, Clone, Copy, Debug, Deserialize, EnumIter, EnumString, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExtractorBackend {
    /// In-process ar and tar readers.
    Native,
    /// The system `dpkg-deb` tool.
    DpkgDeb,
}

impl Default for ExtractorBackend {
    fn default() -> Self {
        Self::Native
    }
}

/// Configures a [crate::pipeline::PackageInspector].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectorConfig {
    /// Time budget for unpacking the data archive.
    pub data_extraction_timeout_ms: u64,

    /// Time budget for unpacking the control archive.
    pub control_extraction_timeout_ms: u64,

    /// Time budget for each sub-analysis of a single ELF file.
    pub elf_analysis_timeout_ms: u64,

    /// Time budget for analyzing a single desktop file.
    pub desktop_analysis_timeout_ms: u64,

    /// How many ELF files of a package get analyzed.
    pub max_elf_files: usize,

    /// How many section header lines an ELF analysis keeps.
    pub max_section_headers: usize,

    /// How many per-file analyses run at once.
    pub analysis_concurrency: usize,

    pub extractor: ExtractorBackend,

    /// Directory working directories are created in.
    ///
    /// Defaults to the system temporary directory.
    pub work_root: Option<PathBuf>,

    /// Default line cap for content previews.
    pub preview_max_lines: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            data_extraction_timeout_ms: 60_000,
            control_extraction_timeout_ms: 30_000,
            elf_analysis_timeout_ms: 5_000,
            desktop_analysis_timeout_ms: 5_000,
            max_elf_files: 20,
            max_section_headers: 10,
            analysis_concurrency: num_cpus::get(),
            extractor: ExtractorBackend::default(),
            work_root: None,
            preview_max_lines: 1000,
        }
    }
}

impl InspectorConfig {
    pub fn data_extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.data_extraction_timeout_ms)
    }

    pub fn control_extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.control_extraction_timeout_ms)
    }

    pub fn elf_analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.elf_analysis_timeout_ms)
    }

    pub fn desktop_analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.desktop_analysis_timeout_ms)
    }

    /// Worker count for per-file analysis. Never 0.
    pub fn concurrency(&self) -> usize {
        self.analysis_concurrency.max(1)
    }

    /// The resolved directory to create working directories in.
    pub fn work_root(&self) -> PathBuf {
        self.work_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Set the data and control extraction time budgets.
    #[must_use]
    pub fn set_extraction_timeouts(mut self, data: Duration, control: Duration) -> Self {
        self.data_extraction_timeout_ms = data.as_millis() as u64;
        self.control_extraction_timeout_ms = control.as_millis() as u64;
        self
    }

    /// Set the ELF sub-analysis and per-file desktop analysis time budgets.
    #[must_use]
    pub fn set_analysis_timeouts(mut self, elf: Duration, desktop: Duration) -> Self {
        self.elf_analysis_timeout_ms = elf.as_millis() as u64;
        self.desktop_analysis_timeout_ms = desktop.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn set_max_elf_files(mut self, value: usize) -> Self {
        self.max_elf_files = value;
        self
    }

    #[must_use]
    pub fn set_max_section_headers(mut self, value: usize) -> Self {
        self.max_section_headers = value;
        self
    }

    #[must_use]
    pub fn set_analysis_concurrency(mut self, value: usize) -> Self {
        self.analysis_concurrency = value;
        self
    }

    #[must_use]
    pub fn set_extractor(mut self, extractor: ExtractorBackend) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn set_work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_root = Some(path.into());
        self
    }

    #[must_use]
    pub fn set_preview_max_lines(mut self, value: usize) -> Self {
        self.preview_max_lines = value;
        self
    }
}
