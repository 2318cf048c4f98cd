// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package inspection pipeline.

[PackageInspector::parse_package()] runs every stage against a fresh
[WorkingDirectory]:

1. Unpack the data and control archives.
2. Parse the `control` file.
3. Walk and classify the data tree.
4. Collect maintainer scripts and raw control files.
5. Analyze the first ELF files and every desktop file, isolating per-file
   failures.
6. Compute statistics.

The working directory is removed once the result is assembled, when a stage
fails, or when the future is dropped.
*/

use {
    crate::{
        config::InspectorConfig,
        control::{parse_control_file, PackageMetadata},
        desktop::{analyze_desktop_file, DesktopEntry},
        elf::{analyze_elf_file_bounded, ElfAnalysis, ElfReader, ObjectElfReader},
        error::{InspectError, Result},
        extract::{extractor_for, ArchiveExtractor, ExtractedPackage},
        preview::{read_file_content, FileContent},
        scripts::{collect_maintainer_scripts, read_control_files, ControlFiles, MaintainerScripts},
        task::run_blocking,
        walk::{walk_data_tree, FileRecord, FileType},
        workdir::WorkingDirectory,
    },
    futures::StreamExt,
    log::{debug, warn},
    serde::Serialize,
    std::{
        collections::BTreeMap,
        future::Future,
        path::{Component, Path, PathBuf},
        sync::Arc,
        time::{Duration, Instant},
    },
};

/// Summary statistics of a parsed package.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStats {
    /// Wall clock milliseconds spent parsing.
    pub parse_time: u64,
    /// Size of the package file in bytes.
    pub original_size: u64,
    /// Sum of sizes of entries other than directories and symlinks.
    pub extracted_size: u64,
    pub file_count: usize,
    pub elf_count: usize,
    pub desktop_count: usize,
}

impl PackageStats {
    fn from_files(files: &[FileRecord], original_size: u64, parse_time: Duration) -> Self {
        Self {
            parse_time: parse_time.as_millis() as u64,
            original_size,
            extracted_size: files
                .iter()
                .filter(|r| r.file_type.has_content())
                .map(|r| r.size)
                .sum(),
            file_count: files.len(),
            elf_count: files.iter().filter(|r| r.is_elf).count(),
            desktop_count: files.iter().filter(|r| r.is_desktop).count(),
        }
    }
}

/// Everything learned about a package.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub metadata: PackageMetadata,
    pub files: Vec<FileRecord>,
    pub scripts: MaintainerScripts,
    pub control_files: ControlFiles,
    /// ELF analyses keyed by path. Absent when nothing was analyzed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elf_info: Option<BTreeMap<String, ElfAnalysis>>,
    /// Desktop entries keyed by path. Absent when nothing was analyzed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desktop_info: Option<BTreeMap<String, DesktopEntry>>,
    pub stats: PackageStats,
}

/// Inspects Debian binary packages.
///
/// Instances hold no per-package state and can run many parses concurrently.
#[derive(Clone)]
pub struct PackageInspector {
    config: InspectorConfig,
    extractor: Arc<dyn ArchiveExtractor>,
    elf_reader: Arc<dyn ElfReader>,
}

impl Default for PackageInspector {
    fn default() -> Self {
        Self::new(InspectorConfig::default())
    }
}

impl PackageInspector {
    /// Construct an instance using the extractor backend named by `config`.
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            extractor: extractor_for(config.extractor),
            elf_reader: Arc::new(ObjectElfReader),
            config,
        }
    }

    /// Use a custom [ArchiveExtractor].
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Use a custom [ElfReader].
    #[must_use]
    pub fn with_elf_reader(mut self, reader: Arc<dyn ElfReader>) -> Self {
        self.elf_reader = reader;
        self
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Parse a `.deb` file.
    ///
    /// Fails on the first extraction or metadata error. Per-file ELF and
    /// desktop analysis failures are logged and leave the file out of the
    /// corresponding map.
    pub async fn parse_package(&self, package: &Path) -> Result<ParseResult> {
        let workdir = WorkingDirectory::create(&self.config.work_root())?;

        let res = self.parse_in(package, &workdir).await;
        workdir.close_async().await;

        res
    }

    async fn parse_in(&self, package: &Path, workdir: &WorkingDirectory) -> Result<ParseResult> {
        let started = Instant::now();

        let original_size = tokio::fs::metadata(package)
            .await
            .map_err(|e| InspectError::Extraction(format!("{}: {}", package.display(), e)))?
            .len();

        let extracted = self.extractor.extract(package, workdir, &self.config).await?;
        let ExtractedPackage {
            data_dir,
            control_dir,
            manifest,
        } = extracted;

        debug!("parsing control information of {}", package.display());
        let (metadata, scripts, control_files) = tokio::task::spawn_blocking(move || {
            let metadata = parse_control_file(&control_dir)?;
            let scripts = collect_maintainer_scripts(&control_dir);
            let control_files = read_control_files(&control_dir)?;

            Ok::<_, InspectError>((metadata, scripts, control_files))
        })
        .await??;

        debug!("walking data tree of {}", package.display());
        let files = {
            let data_dir = data_dir.clone();
            tokio::task::spawn_blocking(move || walk_data_tree(&data_dir, manifest.as_ref()))
                .await??
        };

        let elf_paths = files
            .iter()
            .filter(|r| r.is_elf)
            .take(self.config.max_elf_files)
            .map(|r| r.path.clone())
            .collect::<Vec<_>>();
        let desktop_paths = files
            .iter()
            .filter(|r| r.file_type == FileType::Desktop)
            .map(|r| r.path.clone())
            .collect::<Vec<_>>();

        let elf_reader = self.elf_reader.clone();
        let max_section_headers = self.config.max_section_headers;
        let elf_budget = self.config.elf_analysis_timeout();
        let elf_info = self
            .analyze_each("ELF analysis", &data_dir, elf_paths, move |path| {
                analyze_elf_file_bounded(elf_reader.clone(), path, max_section_headers, elf_budget)
            })
            .await;

        let desktop_budget = self.config.desktop_analysis_timeout();
        let desktop_info = self
            .analyze_each("desktop analysis", &data_dir, desktop_paths, move |path| {
                run_blocking("desktop analysis", desktop_budget, None, move || {
                    Ok(analyze_desktop_file(&path))
                })
            })
            .await;

        let stats = PackageStats::from_files(&files, original_size, started.elapsed());
        debug!(
            "parsed {} ({} files, {} ELF, {} desktop) in {}ms",
            package.display(),
            stats.file_count,
            stats.elf_count,
            stats.desktop_count,
            stats.parse_time
        );

        Ok(ParseResult {
            metadata,
            files,
            scripts,
            control_files,
            elf_info: if elf_info.is_empty() {
                None
            } else {
                Some(elf_info)
            },
            desktop_info: if desktop_info.is_empty() {
                None
            } else {
                Some(desktop_info)
            },
            stats,
        })
    }

    /// Run `analyze` over files beneath `root` with bounded concurrency.
    ///
    /// Failed files are logged and left out.
    async fn analyze_each<T, F, Fut>(
        &self,
        what: &'static str,
        root: &Path,
        paths: Vec<String>,
        analyze: F,
    ) -> BTreeMap<String, T>
    where
        T: Send,
        F: Fn(PathBuf) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let fs = paths.into_iter().map(|path| {
            let analysis = analyze(root.join(&path));

            async move { (path, analysis.await) }
        });

        let mut buffered = futures::stream::iter(fs).buffered(self.config.concurrency());

        let mut results = BTreeMap::new();
        while let Some((path, res)) = buffered.next().await {
            match res {
                Ok(value) => {
                    results.insert(path, value);
                }
                Err(e) => {
                    warn!("{} of {} failed (ignoring): {}", what, path, e);
                }
            }
        }

        results
    }

    /// Preview the content of one member of a package's data archive.
    ///
    /// `member` is relative to the archive root. Absolute paths, `..`
    /// components and paths through symlinks fail with [InspectError::Read].
    /// `max_lines` defaults to the configured preview line cap.
    pub async fn preview_member(
        &self,
        package: &Path,
        member: &str,
        max_lines: Option<usize>,
    ) -> Result<FileContent> {
        let relative = member_path(member)?;
        let max_lines = max_lines.unwrap_or(self.config.preview_max_lines);

        let workdir = WorkingDirectory::create(&self.config.work_root())?;

        let res: Result<FileContent> = async {
            let extracted = self.extractor.extract(package, &workdir, &self.config).await?;
            let data_dir = extracted.data_dir;

            tokio::task::spawn_blocking(move || {
                let full_path = resolve_without_symlinks(&data_dir, &relative)?;
                let mut content = read_file_content(&full_path, max_lines)?;
                content.path = relative_display(&relative);

                Ok::<_, InspectError>(content)
            })
            .await?
        }
        .await;

        workdir.close_async().await;

        res
    }
}

fn member_path(member: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();

    for component in Path::new(member).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(InspectError::Read(format!(
                    "{}: path must be relative to the package root",
                    member
                )));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(InspectError::Read("empty member path".to_string()));
    }

    Ok(relative)
}

fn relative_display(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn resolve_without_symlinks(root: &Path, relative: &Path) -> Result<PathBuf> {
    let mut path = root.to_path_buf();

    for component in relative.components() {
        path.push(component);

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| {
            InspectError::Read(format!("{}: {}", relative_display(relative), e))
        })?;

        if metadata.file_type().is_symlink() {
            return Err(InspectError::Read(format!(
                "{}: refusing to follow symlink",
                relative_display(relative)
            )));
        }
    }

    Ok(path)
}
