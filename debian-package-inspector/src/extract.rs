// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Unpacking package archives into a working directory. */

use {
    crate::{
        config::{ExtractorBackend, InspectorConfig},
        deb::{
            reader::{find_control_tar, find_data_tar, ArchiveManifest},
            DebError,
        },
        error::{InspectError, Result},
        task::run_blocking,
        workdir::{make_owner_accessible, remove_tree, CancellationFlag, WorkingDirectory},
    },
    async_trait::async_trait,
    log::debug,
    std::{
        ffi::OsStr,
        io::BufReader,
        path::{Path, PathBuf},
        process::Stdio,
        sync::Arc,
        time::Duration,
    },
};

/// Locations of an unpacked package.
#[derive(Clone, Debug)]
pub struct ExtractedPackage {
    /// Root of the unpacked data archive.
    pub data_dir: PathBuf,
    /// Root of the unpacked control archive.
    pub control_dir: PathBuf,
    /// Tar header metadata of data archive members, if the backend records it.
    pub manifest: Option<ArchiveManifest>,
}

/// Unpacks the control and data archives of a binary package.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Unpack `package` beneath `workdir`.
    ///
    /// Data archive failures are [InspectError::Extraction] and control archive
    /// failures are [InspectError::ControlExtraction]. Each step is bounded by
    /// its timeout from `config`.
    async fn extract(
        &self,
        package: &Path,
        workdir: &WorkingDirectory,
        config: &InspectorConfig,
    ) -> Result<ExtractedPackage>;
}

/// Obtain an extractor for a backend.
pub fn extractor_for(backend: ExtractorBackend) -> Arc<dyn ArchiveExtractor> {
    match backend {
        ExtractorBackend::Native => Arc::new(NativeExtractor::default()),
        ExtractorBackend::DpkgDeb => Arc::new(DpkgDebExtractor::default()),
    }
}

#[derive(Clone, Copy, Debug)]
enum Member {
    Control,
    Data,
}

impl Member {
    fn step(self) -> &'static str {
        match self {
            Self::Control => "control extraction",
            Self::Data => "data extraction",
        }
    }

    fn error(self, detail: String) -> InspectError {
        match self {
            Self::Control => InspectError::ControlExtraction(detail),
            Self::Data => InspectError::Extraction(detail),
        }
    }
}

fn unpack_member(
    package: &Path,
    member: Member,
    dest: &Path,
    cancellation: &CancellationFlag,
) -> std::result::Result<ArchiveManifest, DebError> {
    let reader = BufReader::new(std::fs::File::open(package)?);
    std::fs::create_dir_all(dest)?;

    match member {
        Member::Control => find_control_tar(reader)?.unpack_in(dest, cancellation),
        Member::Data => find_data_tar(reader)?.unpack_in(dest, cancellation),
    }
}

/// An [ArchiveExtractor] using in-process ar and tar readers.
///
/// Records a manifest of data archive member ownership and modes.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeExtractor;

impl NativeExtractor {
    async fn unpack(
        &self,
        package: &Path,
        member: Member,
        dest: PathBuf,
        workdir: &WorkingDirectory,
        budget: Duration,
    ) -> Result<ArchiveManifest> {
        let package = package.to_path_buf();
        let root = workdir.path().to_path_buf();
        let cancellation = workdir.cancellation().clone();

        run_blocking(member.step(), budget, Some(workdir.cancellation()), move || {
            match unpack_member(&package, member, &dest, &cancellation) {
                Ok(manifest) => Ok(manifest),
                Err(DebError::Cancelled) => {
                    // The owner may have removed the tree while we were
                    // still writing into it.
                    remove_tree(&root);
                    Err(InspectError::Cancelled)
                }
                Err(e) => Err(member.error(e.to_string())),
            }
        })
        .await
    }
}

#[async_trait]
impl ArchiveExtractor for NativeExtractor {
    async fn extract(
        &self,
        package: &Path,
        workdir: &WorkingDirectory,
        config: &InspectorConfig,
    ) -> Result<ExtractedPackage> {
        let data_dir = workdir.data_dir();
        let control_dir = workdir.control_dir();

        debug!("unpacking data archive of {}", package.display());
        let manifest = self
            .unpack(
                package,
                Member::Data,
                data_dir.clone(),
                workdir,
                config.data_extraction_timeout(),
            )
            .await?;

        debug!("unpacking control archive of {}", package.display());
        self.unpack(
            package,
            Member::Control,
            control_dir.clone(),
            workdir,
            config.control_extraction_timeout(),
        )
        .await?;

        Ok(ExtractedPackage {
            data_dir,
            control_dir,
            manifest: Some(manifest),
        })
    }
}

/// An [ArchiveExtractor] invoking `dpkg-deb`.
///
/// Children are killed when their step times out or the extraction future is
/// dropped.
#[derive(Clone, Debug)]
pub struct DpkgDebExtractor {
    program: PathBuf,
}

impl Default for DpkgDebExtractor {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dpkg-deb"),
        }
    }
}

impl DpkgDebExtractor {
    /// Use a specific `dpkg-deb` executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Whether the configured program can be executed.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    async fn run(&self, member: Member, args: &[&OsStr], budget: Duration) -> Result<()> {
        let child = tokio::process::Command::new(&self.program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                member.error(format!("unable to run {}: {}", self.program.display(), e))
            })?;

        let output = tokio::time::timeout(budget, child.wait_with_output())
            .await
            .map_err(|_| InspectError::Timeout(member.step(), budget))?
            .map_err(|e| member.error(format!("{}: {}", self.program.display(), e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

            Err(member.error(if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr
            }))
        }
    }
}

#[async_trait]
impl ArchiveExtractor for DpkgDebExtractor {
    async fn extract(
        &self,
        package: &Path,
        workdir: &WorkingDirectory,
        config: &InspectorConfig,
    ) -> Result<ExtractedPackage> {
        let data_dir = workdir.data_dir();
        let control_dir = workdir.control_dir();

        self.run(
            Member::Data,
            &[OsStr::new("--extract"), package.as_os_str(), data_dir.as_os_str()],
            config.data_extraction_timeout(),
        )
        .await?;

        self.run(
            Member::Control,
            &[OsStr::new("--control"), package.as_os_str(), control_dir.as_os_str()],
            config.control_extraction_timeout(),
        )
        .await?;

        // dpkg-deb restores archive modes, which may lock us out.
        let root = workdir.path().to_path_buf();
        run_blocking(
            "permission adjustment",
            config.data_extraction_timeout(),
            None,
            move || {
                make_owner_accessible(&root);
                Ok(())
            },
        )
        .await?;

        Ok(ExtractedPackage {
            data_dir,
            control_dir,
            manifest: None,
        })
    }
}
