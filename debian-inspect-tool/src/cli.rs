// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_package_inspector::{
        config::{ExtractorBackend, InspectorConfig},
        InspectError, PackageInspector, ParseResult,
    },
    log::LevelFilter,
    std::{
        ffi::OsStr,
        io::Write,
        path::{Path, PathBuf},
    },
    thiserror::Error,
};

/// Largest package file we agree to inspect.
const MAX_PACKAGE_SIZE: u64 = 500 * 1024 * 1024;

const PACKAGE_EXTENSIONS: &[&str] = &["deb", "udeb"];

const PARSE_ABOUT: &str = "\
Parse a Debian binary package and print everything learned about it as JSON.

The package is unpacked into a private working directory which is removed
once parsing finishes, successfully or not.

The emitted document has the following top-level keys:

metadata
   Fields of the package's `control` file, in file order. `Package`,
   `Version` and `Architecture` are always present.

files
   Every entry of the data archive with its size, mode, owner, modification
   time and type (`file`, `directory`, `symlink`, `elf` or `desktop`).

scripts
   Maintainer scripts (`preinst`, `postinst`, `prerm`, `postrm`, `config`,
   `templates`) keyed by name.

controlFiles
   Raw text of the `control`, `md5sums`, `conffiles`, `shlibs`, `symbols`
   and `triggers` files when present.

elfInfo
   Header, program header, section header, dependency and interpreter
   details of ELF files. Only the first `--max-elf-files` ELF files are
   analyzed. Absent when no ELF file was analyzed.

desktopInfo
   Parsed `[Desktop Entry]` groups of `.desktop` files. Absent when the
   package has none.

stats
   Parse time in milliseconds, package and extracted sizes in bytes and
   file, ELF and desktop counts.
";

const CONFIG_ABOUT: &str = "\
Print the effective inspector configuration as YAML.

The output reflects the defaults, the file given by `--yaml-config` and any
command line overrides, in that order. It can be saved and passed back via
`--yaml-config`.

The YAML document can have the following keys:

data_extraction_timeout_ms (integer)
   Time budget for unpacking the data archive.

control_extraction_timeout_ms (integer)
   Time budget for unpacking the control archive.

elf_analysis_timeout_ms (integer)
   Time budget for each sub-analysis of a single ELF file.

desktop_analysis_timeout_ms (integer)
   Time budget for analyzing a single desktop file.

max_elf_files (integer)
   How many ELF files of a package get analyzed.

max_section_headers (integer)
   How many section header lines an ELF analysis keeps.

analysis_concurrency (integer)
   How many per-file analyses run at once.

extractor (string)
   `native` or `dpkg-deb`.

work_root (string)
   Directory working directories are created in.

preview_max_lines (integer)
   Default line cap for `dit preview`.
";

#[derive(Debug, Error)]
pub enum DitError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Inspect(#[from] InspectError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not a Debian package file: {0}")]
    UnsupportedExtension(String),

    #[error("package file {0} is {1} bytes; the limit is {2} bytes")]
    PackageTooLarge(String, u64, u64),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DitError>;

pub async fn run_cli() -> Result<()> {
    let threads_help = format!(
        "Maximum number of files to analyze in parallel [default: {}]",
        num_cpus::get()
    );

    let app = Command::new("Debian Inspect Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Inspect Debian binary packages")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("yaml-config")
                .long("--yaml-config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML file defining the inspector configuration"),
        )
        .arg(
            Arg::new("extractor")
                .long("--extractor")
                .takes_value(true)
                .possible_values(["native", "dpkg-deb"])
                .global(true)
                .help("How package archives get unpacked"),
        )
        .arg(
            Arg::new("max-elf-files")
                .long("--max-elf-files")
                .takes_value(true)
                .global(true)
                .help("Maximum number of ELF files to analyze"),
        )
        .arg(
            Arg::new("threads")
                .long("--threads")
                .takes_value(true)
                .global(true)
                .help(threads_help.as_str()),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let package_arg = Arg::new("package")
        .required(true)
        .allow_invalid_utf8(true)
        .help("Path to a .deb or .udeb file");

    let app = app.subcommand(
        Command::new("parse")
            .about("Parse a package and print the result as JSON")
            .long_about(PARSE_ABOUT)
            .arg(package_arg.clone())
            .arg(
                Arg::new("compact")
                    .long("--compact")
                    .help("Emit JSON on a single line"),
            ),
    );

    let app = app.subcommand(
        Command::new("summary")
            .about("Print a human readable overview of a package")
            .arg(package_arg.clone()),
    );

    let app = app.subcommand(
        Command::new("preview")
            .about("Print the content of a file in a package")
            .arg(package_arg)
            .arg(
                Arg::new("member")
                    .required(true)
                    .help("Path of the file relative to the package root"),
            )
            .arg(
                Arg::new("max-lines")
                    .long("--max-lines")
                    .takes_value(true)
                    .help("Maximum number of lines to print"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("print-config")
            .about("Print the effective configuration as YAML")
            .long_about(CONFIG_ABOUT),
    );

    let matches = app.clone().get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("parse", args)) => command_parse(args).await,
        Some(("summary", args)) => command_summary(args).await,
        Some(("preview", args)) => command_preview(args).await,
        Some(("print-config", args)) => command_print_config(args),
        Some((command, _)) => Err(DitError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();
}

/// Resolve the inspector configuration from a YAML file and flag overrides.
fn resolve_config(args: &ArgMatches) -> Result<InspectorConfig> {
    let mut config = if let Some(path) = args.value_of_os("yaml-config") {
        let f = std::fs::File::open(path)?;
        serde_yaml::from_reader::<_, InspectorConfig>(f)?
    } else {
        InspectorConfig::default()
    };

    if let Some(value) = args.value_of("extractor") {
        let backend = value
            .parse::<ExtractorBackend>()
            .map_err(|e| DitError::InvalidArgument(format!("--extractor {}: {}", value, e)))?;
        config = config.set_extractor(backend);
    }

    if args.is_present("max-elf-files") {
        config = config.set_max_elf_files(args.value_of_t::<usize>("max-elf-files")?);
    }

    if args.is_present("threads") {
        config = config.set_analysis_concurrency(args.value_of_t::<usize>("threads")?);
    }

    Ok(config)
}

/// Check that `path` names a package file we are willing to inspect.
///
/// The file must carry a `.deb` or `.udeb` extension and be at most
/// [MAX_PACKAGE_SIZE] bytes.
fn validate_package_path(path: &Path) -> Result<()> {
    let extension_ok = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PACKAGE_EXTENSIONS
                .iter()
                .any(|wanted| ext.eq_ignore_ascii_case(wanted))
        })
        .unwrap_or(false);

    if !extension_ok {
        return Err(DitError::UnsupportedExtension(format!("{}", path.display())));
    }

    let size = std::fs::metadata(path)?.len();
    if size > MAX_PACKAGE_SIZE {
        return Err(DitError::PackageTooLarge(
            format!("{}", path.display()),
            size,
            MAX_PACKAGE_SIZE,
        ));
    }

    Ok(())
}

fn package_path(args: &ArgMatches) -> Result<PathBuf> {
    let path = PathBuf::from(
        args.value_of_os("package")
            .unwrap_or_else(|| OsStr::new("")),
    );
    validate_package_path(&path)?;

    Ok(path)
}

async fn command_parse(args: &ArgMatches) -> Result<()> {
    let package = package_path(args)?;
    let inspector = PackageInspector::new(resolve_config(args)?);

    let result = inspector.parse_package(&package).await?;

    let json = if args.is_present("compact") {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", json);

    Ok(())
}

async fn command_summary(args: &ArgMatches) -> Result<()> {
    let package = package_path(args)?;
    let inspector = PackageInspector::new(resolve_config(args)?);

    let result = inspector.parse_package(&package).await?;

    let stdout = std::io::stdout();
    write_summary(&result, &mut stdout.lock())?;

    Ok(())
}

fn write_summary(result: &ParseResult, out: &mut impl Write) -> std::io::Result<()> {
    let metadata = &result.metadata;

    writeln!(out, "Package:      {}", metadata.package())?;
    writeln!(out, "Version:      {}", metadata.version())?;
    writeln!(out, "Architecture: {}", metadata.architecture())?;
    for name in ["Maintainer", "Section", "Depends"] {
        if let Some(value) = metadata.field(name) {
            writeln!(out, "{:<13} {}", format!("{}:", name), value)?;
        }
    }
    if let Some(description) = metadata.field("Description") {
        let synopsis = description.lines().next().unwrap_or_default();
        writeln!(out, "Description:  {}", synopsis)?;
    }

    let stats = &result.stats;
    writeln!(out)?;
    writeln!(
        out,
        "{} entries ({} ELF, {} desktop); {} bytes extracted from {} byte package in {} ms",
        stats.file_count,
        stats.elf_count,
        stats.desktop_count,
        stats.extracted_size,
        stats.original_size,
        stats.parse_time
    )?;

    if !result.scripts.is_empty() {
        let names = result.scripts.keys().cloned().collect::<Vec<_>>();
        writeln!(out, "maintainer scripts: {}", names.join(", "))?;
    }

    if let Some(elf_info) = &result.elf_info {
        writeln!(out)?;
        writeln!(out, "ELF files:")?;
        for (path, analysis) in elf_info {
            writeln!(
                out,
                "  {} ({}, {})",
                path, analysis.object_type, analysis.machine
            )?;
            if let Some(interpreter) = &analysis.interpreter {
                writeln!(out, "    interpreter: {}", interpreter)?;
            }
            if let Some(deps) = &analysis.dependencies {
                writeln!(out, "    needs: {}", deps.join(", "))?;
            }
        }
    }

    if let Some(desktop_info) = &result.desktop_info {
        writeln!(out)?;
        writeln!(out, "desktop entries:")?;
        for (path, entry) in desktop_info {
            match entry.get("Name") {
                Some(name) => writeln!(out, "  {}: {}", path, name)?,
                None => writeln!(out, "  {}", path)?,
            }
        }
    }

    Ok(())
}

async fn command_preview(args: &ArgMatches) -> Result<()> {
    let package = package_path(args)?;
    let inspector = PackageInspector::new(resolve_config(args)?);

    let member = args
        .value_of("member")
        .ok_or_else(|| DitError::InvalidArgument("missing member path".to_string()))?;
    let max_lines = if args.is_present("max-lines") {
        Some(args.value_of_t::<usize>("max-lines")?)
    } else {
        None
    };

    let content = inspector
        .preview_member(&package, member, max_lines)
        .await?;

    println!("{}", content.content);

    Ok(())
}

fn command_print_config(args: &ArgMatches) -> Result<()> {
    let config = resolve_config(args)?;

    print!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
