// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Maintainer scripts and raw control archive files. */

use {
    crate::error::{InspectError, Result},
    log::warn,
    serde::Serialize,
    std::{collections::BTreeMap, path::Path},
    strum::{AsRefStr, EnumIter, IntoEnumIterator},
};

/// Maintainer scripts a control archive may carry.
#[derive(AsRefStr, Clone, Copy, Debug, EnumIter, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum MaintainerScript {
    Preinst,
    Postinst,
    Prerm,
    Postrm,
    Config,
    Templates,
}

/// Maintainer script contents keyed by script name.
///
/// Scripts absent from the package have no key.
pub type MaintainerScripts = BTreeMap<String, String>;

/// Raw text of well-known control archive files.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFiles {
    pub control: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5sums: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conffiles: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shlibs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggers: Option<String>,
}

/// Read a file as UTF-8 text. Invalid UTF-8 is an [std::io::ErrorKind::InvalidData] error.
fn read_text(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read(path) {
        Ok(data) => String::from_utf8(data)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_optional(path: &Path) -> Option<String> {
    read_text(path).unwrap_or_else(|e| {
        warn!("unable to read {}: {}", path.display(), e);
        None
    })
}

/// Collect the maintainer scripts present in an unpacked control archive.
///
/// Content is kept verbatim. Scripts that are missing, unreadable or not valid
/// UTF-8 are left out.
pub fn collect_maintainer_scripts(control_dir: &Path) -> MaintainerScripts {
    MaintainerScript::iter()
        .filter_map(|script| {
            read_optional(&control_dir.join(script.as_ref()))
                .map(|content| (script.as_ref().to_string(), content))
        })
        .collect()
}

/// Read the raw control archive files.
///
/// Only `control` is required.
pub fn read_control_files(control_dir: &Path) -> Result<ControlFiles> {
    let control_path = control_dir.join("control");
    let control = read_text(&control_path)
        .map_err(|e| InspectError::MetadataParse(format!("{}: {}", control_path.display(), e)))?
        .ok_or_else(|| {
            InspectError::MetadataParse(format!("{}: file not found", control_path.display()))
        })?;

    Ok(ControlFiles {
        control,
        md5sums: read_optional(&control_dir.join("md5sums")),
        conffiles: read_optional(&control_dir.join("conffiles")),
        shlibs: read_optional(&control_dir.join("shlibs")),
        symbols: read_optional(&control_dir.join("symbols")),
        triggers: read_optional(&control_dir.join("triggers")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_names() {
        let names = MaintainerScript::iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>();

        assert_eq!(
            names,
            vec!["preinst", "postinst", "prerm", "postrm", "config", "templates"]
        );
    }

    #[test]
    fn collects_present_scripts_verbatim() {
        let td = tempfile::tempdir().unwrap();
        let postinst = "#!/bin/sh\nset -e\n\nldconfig\n\n";
        std::fs::write(td.path().join("postinst"), postinst).unwrap();
        std::fs::write(td.path().join("templates"), "Template: demo/question\n").unwrap();
        std::fs::write(td.path().join("md5sums"), "abc  usr/bin/demo\n").unwrap();

        let scripts = collect_maintainer_scripts(td.path());
        assert_eq!(scripts.len(), 2);
        assert_eq!(scripts.get("postinst").map(String::as_str), Some(postinst));
        assert!(scripts.contains_key("templates"));
        assert!(!scripts.contains_key("preinst"));
    }

    #[test]
    fn non_utf8_script_is_skipped() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("preinst"), "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::write(td.path().join("postinst"), b"#!/bin/sh\necho \xff\xfe\n").unwrap();
        std::fs::write(td.path().join("control"), "Package: demo\n").unwrap();
        std::fs::write(td.path().join("md5sums"), b"\xff  usr/bin/demo\n").unwrap();

        let scripts = collect_maintainer_scripts(td.path());
        assert_eq!(
            scripts.get("preinst").map(String::as_str),
            Some("#!/bin/sh\nexit 0\n")
        );
        assert!(!scripts.contains_key("postinst"));
        assert!(scripts.values().all(|s| !s.contains('\u{fffd}')));

        let files = read_control_files(td.path()).unwrap();
        assert!(files.md5sums.is_none());

        std::fs::write(td.path().join("control"), b"Package: \xff\n").unwrap();
        assert!(matches!(
            read_control_files(td.path()),
            Err(InspectError::MetadataParse(_))
        ));
    }

    #[test]
    fn optional_control_files() -> Result<()> {
        let td = tempfile::tempdir().unwrap();

        assert!(matches!(
            read_control_files(td.path()),
            Err(InspectError::MetadataParse(_))
        ));

        std::fs::write(td.path().join("control"), "Package: demo\n").unwrap();
        std::fs::write(td.path().join("conffiles"), "/etc/demo.conf\n").unwrap();

        let files = read_control_files(td.path())?;
        assert_eq!(files.control, "Package: demo\n");
        assert!(files.md5sums.is_none());
        assert_eq!(files.conffiles.as_deref(), Some("/etc/demo.conf\n"));
        assert!(files.triggers.is_none());

        let json = serde_json::to_value(&files).unwrap();
        assert!(json.get("md5sums").is_none());
        assert_eq!(json["conffiles"], "/etc/demo.conf\n");

        Ok(())
    }
}
