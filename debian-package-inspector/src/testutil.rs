// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fixture builders for tests. */

use {
    object::elf,
    std::{
        collections::BTreeSet,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Modification time of every fixture archive member.
pub const FIXTURE_MTIME: u64 = 1_650_000_000;

/// Compression applied to fixture tar members.
#[derive(Clone, Copy, Debug)]
pub enum FixtureCompression {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
    /// Uncompressed content under an extension no reader supports.
    Unknown,
}

impl FixtureCompression {
    fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
            Self::Bzip2 => ".bz2",
            Self::Unknown => ".lz4",
        }
    }

    fn compress(&self, data: Vec<u8>) -> Vec<u8> {
        match self {
            Self::None | Self::Unknown => data,
            Self::Gzip => {
                let mut encoder = libflate::gzip::Encoder::new(vec![]).unwrap();
                encoder.write_all(&data).unwrap();
                encoder.finish().into_result().unwrap()
            }
            Self::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(vec![], 6);
                encoder.write_all(&data).unwrap();
                encoder.finish().unwrap()
            }
            Self::Zstd => zstd::encode_all(std::io::Cursor::new(data), 3).unwrap(),
            Self::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(vec![], bzip2::Compression::default());
                encoder.write_all(&data).unwrap();
                encoder.finish().unwrap()
            }
        }
    }
}

enum FixtureEntry {
    File(Vec<u8>, u32),
    Symlink(String),
}

fn new_tar_header(name: &str, entry_type: tar::EntryType, mode: u32, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root").unwrap();
    header.set_groupname("root").unwrap();
    header.set_mtime(FIXTURE_MTIME);
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);

    // `set_path()` would normalize away the leading `./` found in real packages.
    let name = name.as_bytes();
    let buffer = &mut header.as_old_mut().name;
    assert!(name.len() <= buffer.len(), "fixture path too long");
    buffer[..name.len()].copy_from_slice(name);

    header
}

fn write_tar(entries: &[(String, FixtureEntry)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(vec![]);

    let mut directories = BTreeSet::new();
    for (path, _) in entries {
        let mut parent = Path::new(path).parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                directories.insert(p.to_string_lossy().to_string());
            }
            parent = p.parent();
        }
    }

    let mut header = new_tar_header("./", tar::EntryType::Directory, 0o755, 0);
    header.set_cksum();
    builder.append(&header, std::io::empty()).unwrap();

    for dir in directories {
        let mut header = new_tar_header(
            &format!("./{}/", dir),
            tar::EntryType::Directory,
            0o755,
            0,
        );
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
    }

    for (path, entry) in entries {
        let name = format!("./{}", path);

        match entry {
            FixtureEntry::File(data, mode) => {
                let mut header =
                    new_tar_header(&name, tar::EntryType::Regular, *mode, data.len() as u64);
                header.set_cksum();
                builder.append(&header, data.as_slice()).unwrap();
            }
            FixtureEntry::Symlink(target) => {
                let mut header = new_tar_header(&name, tar::EntryType::Symlink, 0o777, 0);
                header.set_link_name(target).unwrap();
                header.set_cksum();
                builder.append(&header, std::io::empty()).unwrap();
            }
        }
    }

    builder.into_inner().unwrap()
}

/// Builds `.deb` files.
pub struct DebFixture {
    package: String,
    version: String,
    control_text: Option<String>,
    include_control_file: bool,
    include_control_tar: bool,
    raw_control_tar: Option<Vec<u8>>,
    control_files: Vec<(String, FixtureEntry)>,
    data_files: Vec<(String, FixtureEntry)>,
    compression: FixtureCompression,
    architecture: String,
}

impl DebFixture {
    pub fn new(package: &str, version: &str, architecture: &str) -> Self {
        Self {
            package: package.to_string(),
            version: version.to_string(),
            architecture: architecture.to_string(),
            control_text: None,
            include_control_file: true,
            include_control_tar: true,
            raw_control_tar: None,
            control_files: vec![],
            data_files: vec![],
            compression: FixtureCompression::Gzip,
        }
    }

    /// Replace the generated `control` file content.
    pub fn control_text(mut self, text: &str) -> Self {
        self.control_text = Some(text.to_string());
        self
    }

    /// Leave the `control` file out of the control archive.
    pub fn omit_control_file(mut self) -> Self {
        self.include_control_file = false;
        self
    }

    /// Leave the control archive out of the package.
    pub fn without_control(mut self) -> Self {
        self.include_control_tar = false;
        self
    }

    /// Store `data` verbatim as the control archive member.
    pub fn raw_control_tar(mut self, data: &[u8]) -> Self {
        self.raw_control_tar = Some(data.to_vec());
        self
    }

    pub fn compression(mut self, compression: FixtureCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Add a file to the control archive.
    pub fn control_file(mut self, name: &str, data: &[u8], mode: u32) -> Self {
        self.control_files
            .push((name.to_string(), FixtureEntry::File(data.to_vec(), mode)));
        self
    }

    /// Add a file to the data archive.
    pub fn file(mut self, path: &str, data: &[u8], mode: u32) -> Self {
        self.data_files
            .push((path.to_string(), FixtureEntry::File(data.to_vec(), mode)));
        self
    }

    /// Add a symlink to the data archive.
    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.data_files
            .push((path.to_string(), FixtureEntry::Symlink(target.to_string())));
        self
    }

    /// Produce `.deb` file content.
    pub fn build(self) -> Vec<u8> {
        let control_text = self.control_text.clone().unwrap_or_else(|| {
            format!(
                "Package: {}\nVersion: {}\nArchitecture: {}\nMaintainer: Test <test@example.com>\nDescription: test package\n",
                self.package, self.version, self.architecture
            )
        });

        let mut control_entries = vec![];
        if self.include_control_file {
            control_entries.push((
                "control".to_string(),
                FixtureEntry::File(control_text.into_bytes(), 0o644),
            ));
        }
        control_entries.extend(self.control_files);

        let mut data = vec![];
        {
            let mut builder = ar::Builder::new(&mut data);

            let append = |builder: &mut ar::Builder<&mut Vec<u8>>, name: String, content: &[u8]| {
                let mut header = ar::Header::new(name.into_bytes(), content.len() as _);
                header.set_mode(0o644);
                header.set_mtime(FIXTURE_MTIME);
                builder.append(&header, content).unwrap();
            };

            append(&mut builder, "debian-binary".to_string(), b"2.0\n");

            if self.include_control_tar {
                let control_tar = match &self.raw_control_tar {
                    Some(raw) => raw.clone(),
                    None => self.compression.compress(write_tar(&control_entries)),
                };
                append(
                    &mut builder,
                    format!("control.tar{}", self.compression.extension()),
                    &control_tar,
                );
            }

            let data_tar = self.compression.compress(write_tar(&self.data_files));
            append(
                &mut builder,
                format!("data.tar{}", self.compression.extension()),
                &data_tar,
            );
        }

        data
    }
}

/// Write a fixture to `<package>_<version>_<arch>.deb` in `dir`.
pub fn write_package(dir: &Path, fixture: DebFixture) -> PathBuf {
    let path = dir.join(format!(
        "{}_{}_{}.deb",
        fixture.package, fixture.version, fixture.architecture
    ));
    std::fs::write(&path, fixture.build()).unwrap();

    path
}

struct FixtureSection {
    name: &'static str,
    sh_type: u32,
    flags: u64,
    offset: usize,
    size: usize,
    link: u32,
    entsize: u64,
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}

/// Builds small little-endian ELF64 images.
///
/// Layout: file header, program headers, `.interp`, `.dynstr`, `.dynamic`,
/// `.text`, empty extra sections, `.shstrtab`, section headers.
pub struct ElfFixture {
    object_type: u16,
    machine: u16,
    entry: u64,
    interpreter: Option<String>,
    needed: Vec<String>,
    extra_sections: usize,
    section_headers: bool,
}

impl ElfFixture {
    /// A dynamically linked PIE executable needing `libc.so.6`.
    pub fn dynamic() -> Self {
        Self {
            object_type: elf::ET_DYN,
            machine: elf::EM_X86_64,
            entry: 0x401000,
            interpreter: Some("/lib64/ld-linux-x86-64.so.2".to_string()),
            needed: vec!["libc.so.6".to_string()],
            extra_sections: 0,
            section_headers: true,
        }
    }

    /// A statically linked executable without dynamic section or interpreter.
    pub fn static_executable() -> Self {
        Self {
            object_type: elf::ET_EXEC,
            machine: elf::EM_X86_64,
            entry: 0x401000,
            interpreter: None,
            needed: vec![],
            extra_sections: 0,
            section_headers: true,
        }
    }

    pub fn needed(mut self, libraries: &[&str]) -> Self {
        self.needed = libraries.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Add empty `PROGBITS` sections.
    pub fn extra_sections(mut self, count: usize) -> Self {
        self.extra_sections = count;
        self
    }

    /// Leave the section header table out of the file header, as `strip`
    /// tools that drop section headers do.
    pub fn without_section_headers(mut self) -> Self {
        self.section_headers = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        const EHDR_SIZE: usize = 64;
        const PHDR_SIZE: usize = 56;
        const SHDR_SIZE: usize = 64;
        const DYN_SIZE: usize = 16;
        const BASE: u64 = 0x400000;

        let dynamic = !self.needed.is_empty();
        let phnum = 1 + self.interpreter.is_some() as usize + dynamic as usize;

        let mut cursor = EHDR_SIZE + PHDR_SIZE * phnum;
        let mut sections = vec![FixtureSection {
            name: "",
            sh_type: elf::SHT_NULL,
            flags: 0,
            offset: 0,
            size: 0,
            link: 0,
            entsize: 0,
        }];
        let mut blobs: Vec<(usize, Vec<u8>)> = vec![];

        let interp = self.interpreter.as_ref().map(|path| {
            let mut data = path.as_bytes().to_vec();
            data.push(0);
            let offset = cursor;
            cursor += data.len();
            sections.push(FixtureSection {
                name: ".interp",
                sh_type: elf::SHT_PROGBITS,
                flags: elf::SHF_ALLOC as u64,
                offset,
                size: data.len(),
                link: 0,
                entsize: 0,
            });
            blobs.push((offset, data.clone()));
            (offset, data.len())
        });

        let dynamic_segment = if dynamic {
            let mut dynstr = vec![0u8];
            let mut name_offsets = vec![];
            for name in &self.needed {
                name_offsets.push(dynstr.len() as u64);
                dynstr.extend_from_slice(name.as_bytes());
                dynstr.push(0);
            }

            let dynstr_offset = cursor;
            let dynstr_size = dynstr.len() as u64;
            cursor += dynstr.len();
            let dynstr_index = sections.len() as u32;
            sections.push(FixtureSection {
                name: ".dynstr",
                sh_type: elf::SHT_STRTAB,
                flags: elf::SHF_ALLOC as u64,
                offset: dynstr_offset,
                size: dynstr.len(),
                link: 0,
                entsize: 0,
            });
            blobs.push((dynstr_offset, dynstr));

            let mut entries = vec![];
            for offset in name_offsets {
                entries.extend_from_slice(&(elf::DT_NEEDED as i64).to_le_bytes());
                entries.extend_from_slice(&offset.to_le_bytes());
            }
            entries.extend_from_slice(&(elf::DT_STRTAB as i64).to_le_bytes());
            entries.extend_from_slice(&(BASE + dynstr_offset as u64).to_le_bytes());
            entries.extend_from_slice(&(elf::DT_STRSZ as i64).to_le_bytes());
            entries.extend_from_slice(&dynstr_size.to_le_bytes());
            entries.extend_from_slice(&[0u8; DYN_SIZE]);

            cursor = align8(cursor);
            let dynamic_offset = cursor;
            cursor += entries.len();
            sections.push(FixtureSection {
                name: ".dynamic",
                sh_type: elf::SHT_DYNAMIC,
                flags: (elf::SHF_ALLOC | elf::SHF_WRITE) as u64,
                offset: dynamic_offset,
                size: entries.len(),
                link: dynstr_index,
                entsize: DYN_SIZE as u64,
            });
            let size = entries.len();
            blobs.push((dynamic_offset, entries));

            Some((dynamic_offset, size))
        } else {
            None
        };

        let text = vec![0xc3u8; 16];
        let text_offset = cursor;
        cursor += text.len();
        sections.push(FixtureSection {
            name: ".text",
            sh_type: elf::SHT_PROGBITS,
            flags: (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64,
            offset: text_offset,
            size: text.len(),
            link: 0,
            entsize: 0,
        });
        blobs.push((text_offset, text));

        const EXTRA_NAMES: [&str; 16] = [
            ".extra0", ".extra1", ".extra2", ".extra3", ".extra4", ".extra5", ".extra6",
            ".extra7", ".extra8", ".extra9", ".extra10", ".extra11", ".extra12", ".extra13",
            ".extra14", ".extra15",
        ];
        assert!(self.extra_sections <= EXTRA_NAMES.len());
        for name in EXTRA_NAMES.iter().take(self.extra_sections) {
            sections.push(FixtureSection {
                name: *name,
                sh_type: elf::SHT_PROGBITS,
                flags: 0,
                offset: cursor,
                size: 0,
                link: 0,
                entsize: 0,
            });
        }

        sections.push(FixtureSection {
            name: ".shstrtab",
            sh_type: elf::SHT_STRTAB,
            flags: 0,
            offset: 0,
            size: 0,
            link: 0,
            entsize: 0,
        });

        let mut shstrtab = vec![0u8];
        let mut name_offsets = vec![];
        for section in &sections {
            if section.name.is_empty() {
                name_offsets.push(0u32);
            } else {
                name_offsets.push(shstrtab.len() as u32);
                shstrtab.extend_from_slice(section.name.as_bytes());
                shstrtab.push(0);
            }
        }
        let shstrtab_offset = cursor;
        cursor += shstrtab.len();
        if let Some(last) = sections.last_mut() {
            last.offset = shstrtab_offset;
            last.size = shstrtab.len();
        }
        blobs.push((shstrtab_offset, shstrtab));

        let shoff = align8(cursor);
        let total = shoff + SHDR_SIZE * sections.len();
        let mut buf = vec![0u8; total];

        for (offset, data) in blobs {
            put(&mut buf, offset, &data);
        }

        // File header.
        put(&mut buf, 0, &[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        put(&mut buf, 16, &self.object_type.to_le_bytes());
        put(&mut buf, 18, &self.machine.to_le_bytes());
        put(&mut buf, 20, &1u32.to_le_bytes());
        put(&mut buf, 24, &self.entry.to_le_bytes());
        put(&mut buf, 32, &(EHDR_SIZE as u64).to_le_bytes());
        if self.section_headers {
            put(&mut buf, 40, &(shoff as u64).to_le_bytes());
        }
        put(&mut buf, 52, &(EHDR_SIZE as u16).to_le_bytes());
        put(&mut buf, 54, &(PHDR_SIZE as u16).to_le_bytes());
        put(&mut buf, 56, &(phnum as u16).to_le_bytes());
        put(&mut buf, 58, &(SHDR_SIZE as u16).to_le_bytes());
        if self.section_headers {
            put(&mut buf, 60, &(sections.len() as u16).to_le_bytes());
            put(&mut buf, 62, &((sections.len() - 1) as u16).to_le_bytes());
        }

        // Program headers.
        let mut segments = vec![];
        if let Some((offset, size)) = interp {
            segments.push((elf::PT_INTERP, elf::PF_R, offset, size, 1u64));
        }
        segments.push((elf::PT_LOAD, elf::PF_R | elf::PF_X, 0, total, 0x1000));
        if let Some((offset, size)) = dynamic_segment {
            segments.push((elf::PT_DYNAMIC, elf::PF_R | elf::PF_W, offset, size, 8));
        }

        for (i, (p_type, flags, offset, size, align)) in segments.into_iter().enumerate() {
            let base = EHDR_SIZE + i * PHDR_SIZE;
            let address = BASE + offset as u64;
            put(&mut buf, base, &p_type.to_le_bytes());
            put(&mut buf, base + 4, &flags.to_le_bytes());
            put(&mut buf, base + 8, &(offset as u64).to_le_bytes());
            put(&mut buf, base + 16, &address.to_le_bytes());
            put(&mut buf, base + 24, &address.to_le_bytes());
            put(&mut buf, base + 32, &(size as u64).to_le_bytes());
            put(&mut buf, base + 40, &(size as u64).to_le_bytes());
            put(&mut buf, base + 48, &align.to_le_bytes());
        }

        // Section headers.
        for (i, section) in sections.iter().enumerate() {
            let base = shoff + i * SHDR_SIZE;
            let address = if section.flags & elf::SHF_ALLOC as u64 != 0 {
                BASE + section.offset as u64
            } else {
                0
            };
            put(&mut buf, base, &name_offsets[i].to_le_bytes());
            put(&mut buf, base + 4, &section.sh_type.to_le_bytes());
            put(&mut buf, base + 8, &section.flags.to_le_bytes());
            put(&mut buf, base + 16, &address.to_le_bytes());
            put(&mut buf, base + 24, &(section.offset as u64).to_le_bytes());
            put(&mut buf, base + 32, &(section.size as u64).to_le_bytes());
            put(&mut buf, base + 40, &section.link.to_le_bytes());
            put(&mut buf, base + 56, &section.entsize.to_le_bytes());
        }

        buf
    }
}
