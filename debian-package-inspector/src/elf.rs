// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ELF file introspection.

Analysis is split into independent sub-analyses behind the [ElfReader] trait.
Each returns an `Option` and a failure in one never affects the others;
[analyze_elf_data()] aggregates whatever succeeded into an [ElfAnalysis].
[analyze_elf_file_bounded()] additionally gives every sub-analysis its own
time budget, so a stalled reader only loses the facet it was working on.
*/

use {
    crate::{
        error::{InspectError, Result},
        task::run_blocking,
    },
    log::{debug, warn},
    object::{
        elf,
        read::elf::{Dyn, FileHeader, ProgramHeader, SectionHeader},
        Endianness, FileKind,
    },
    serde::Serialize,
    std::{
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
};

/// The 4 bytes every ELF file starts with.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Summary of the ELF file header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ElfHeader {
    /// Short object type name, e.g. `EXEC` or `DYN`.
    pub object_type: String,
    /// Human readable machine architecture.
    pub machine: String,
    /// Entry point address as a hex string.
    pub entry: String,
}

/// Reads individual facts out of ELF file data.
///
/// Every method is independent and returns `None` when that facet cannot be
/// determined.
pub trait ElfReader: Send + Sync {
    /// Object type, machine and entry point.
    fn header(&self, data: &[u8]) -> Option<ElfHeader>;

    /// One summary line per program header, in table order.
    fn program_headers(&self, data: &[u8]) -> Option<Vec<String>>;

    /// One summary line per section header, in table order.
    fn section_headers(&self, data: &[u8]) -> Option<Vec<String>>;

    /// Library names from `DT_NEEDED` entries of the dynamic section.
    fn dependencies(&self, data: &[u8]) -> Option<Vec<String>>;

    /// Program interpreter path from the `PT_INTERP` segment.
    fn interpreter(&self, data: &[u8]) -> Option<String>;
}

/// Analysis results for a single ELF file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElfAnalysis {
    #[serde(rename = "type")]
    pub object_type: String,
    pub machine: String,
    pub entry: String,
    pub program_headers: Vec<String>,
    pub section_headers: Vec<String>,
    /// Section headers left out of [Self::section_headers] by the cap.
    #[serde(skip_serializing_if = "is_zero")]
    pub section_headers_omitted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

fn is_zero(v: &usize) -> bool {
    *v == 0
}

/// Run every sub-analysis of `reader` over `data` and aggregate the results.
///
/// Header fields fall back to `unknown`, `unknown` and `0x0`. At most
/// `max_section_headers` section header lines are kept.
pub fn analyze_elf_data(
    reader: &dyn ElfReader,
    data: &[u8],
    max_section_headers: usize,
) -> ElfAnalysis {
    assemble(
        reader.header(data),
        reader.program_headers(data),
        reader.section_headers(data),
        reader.dependencies(data),
        reader.interpreter(data),
        max_section_headers,
    )
}

fn assemble(
    header: Option<ElfHeader>,
    program_headers: Option<Vec<String>>,
    section_headers: Option<Vec<String>>,
    dependencies: Option<Vec<String>>,
    interpreter: Option<String>,
    max_section_headers: usize,
) -> ElfAnalysis {
    let (object_type, machine, entry) = match header {
        Some(h) => (h.object_type, h.machine, h.entry),
        None => {
            debug!("ELF header unavailable");
            ("unknown".to_string(), "unknown".to_string(), "0x0".to_string())
        }
    };

    let mut section_headers = section_headers.unwrap_or_default();
    let section_headers_omitted = section_headers.len().saturating_sub(max_section_headers);
    section_headers.truncate(max_section_headers);

    ElfAnalysis {
        object_type,
        machine,
        entry,
        program_headers: program_headers.unwrap_or_default(),
        section_headers,
        section_headers_omitted,
        dependencies: dependencies.filter(|deps| !deps.is_empty()),
        interpreter,
    }
}

/// Read a file and analyze it with [analyze_elf_data()].
///
/// Only reading the file can fail.
pub fn analyze_elf_file(
    reader: &dyn ElfReader,
    path: &Path,
    max_section_headers: usize,
) -> Result<ElfAnalysis> {
    let data = std::fs::read(path)
        .map_err(|e| InspectError::Read(format!("{}: {}", path.display(), e)))?;

    Ok(analyze_elf_data(reader, &data, max_section_headers))
}

/// Run one sub-analysis on the blocking pool, treating a timeout as no result.
async fn bounded<T, F>(
    what: &'static str,
    path: &Path,
    budget: Duration,
    reader: &Arc<dyn ElfReader>,
    data: &Arc<[u8]>,
    f: F,
) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ElfReader, &[u8]) -> Option<T> + Send + 'static,
{
    let reader = reader.clone();
    let data = data.clone();

    match run_blocking(what, budget, None, move || Ok(f(reader.as_ref(), &data[..]))).await {
        Ok(value) => value,
        Err(e) => {
            warn!("{} of {} failed (ignoring): {}", what, path.display(), e);
            None
        }
    }
}

/// Read a file and analyze it, giving every sub-analysis its own `budget`.
///
/// Sub-analyses run concurrently. One that exceeds its budget contributes
/// nothing, exactly like one returning `None`. Only reading the file can
/// fail.
pub async fn analyze_elf_file_bounded(
    reader: Arc<dyn ElfReader>,
    path: PathBuf,
    max_section_headers: usize,
    budget: Duration,
) -> Result<ElfAnalysis> {
    let data: Arc<[u8]> = {
        let path = path.clone();
        run_blocking("ELF read", budget, None, move || {
            std::fs::read(&path)
                .map_err(|e| InspectError::Read(format!("{}: {}", path.display(), e)))
        })
        .await?
        .into()
    };

    let (header, program_headers, section_headers, dependencies, interpreter) = tokio::join!(
        bounded("ELF header", &path, budget, &reader, &data, |r, d| r.header(d)),
        bounded("ELF program headers", &path, budget, &reader, &data, |r, d| {
            r.program_headers(d)
        }),
        bounded("ELF section headers", &path, budget, &reader, &data, |r, d| {
            r.section_headers(d)
        }),
        bounded("ELF dependencies", &path, budget, &reader, &data, |r, d| {
            r.dependencies(d)
        }),
        bounded("ELF interpreter", &path, budget, &reader, &data, |r, d| {
            r.interpreter(d)
        }),
    );

    Ok(assemble(
        header,
        program_headers,
        section_headers,
        dependencies,
        interpreter,
        max_section_headers,
    ))
}

/// An [ElfReader] parsing in process with the `object` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectElfReader;

impl ObjectElfReader {
    fn dispatch<T>(
        data: &[u8],
        elf32: fn(&[u8]) -> Option<T>,
        elf64: fn(&[u8]) -> Option<T>,
    ) -> Option<T> {
        match FileKind::parse(data).ok()? {
            FileKind::Elf32 => elf32(data),
            FileKind::Elf64 => elf64(data),
            _ => None,
        }
    }
}

type Elf32 = elf::FileHeader32<Endianness>;
type Elf64 = elf::FileHeader64<Endianness>;

impl ElfReader for ObjectElfReader {
    fn header(&self, data: &[u8]) -> Option<ElfHeader> {
        Self::dispatch(data, read_header::<Elf32>, read_header::<Elf64>)
    }

    fn program_headers(&self, data: &[u8]) -> Option<Vec<String>> {
        Self::dispatch(
            data,
            read_program_headers::<Elf32>,
            read_program_headers::<Elf64>,
        )
    }

    fn section_headers(&self, data: &[u8]) -> Option<Vec<String>> {
        Self::dispatch(
            data,
            read_section_headers::<Elf32>,
            read_section_headers::<Elf64>,
        )
    }

    fn dependencies(&self, data: &[u8]) -> Option<Vec<String>> {
        Self::dispatch(data, read_needed::<Elf32>, read_needed::<Elf64>)
    }

    fn interpreter(&self, data: &[u8]) -> Option<String> {
        Self::dispatch(data, read_interpreter::<Elf32>, read_interpreter::<Elf64>)
    }
}

fn read_header<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<ElfHeader> {
    let f = Elf::parse(data).ok()?;
    let endian = f.endian().ok()?;
    let entry: u64 = f.e_entry(endian).into();

    Some(ElfHeader {
        object_type: object_type_name(f.e_type(endian)),
        machine: machine_name(f.e_machine(endian)),
        entry: format!("{:#x}", entry),
    })
}

fn read_program_headers<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<Vec<String>> {
    let f = Elf::parse(data).ok()?;
    let endian = f.endian().ok()?;

    Some(
        f.program_headers(endian, data)
            .ok()?
            .iter()
            .map(|ph| {
                let offset: u64 = ph.p_offset(endian).into();
                let vaddr: u64 = ph.p_vaddr(endian).into();
                let paddr: u64 = ph.p_paddr(endian).into();
                let file_size: u64 = ph.p_filesz(endian).into();
                let memory_size: u64 = ph.p_memsz(endian).into();
                let align: u64 = ph.p_align(endian).into();

                format!(
                    "{:<14} 0x{:06x} 0x{:016x} 0x{:016x} 0x{:06x} 0x{:06x} {} {:#x}",
                    segment_type_name(ph.p_type(endian)),
                    offset,
                    vaddr,
                    paddr,
                    file_size,
                    memory_size,
                    segment_flags(ph.p_flags(endian)),
                    align,
                )
            })
            .collect(),
    )
}

fn read_section_headers<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<Vec<String>> {
    let f = Elf::parse(data).ok()?;
    let endian = f.endian().ok()?;
    let sections = f.sections(endian, data).ok()?;

    Some(
        sections
            .iter()
            .enumerate()
            .map(|(index, section)| {
                let name = sections
                    .section_name(endian, section)
                    .map(|name| String::from_utf8_lossy(name).to_string())
                    .unwrap_or_else(|_| "<corrupt>".to_string());
                let address: u64 = section.sh_addr(endian).into();
                let offset: u64 = section.sh_offset(endian).into();
                let size: u64 = section.sh_size(endian).into();

                format!(
                    "[{:2}] {:<18} {:<14} {:016x} {:08x} {:016x}",
                    index,
                    name,
                    section_type_name(section.sh_type(endian)),
                    address,
                    offset,
                    size,
                )
            })
            .collect(),
    )
}

fn read_needed<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<Vec<String>> {
    let f = Elf::parse(data).ok()?;
    let endian = f.endian().ok()?;
    let sections = f.sections(endian, data).ok()?;

    let mut needed = vec![];
    let mut found_dynamic = false;

    for section in sections.iter() {
        if let Some((entries, index)) = section.dynamic(endian, data).ok()? {
            found_dynamic = true;
            let strings = sections.strings(endian, data, index).unwrap_or_default();

            for entry in entries {
                if entry.tag32(endian) == Some(elf::DT_NEEDED) {
                    let value = entry.string(endian, strings).ok()?;
                    needed.push(String::from_utf8_lossy(value).to_string());
                }
            }
        }
    }

    // Files stripped of section headers still carry the PT_DYNAMIC segment.
    if !found_dynamic {
        return read_needed_from_segment(f, endian, data);
    }

    Some(needed)
}

fn read_needed_from_segment<Elf: FileHeader<Endian = Endianness>>(
    f: &Elf,
    endian: Endianness,
    data: &[u8],
) -> Option<Vec<String>> {
    let segments = f.program_headers(endian, data).ok()?;
    let entries = segments
        .iter()
        .find_map(|ph| ph.dynamic(endian, data).ok().flatten())?;

    let mut strtab: Option<u64> = None;
    let mut strsz: Option<u64> = None;
    for entry in entries {
        match entry.tag32(endian) {
            Some(elf::DT_STRTAB) => strtab = Some(entry.d_val(endian).into()),
            Some(elf::DT_STRSZ) => strsz = Some(entry.d_val(endian).into()),
            _ => {}
        }
    }
    let (strtab, strsz) = (strtab?, strsz?);

    // DT_STRTAB is a virtual address. Map it through the load segment holding it.
    let offset = segments
        .iter()
        .filter(|ph| ph.p_type(endian) == elf::PT_LOAD)
        .find_map(|ph| {
            let vaddr: u64 = ph.p_vaddr(endian).into();
            let file_size: u64 = ph.p_filesz(endian).into();
            let offset: u64 = ph.p_offset(endian).into();

            if strtab >= vaddr && strtab - vaddr < file_size {
                Some(offset + (strtab - vaddr))
            } else {
                None
            }
        })?;

    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(strsz).ok()?)?;
    let strings = data.get(start..end)?;

    let mut needed = vec![];
    for entry in entries {
        if entry.tag32(endian) == Some(elf::DT_NEEDED) {
            let index: u64 = entry.d_val(endian).into();
            let tail = strings.get(usize::try_from(index).ok()?..)?;
            let len = tail.iter().position(|b| *b == 0)?;
            needed.push(String::from_utf8_lossy(&tail[..len]).to_string());
        }
    }

    Some(needed)
}

fn read_interpreter<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<String> {
    let f = Elf::parse(data).ok()?;
    let endian = f.endian().ok()?;

    f.program_headers(endian, data)
        .ok()?
        .iter()
        .find(|ph| ph.p_type(endian) == elf::PT_INTERP)
        .and_then(|ph| ph.data(endian, data).ok())
        .map(|path| {
            let end = path.iter().position(|b| *b == 0).unwrap_or(path.len());
            String::from_utf8_lossy(&path[..end]).to_string()
        })
}

/// Short name of an `e_type` value.
pub fn object_type_name(value: u16) -> String {
    match value {
        elf::ET_NONE => "NONE".to_string(),
        elf::ET_REL => "REL".to_string(),
        elf::ET_EXEC => "EXEC".to_string(),
        elf::ET_DYN => "DYN".to_string(),
        elf::ET_CORE => "CORE".to_string(),
        _ => format!("{:#x}", value),
    }
}

/// Descriptive name of an `e_machine` value.
pub fn machine_name(value: u16) -> String {
    let name = match value {
        elf::EM_NONE => "None",
        elf::EM_SPARC => "Sparc",
        elf::EM_386 => "Intel 80386",
        elf::EM_68K => "MC68000",
        elf::EM_MIPS => "MIPS R3000",
        elf::EM_PARISC => "HPPA",
        elf::EM_SPARCV9 => "Sparc v9",
        elf::EM_PPC => "PowerPC",
        elf::EM_PPC64 => "PowerPC64",
        elf::EM_S390 => "IBM S/390",
        elf::EM_ARM => "ARM",
        elf::EM_SH => "Renesas / SuperH SH",
        elf::EM_IA_64 => "Intel IA-64",
        elf::EM_X86_64 => "Advanced Micro Devices X86-64",
        elf::EM_AARCH64 => "AArch64",
        elf::EM_RISCV => "RISC-V",
        elf::EM_BPF => "Linux BPF",
        // EM_LOONGARCH
        258 => "LoongArch",
        _ => return format!("<unknown>: {:#x}", value),
    };

    name.to_string()
}

fn segment_type_name(value: u32) -> String {
    let name = match value {
        elf::PT_NULL => "NULL",
        elf::PT_LOAD => "LOAD",
        elf::PT_DYNAMIC => "DYNAMIC",
        elf::PT_INTERP => "INTERP",
        elf::PT_NOTE => "NOTE",
        elf::PT_SHLIB => "SHLIB",
        elf::PT_PHDR => "PHDR",
        elf::PT_TLS => "TLS",
        elf::PT_GNU_EH_FRAME => "GNU_EH_FRAME",
        elf::PT_GNU_STACK => "GNU_STACK",
        elf::PT_GNU_RELRO => "GNU_RELRO",
        // PT_GNU_PROPERTY
        0x6474_e553 => "GNU_PROPERTY",
        _ => return format!("{:#x}", value),
    };

    name.to_string()
}

fn segment_flags(flags: u32) -> String {
    [
        (elf::PF_R, 'R'),
        (elf::PF_W, 'W'),
        (elf::PF_X, 'E'),
    ]
    .iter()
    .map(|(bit, c)| if flags & bit != 0 { *c } else { ' ' })
    .collect()
}

fn section_type_name(value: u32) -> String {
    let name = match value {
        elf::SHT_NULL => "NULL",
        elf::SHT_PROGBITS => "PROGBITS",
        elf::SHT_SYMTAB => "SYMTAB",
        elf::SHT_STRTAB => "STRTAB",
        elf::SHT_RELA => "RELA",
        elf::SHT_HASH => "HASH",
        elf::SHT_DYNAMIC => "DYNAMIC",
        elf::SHT_NOTE => "NOTE",
        elf::SHT_NOBITS => "NOBITS",
        elf::SHT_REL => "REL",
        elf::SHT_SHLIB => "SHLIB",
        elf::SHT_DYNSYM => "DYNSYM",
        elf::SHT_INIT_ARRAY => "INIT_ARRAY",
        elf::SHT_FINI_ARRAY => "FINI_ARRAY",
        elf::SHT_PREINIT_ARRAY => "PREINIT_ARRAY",
        elf::SHT_GROUP => "GROUP",
        elf::SHT_SYMTAB_SHNDX => "SYMTAB SECTION INDICES",
        elf::SHT_GNU_HASH => "GNU_HASH",
        elf::SHT_GNU_VERDEF => "VERDEF",
        elf::SHT_GNU_VERNEED => "VERNEED",
        elf::SHT_GNU_VERSYM => "VERSYM",
        _ => return format!("{:#x}", value),
    };

    name.to_string()
}
