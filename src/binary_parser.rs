use anyhow::{format_err, Context, Error};
use goblin::elf::{header, note, program_header, sym, Elf};
use goblin::Object;
use lazy_static::lazy_static;
use log::*;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref DEFAULT_SEARCH_ROOTS: Vec<PathBuf> = vec![PathBuf::from("/usr/lib/debug")];
}

/// Where to look for separately-installed debug files when a module's own
/// metadata has no symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfoConfig {
    /// Root directories searched for detached debug files, in order.
    pub search_roots: Vec<PathBuf>,
}

impl Default for DebugInfoConfig {
    fn default() -> Self {
        DebugInfoConfig {
            search_roots: DEFAULT_SEARCH_ROOTS.clone(),
        }
    }
}

/// The linkage class of a symbol-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    /// A data object.
    Object,
    /// A function or other executable code.
    Function,
    /// A section marker entry.
    Section,
    /// A source-file marker entry.
    File,
    /// A thread-local storage entry.
    ThreadLocal,
    /// Any other class.
    Other,
}

impl SymbolClass {
    /// Maps an ELF `st_type` to a symbol class.
    pub fn from_elf(st_type: u8) -> SymbolClass {
        match st_type {
            sym::STT_OBJECT => SymbolClass::Object,
            sym::STT_FUNC => SymbolClass::Function,
            sym::STT_SECTION => SymbolClass::Section,
            sym::STT_FILE => SymbolClass::File,
            sym::STT_TLS => SymbolClass::ThreadLocal,
            _ => SymbolClass::Other,
        }
    }

    /// Whether entries of this class name a location in the process image.
    /// Section and file markers don't, and thread-local values are offsets
    /// into per-thread storage rather than addresses.
    pub fn has_runtime_address(self) -> bool {
        !matches!(
            self,
            SymbolClass::Section | SymbolClass::File | SymbolClass::ThreadLocal
        )
    }
}

/// One named entry read out of a module's symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    /// The symbol's name, exactly as recorded in the string table.
    pub name: String,
    /// The symbol's link-time value.
    pub link_value: u64,
    /// The symbol's linkage class.
    pub class: SymbolClass,
}

/// The parsed view of one module's symbol metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    /// Entries in table order.
    pub entries: Vec<SymbolEntry>,
    /// The lowest loadable virtual address recorded in the file.
    pub link_base: u64,
    /// Whether the object is relocated at load time (`ET_DYN`).
    pub position_independent: bool,
}

/// Reads the symbol table of the module backed by the file at `path`.
///
/// Prefers the module's own `.symtab`, then its `.dynsym`; if both are
/// empty, looks for a separately-installed debug file (GNU build-id layout,
/// then `.gnu_debuglink`) under the configured search roots.
pub fn parse_symbol_table(path: &Path, debug_info: &DebugInfoConfig) -> Result<SymbolTable, Error> {
    let file =
        File::open(path).with_context(|| format!("Failed to open binary {}", path.display()))?;
    let buffer = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to map binary {}", path.display()))?;
    parse_object(&buffer, path, Some(debug_info))
}

fn parse_object(
    buffer: &[u8],
    path: &Path,
    debug_info: Option<&DebugInfoConfig>,
) -> Result<SymbolTable, Error> {
    let elf = match Object::parse(buffer)? {
        Object::Elf(elf) => elf,
        _ => return Err(format_err!("Unsupported binary format in {}", path.display())),
    };

    let link_base = elf
        .program_headers
        .iter()
        .filter(|segment| segment.p_type == program_header::PT_LOAD)
        .map(|segment| segment.p_vaddr)
        .min()
        .unwrap_or(0);
    let position_independent = elf.header.e_type == header::ET_DYN;

    let mut entries = collect_symbols(&elf.syms, &elf.strtab);
    if entries.is_empty() {
        debug!("{} has no .symtab, reading .dynsym", path.display());
        entries = collect_symbols(&elf.dynsyms, &elf.dynstrtab);
    }
    if entries.is_empty() {
        if let Some(config) = debug_info {
            if let Some(debug_path) = locate_debug_file(&elf, buffer, path, config) {
                info!(
                    "Reading debug info for {} from {}",
                    path.display(),
                    debug_path.display()
                );
                // The debug file only contributes entries; the load geometry
                // stays that of the module actually mapped into the process.
                entries = parse_symbol_table_no_fallback(&debug_path)?.entries;
            }
        }
    }

    Ok(SymbolTable {
        entries,
        link_base,
        position_independent,
    })
}

fn parse_symbol_table_no_fallback(path: &Path) -> Result<SymbolTable, Error> {
    let file =
        File::open(path).with_context(|| format!("Failed to open debug file {}", path.display()))?;
    let buffer = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to map debug file {}", path.display()))?;
    parse_object(&buffer, path, None)
}

fn collect_symbols(symtab: &sym::Symtab<'_>, strtab: &goblin::strtab::Strtab<'_>) -> Vec<SymbolEntry> {
    let mut entries = Vec::with_capacity(symtab.len());
    for symbol in symtab.iter() {
        // Unnamed entries (including the leading null symbol) can never be
        // requested by name.
        let name = match strtab.get_at(symbol.st_name) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => continue,
        };
        entries.push(SymbolEntry {
            name,
            link_value: symbol.st_value,
            class: SymbolClass::from_elf(symbol.st_type()),
        });
    }
    entries
}

fn locate_debug_file<'a>(
    elf: &Elf<'a>,
    buffer: &'a [u8],
    path: &Path,
    config: &DebugInfoConfig,
) -> Option<PathBuf> {
    if let Some(found) = build_id_file(elf, buffer, config) {
        return Some(found);
    }

    let link_name = debuglink_name(elf, buffer)?;
    debug!("{} names debug file {}", path.display(), link_name);
    let directory = path.parent().unwrap_or_else(|| Path::new("/"));
    let mut candidates = vec![
        directory.join(&link_name),
        directory.join(".debug").join(&link_name),
    ];
    for root in &config.search_roots {
        let suffix = directory.strip_prefix("/").unwrap_or(directory);
        candidates.push(root.join(suffix).join(&link_name));
    }
    candidates
        .into_iter()
        .find(|candidate| candidate != path && candidate.is_file())
}

fn build_id_file<'a>(elf: &Elf<'a>, buffer: &'a [u8], config: &DebugInfoConfig) -> Option<PathBuf> {
    let notes = elf
        .iter_note_headers(buffer)
        .or_else(|| elf.iter_note_sections(buffer, Some(".note.gnu.build-id")))?;
    for entry in notes.flatten() {
        if entry.n_type != note::NT_GNU_BUILD_ID || entry.name.trim_end_matches('\0') != "GNU" {
            continue;
        }
        if entry.desc.len() < 2 {
            continue;
        }
        let id: String = entry.desc.iter().map(|byte| format!("{:02x}", byte)).collect();
        for root in &config.search_roots {
            let candidate = root
                .join(".build-id")
                .join(&id[..2])
                .join(format!("{}.debug", &id[2..]));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

fn debuglink_name<'a>(elf: &Elf<'a>, buffer: &'a [u8]) -> Option<String> {
    for section in &elf.section_headers {
        if elf.shdr_strtab.get_at(section.sh_name) != Some(".gnu_debuglink") {
            continue;
        }
        let range = section.file_range()?;
        let data = buffer.get(range)?;
        // Null-terminated file name, then padding and a CRC we don't check.
        let len = data.iter().position(|byte| *byte == 0)?;
        return std::str::from_utf8(&data[..len]).ok().map(str::to_owned);
    }
    None
}

/// Hand-built ELF objects for symbol-table tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use goblin::elf::section_header::{SHT_STRTAB, SHT_SYMTAB};

    const SIZEOF_EHDR: usize = 64;
    const SIZEOF_PHDR: usize = 56;
    const SIZEOF_SHDR: usize = 64;
    const SIZEOF_SYM: usize = 24;

    /// Builds a minimal 64-bit little-endian ELF object holding a `.symtab`
    /// with the given (name, value, st_type) entries, all GLOBAL-bound.
    /// `load_vaddr` adds a single PT_LOAD segment at that address.
    pub(crate) fn build_object(
        e_type: u16,
        load_vaddr: Option<u64>,
        symbols: &[(&str, u64, u8)],
    ) -> Vec<u8> {
        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, _, _) in symbols {
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }

        // Leading null entry, then one entry per fixture symbol.
        let mut symtab = vec![0u8; SIZEOF_SYM];
        for ((_, value, st_type), name_offset) in symbols.iter().zip(&name_offsets) {
            symtab.extend_from_slice(&name_offset.to_le_bytes());
            symtab.push(0x10 | st_type); // STB_GLOBAL binding
            symtab.push(0); // st_other
            symtab.extend_from_slice(&1u16.to_le_bytes()); // st_shndx
            symtab.extend_from_slice(&value.to_le_bytes());
            symtab.extend_from_slice(&0u64.to_le_bytes()); // st_size
        }

        let shstrtab = b"\0.symtab\0.strtab\0.shstrtab\0".to_vec();

        let phnum = if load_vaddr.is_some() { 1usize } else { 0 };
        let phoff = if phnum > 0 { SIZEOF_EHDR } else { 0 };
        let symtab_off = SIZEOF_EHDR + phnum * SIZEOF_PHDR;
        let strtab_off = symtab_off + symtab.len();
        let shstrtab_off = strtab_off + strtab.len();
        let mut shoff = shstrtab_off + shstrtab.len();
        shoff += (8 - shoff % 8) % 8;

        let mut out = Vec::with_capacity(shoff + 4 * SIZEOF_SHDR);
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]); // ELFCLASS64, LSB
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&e_type.to_le_bytes());
        out.extend_from_slice(&goblin::elf::header::EM_X86_64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        out.extend_from_slice(&(phoff as u64).to_le_bytes());
        out.extend_from_slice(&(shoff as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(SIZEOF_EHDR as u16).to_le_bytes());
        out.extend_from_slice(&(SIZEOF_PHDR as u16).to_le_bytes());
        out.extend_from_slice(&(phnum as u16).to_le_bytes());
        out.extend_from_slice(&(SIZEOF_SHDR as u16).to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&3u16.to_le_bytes()); // e_shstrndx

        if let Some(vaddr) = load_vaddr {
            out.extend_from_slice(&goblin::elf::program_header::PT_LOAD.to_le_bytes());
            out.extend_from_slice(&5u32.to_le_bytes()); // PF_R | PF_X
            out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
            out.extend_from_slice(&vaddr.to_le_bytes());
            out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
            out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_filesz
            out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_memsz
            out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align
        }

        out.extend_from_slice(&symtab);
        out.extend_from_slice(&strtab);
        out.extend_from_slice(&shstrtab);
        out.resize(shoff, 0);

        push_section_header(&mut out, 0, 0, 0, 0, 0, 0, 0);
        push_section_header(&mut out, 1, SHT_SYMTAB, symtab_off, symtab.len(), 2, 1, SIZEOF_SYM as u64);
        push_section_header(&mut out, 9, SHT_STRTAB, strtab_off, strtab.len(), 0, 0, 0);
        push_section_header(&mut out, 17, SHT_STRTAB, shstrtab_off, shstrtab.len(), 0, 0, 0);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn push_section_header(
        out: &mut Vec<u8>,
        sh_name: u32,
        sh_type: u32,
        offset: usize,
        size: usize,
        sh_link: u32,
        sh_info: u32,
        sh_entsize: u64,
    ) {
        out.extend_from_slice(&sh_name.to_le_bytes());
        out.extend_from_slice(&sh_type.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_flags
        out.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
        out.extend_from_slice(&(offset as u64).to_le_bytes());
        out.extend_from_slice(&(size as u64).to_le_bytes());
        out.extend_from_slice(&sh_link.to_le_bytes());
        out.extend_from_slice(&sh_info.to_le_bytes());
        out.extend_from_slice(&8u64.to_le_bytes()); // sh_addralign
        out.extend_from_slice(&sh_entsize.to_le_bytes());
    }
}
