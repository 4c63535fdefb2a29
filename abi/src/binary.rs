//! Memory-maps an ELF shared object and exposes its symbol table and
//! DWARF sections. Only the x86-64 System V target is supported; other
//! architectures are detected and reported, not silently misread.

use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use goblin::elf::Elf;

use crate::error::{Error, Result};

/// The subset of architectures this crate can classify. Anything else
/// is parsed far enough to be reported as [`Error::UnsupportedArchitecture`]
/// rather than panicking on a malformed e_machine match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Other,
}

impl Arch {
    fn from_e_machine(e_machine: u16) -> Arch {
        match e_machine {
            goblin::elf::header::EM_X86_64 => Arch::X86_64,
            _ => Arch::Other,
        }
    }
}

/// A reference-counted memory map, so it can be shared between the
/// binary reader and every [`gimli::Dwarf`] section cursor without
/// cloning the underlying bytes. Implements the traits `gimli` and
/// `goblin` both expect from a borrowed byte buffer.
#[derive(Clone)]
pub struct MappedFile(Rc<memmap2::Mmap>);

impl Deref for MappedFile {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

unsafe impl gimli::StableDeref for MappedFile {}
unsafe impl gimli::CloneStableDeref for MappedFile {}

impl MappedFile {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        // SAFETY: the mapping is read-only for the lifetime of this
        // process and the file is not expected to be truncated
        // concurrently; this mirrors how every ELF-reading tool in this
        // space maps its input.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
        Ok(MappedFile(Rc::new(mmap)))
    }
}

/// A function or data symbol exported (or imported) by the binary.
#[derive(Debug, Clone)]
pub struct RawSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub is_function: bool,
    pub is_import: bool,
}

/// A loaded ELF shared object: its dynamic symbol table plus whichever
/// `.debug_*` sections are present, ready for a [`crate::dwarf::DwarfInfo`]
/// to parse.
pub struct Binary {
    pub path: PathBuf,
    pub arch: Arch,
    data: MappedFile,
    pub symbols: Vec<RawSymbol>,
}

impl Binary {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = MappedFile::open(&path)?;
        let elf = Elf::parse(&data)?;

        let arch = Arch::from_e_machine(elf.header.e_machine);

        let symbols = read_dynsyms(&elf);

        Ok(Binary { path, arch, data, symbols })
    }

    /// Returns the raw section data for `name` (e.g. `.debug_info`), or
    /// an empty slice if the section is absent — matching `gimli`'s
    /// convention that a missing optional section is an empty one, not
    /// an error.
    pub fn section_data(&self, name: &str) -> &[u8] {
        let elf = match Elf::parse(&self.data) {
            Ok(elf) => elf,
            Err(_) => return &[],
        };
        for section in &elf.section_headers {
            if let Some(section_name) = elf.shdr_strtab.get_at(section.sh_name) {
                if section_name == name {
                    let start = section.sh_offset as usize;
                    let end = start + section.sh_size as usize;
                    if end <= self.data.len() {
                        return &self.data[start..end];
                    }
                }
            }
        }
        &[]
    }

    pub fn raw_data(&self) -> MappedFile {
        self.data.clone()
    }
}

fn read_dynsyms(elf: &Elf) -> Vec<RawSymbol> {
    let mut out = Vec::new();
    for sym in elf.dynsyms.iter() {
        if sym.st_name == 0 {
            continue;
        }
        let name = match elf.dynstrtab.get_at(sym.st_name) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => continue,
        };
        out.push(RawSymbol {
            name,
            address: sym.st_value,
            size: sym.st_size,
            is_function: sym.is_function(),
            is_import: sym.is_import(),
        });
    }
    out
}
