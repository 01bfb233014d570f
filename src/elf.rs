//! 32-bit ELF records and the lookups the packer needs on a PRX image.
//!
//! All offsets stored in the records are relative to the start of the ELF
//! image, which for a PBP is not the start of the file.

use std::ffi::CStr;

use crate::{
    error::Error,
    utils::{AsBytes, ByteReader, ByteWriter, TryFromBytes},
};

pub const ELF_MAGIC: u32 = 0x464C457F;
pub const ELF_TYPE_PRX: u16 = 0xFFA0;

/// Loadable segment. The PSP toolchain also tags the module info segment
/// with it.
pub const PT_LOAD: u32 = 1;

/// High bit of `p_paddr` on the module info segment marks a kernel module.
pub const MODINFO_KERNEL_BIT: u32 = 0x8000_0000;

#[derive(Clone)]
#[cfg_attr(feature = "dev", derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct Elf32Ehdr {
    pub e_magic: u32,
    pub e_class: u8,
    pub e_data: u8,
    pub e_idver: u8,
    pub pad: [u8; 9],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl TryFromBytes for Elf32Ehdr {
    const SIZE: usize = 0x34;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            e_magic: r.u32()?,
            e_class: r.u8()?,
            e_data: r.u8()?,
            e_idver: r.u8()?,
            pad: r.array()?,
            e_type: r.u16()?,
            e_machine: r.u16()?,
            e_version: r.u32()?,
            e_entry: r.u32()?,
            e_phoff: r.u32()?,
            e_shoff: r.u32()?,
            e_flags: r.u32()?,
            e_ehsize: r.u16()?,
            e_phentsize: r.u16()?,
            e_phnum: r.u16()?,
            e_shentsize: r.u16()?,
            e_shnum: r.u16()?,
            e_shstrndx: r.u16()?,
        })
    }

    fn validate(src: &Self) -> Result<&Self, Error> {
        // Without the ELF magic there is nothing a PRX could be made of.
        if src.e_magic != ELF_MAGIC {
            return Err(Error::NotPrx);
        }
        Ok(src)
    }
}

impl AsBytes for Elf32Ehdr {
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.u32(self.e_magic)?;
        w.u8(self.e_class)?;
        w.u8(self.e_data)?;
        w.u8(self.e_idver)?;
        w.bytes(&self.pad)?;
        w.u16(self.e_type)?;
        w.u16(self.e_machine)?;
        w.u32(self.e_version)?;
        w.u32(self.e_entry)?;
        w.u32(self.e_phoff)?;
        w.u32(self.e_shoff)?;
        w.u32(self.e_flags)?;
        w.u16(self.e_ehsize)?;
        w.u16(self.e_phentsize)?;
        w.u16(self.e_phnum)?;
        w.u16(self.e_shentsize)?;
        w.u16(self.e_shnum)?;
        w.u16(self.e_shstrndx)
    }
}

impl Elf32Ehdr {
    #[inline]
    pub fn is_prx(&self) -> bool {
        self.e_type == ELF_TYPE_PRX
    }
}

#[derive(Clone)]
#[cfg_attr(feature = "dev", derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct Elf32Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

impl TryFromBytes for Elf32Phdr {
    const SIZE: usize = 0x20;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            p_type: r.u32()?,
            p_offset: r.u32()?,
            p_vaddr: r.u32()?,
            p_paddr: r.u32()?,
            p_filesz: r.u32()?,
            p_memsz: r.u32()?,
            p_flags: r.u32()?,
            p_align: r.u32()?,
        })
    }
}

impl AsBytes for Elf32Phdr {
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.u32s(&[
            self.p_type,
            self.p_offset,
            self.p_vaddr,
            self.p_paddr,
            self.p_filesz,
            self.p_memsz,
            self.p_flags,
            self.p_align,
        ])
    }
}

impl Elf32Phdr {
    /// Whether the module info segment flags the module as kernel mode.
    #[inline]
    pub fn is_kernel_module_info(&self) -> bool {
        self.p_paddr & MODINFO_KERNEL_BIT != 0
    }

    /// File offset of the module info record within the ELF image.
    #[inline]
    pub fn module_info_offset(&self) -> u32 {
        self.p_paddr & !MODINFO_KERNEL_BIT
    }
}

#[derive(Clone)]
#[cfg_attr(feature = "dev", derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct Elf32Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u32,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

impl TryFromBytes for Elf32Shdr {
    const SIZE: usize = 0x28;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            sh_name: r.u32()?,
            sh_type: r.u32()?,
            sh_flags: r.u32()?,
            sh_addr: r.u32()?,
            sh_offset: r.u32()?,
            sh_size: r.u32()?,
            sh_link: r.u32()?,
            sh_info: r.u32()?,
            sh_addralign: r.u32()?,
            sh_entsize: r.u32()?,
        })
    }
}

impl AsBytes for Elf32Shdr {
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.u32s(&[
            self.sh_name,
            self.sh_type,
            self.sh_flags,
            self.sh_addr,
            self.sh_offset,
            self.sh_size,
            self.sh_link,
            self.sh_info,
            self.sh_addralign,
            self.sh_entsize,
        ])
    }
}

/// Read-only view over the ELF part of a PSP executable.
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    header: Elf32Ehdr,
}

impl<'a> ElfImage<'a> {
    /// Parses the ELF header at the start of `bytes`.
    ///
    /// `bytes` must cover exactly the ELF image, every lookup is bounded by
    /// it.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        let header = Elf32Ehdr::from_bytes(bytes)?;
        Ok(Self { bytes, header })
    }

    pub fn header(&self) -> &Elf32Ehdr {
        &self.header
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn slice_from(&self, offset: usize) -> Result<&'a [u8], Error> {
        self.bytes.get(offset..).ok_or(Error::FileTooSmall)
    }

    fn program_header(&self, index: usize) -> Result<Elf32Phdr, Error> {
        let offset = self.header.e_phoff as usize + index * Elf32Phdr::SIZE;
        Elf32Phdr::from_bytes(self.slice_from(offset)?)
    }

    /// The first `count` program headers, in table order.
    pub fn program_headers(&self, count: usize) -> Result<Box<[Elf32Phdr]>, Error> {
        let phdr_slice = self.slice_from(self.header.e_phoff as usize)?;
        Elf32Phdr::from_bytes_with_elems(phdr_slice, count)
    }

    pub fn section_headers(&self) -> Result<Box<[Elf32Shdr]>, Error> {
        let shdr_slice = self.slice_from(self.header.e_shoff as usize)?;
        Elf32Shdr::from_bytes_with_elems(shdr_slice, self.header.e_shnum as usize)
    }

    /// Finds the module info program header.
    ///
    /// Only the first `PT_LOAD` entry is a candidate: if its virtual and
    /// physical addresses are equal it is an ordinary segment and the module
    /// has no module info, even when a later entry would qualify.
    pub fn find_module_info_phdr(&self) -> Result<Option<Elf32Phdr>, Error> {
        for i in 0..self.header.e_phnum as usize {
            let phdr = self.program_header(i)?;
            if phdr.p_type != PT_LOAD {
                continue;
            }

            if phdr.p_vaddr != phdr.p_paddr {
                return Ok(Some(phdr));
            }
            break;
        }

        Ok(None)
    }

    /// Name of `shdr`, looked up in the section name string table.
    pub fn section_name(&self, strtab: &Elf32Shdr, shdr: &Elf32Shdr) -> Result<&'a CStr, Error> {
        let name_start = strtab.sh_offset as usize + shdr.sh_name as usize;
        let name = self.slice_from(name_start)?;
        Ok(CStr::from_bytes_until_nul(name)?)
    }

    /// First section whose name is exactly `name`.
    pub fn find_section(&self, name: &CStr) -> Result<Option<Elf32Shdr>, Error> {
        let shdrs = self.section_headers()?;
        if shdrs.is_empty() {
            return Ok(None);
        }
        let strtab = shdrs.get(self.header.e_shstrndx as usize).ok_or(Error::FileTooSmall)?;

        for shdr in shdrs.iter() {
            if self.section_name(strtab, shdr)? == name {
                return Ok(Some(shdr.clone()));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ehdr(phnum: u16, shnum: u16) -> Elf32Ehdr {
        Elf32Ehdr {
            e_magic: ELF_MAGIC,
            e_class: 1,
            e_data: 1,
            e_idver: 1,
            pad: [0; 9],
            e_type: ELF_TYPE_PRX,
            e_machine: 8,
            e_version: 1,
            e_entry: 0x100,
            e_phoff: Elf32Ehdr::SIZE as u32,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: Elf32Ehdr::SIZE as u16,
            e_phentsize: Elf32Phdr::SIZE as u16,
            e_phnum: phnum,
            e_shentsize: Elf32Shdr::SIZE as u16,
            e_shnum: shnum,
            e_shstrndx: 0,
        }
    }

    fn phdr(p_type: u32, vaddr: u32, paddr: u32) -> Elf32Phdr {
        Elf32Phdr {
            p_type,
            p_offset: 0,
            p_vaddr: vaddr,
            p_paddr: paddr,
            p_filesz: 0,
            p_memsz: 0x40,
            p_flags: 5,
            p_align: 0x10,
        }
    }

    fn image(phdrs: &[Elf32Phdr]) -> Vec<u8> {
        let mut out = ehdr(phdrs.len() as u16, 0).to_bytes().unwrap();
        for p in phdrs {
            out.extend(p.to_bytes().unwrap());
        }
        out
    }

    fn shdr(name: u32, offset: u32, size: u32) -> Elf32Shdr {
        Elf32Shdr {
            sh_name: name,
            sh_type: 1,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: offset,
            sh_size: size,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 4,
            sh_entsize: 0,
        }
    }

    #[test]
    fn header_encoding_matches_standard_layout() {
        let bytes = ehdr(3, 7).to_bytes().unwrap();

        assert_eq!(bytes.len(), 0x34);
        assert_eq!(bytes[..4], *b"\x7FELF");
        assert_eq!(bytes[0x10..0x12], [0xA0, 0xFF]);
        assert_eq!(bytes[0x18..0x1C], 0x100u32.to_le_bytes());
        assert_eq!(bytes[0x1C..0x20], 0x34u32.to_le_bytes());
        assert_eq!(bytes[0x2C..0x2E], 3u16.to_le_bytes());
        assert_eq!(bytes[0x30..0x32], 7u16.to_le_bytes());
    }

    #[test]
    fn bad_magic_is_not_prx() {
        let mut bytes = ehdr(0, 0).to_bytes().unwrap();
        bytes[0] = 0;
        assert!(matches!(ElfImage::parse(&bytes), Err(Error::NotPrx)));
    }

    #[test]
    fn module_info_kernel_bit() {
        let user = phdr(PT_LOAD, 0, 0x0000_1234);
        let kernel = phdr(PT_LOAD, 0, 0x8000_1234);

        assert!(!user.is_kernel_module_info());
        assert!(kernel.is_kernel_module_info());
        assert_eq!(kernel.module_info_offset(), 0x1234);
    }

    #[test]
    fn finds_module_info_after_other_types() {
        let bytes = image(&[phdr(0x7000_00A0, 0, 0), phdr(PT_LOAD, 0, 0x8000_0200)]);
        let elf = ElfImage::parse(&bytes).unwrap();

        let found = elf.find_module_info_phdr().unwrap().unwrap();
        assert_eq!(found.p_paddr, 0x8000_0200);
    }

    #[test]
    fn only_first_load_segment_is_considered() {
        let bytes = image(&[phdr(PT_LOAD, 0x100, 0x100), phdr(PT_LOAD, 0, 0x300)]);
        let elf = ElfImage::parse(&bytes).unwrap();

        assert!(elf.find_module_info_phdr().unwrap().is_none());
    }

    #[test]
    fn no_load_segment() {
        let bytes = image(&[phdr(4, 0, 0x300)]);
        let elf = ElfImage::parse(&bytes).unwrap();

        assert!(elf.find_module_info_phdr().unwrap().is_none());
    }

    #[test]
    fn truncated_program_header_table() {
        let mut bytes = image(&[phdr(4, 0, 0)]);
        bytes[0x2C] = 2;
        let elf = ElfImage::parse(&bytes).unwrap();

        assert!(matches!(elf.find_module_info_phdr(), Err(Error::FromBytes { .. })));
    }

    #[test]
    fn section_lookup_is_exact() {
        let strtab = b"\0.shstrtab\0.bss.extra\0.bss\0";
        let mut header = ehdr(0, 3);
        header.e_shoff = Elf32Ehdr::SIZE as u32;
        header.e_shstrndx = 0;
        let strtab_off = Elf32Ehdr::SIZE + 3 * Elf32Shdr::SIZE;

        let mut bytes = header.to_bytes().unwrap();
        bytes.extend(shdr(1, strtab_off as u32, strtab.len() as u32).to_bytes().unwrap());
        bytes.extend(shdr(11, 0, 0x10).to_bytes().unwrap());
        bytes.extend(shdr(22, 0, 0x20).to_bytes().unwrap());
        bytes.extend(strtab);

        let elf = ElfImage::parse(&bytes).unwrap();
        let bss = elf.find_section(c".bss").unwrap().unwrap();
        assert_eq!(bss.sh_size, 0x20);
        assert!(elf.find_section(c".BSS").unwrap().is_none());
    }

    #[test]
    fn no_sections_means_no_match() {
        let mut header = ehdr(0, 0);
        header.e_shstrndx = 0;
        let bytes = header.to_bytes().unwrap();

        let elf = ElfImage::parse(&bytes).unwrap();
        assert!(elf.find_section(c".bss").unwrap().is_none());
    }
}
