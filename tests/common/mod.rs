//! Builders for synthetic PRX and PBP files.
#![allow(dead_code)]

use std::io::Read;

use flate2::read::GzDecoder;
use psp_packer::{
    psp::PspHeader,
    utils::TryFromBytes,
};

pub const EHDR_SIZE: usize = 0x34;
pub const PHDR_SIZE: usize = 0x20;
pub const SHDR_SIZE: usize = 0x28;
pub const MODINFO_SIZE: usize = 0x34;
pub const PSP_HEADER_SIZE: usize = 0x150;

pub struct Segment {
    pub p_type: u32,
    pub vaddr: u32,
    /// `None` points the segment at the module info record.
    pub paddr: Option<u32>,
    pub memsz: u32,
    pub align: u32,
}

impl Segment {
    pub fn module_info() -> Self {
        Self {
            p_type: 1,
            vaddr: 0,
            paddr: None,
            memsz: 0x1000,
            align: 0x40,
        }
    }

    pub fn load(vaddr: u32, memsz: u32, align: u32) -> Self {
        Self {
            p_type: 1,
            vaddr,
            paddr: Some(vaddr),
            memsz,
            align,
        }
    }

    pub fn other(p_type: u32, vaddr: u32, memsz: u32) -> Self {
        Self {
            p_type,
            vaddr,
            paddr: Some(vaddr),
            memsz,
            align: 0x10,
        }
    }
}

pub struct PrxBuilder {
    pub e_type: u16,
    pub entry: u32,
    pub attribute: u16,
    pub version: [u8; 2],
    pub name: [u8; 27],
    pub terminal: u8,
    pub kernel_bit: bool,
    pub segments: Vec<Segment>,
    pub sections: Vec<(&'static str, u32)>,
    pub payload: Vec<u8>,
}

impl Default for PrxBuilder {
    fn default() -> Self {
        let mut name = [0u8; 27];
        name[..10].copy_from_slice(b"TestModule");

        Self {
            e_type: 0xFFA0,
            entry: 0x0000_00A8,
            attribute: 0,
            version: [1, 1],
            name,
            terminal: 0,
            kernel_bit: false,
            segments: vec![Segment::module_info()],
            sections: vec![("", 0), (".text", 0x800), (".data", 0x100), (".bss", 0x240)],
            payload: b"\x08\x00\xE0\x03\x00\x00\x00\x00".repeat(256),
        }
    }
}

impl PrxBuilder {
    pub fn user() -> Self {
        Self::default()
    }

    pub fn kernel() -> Self {
        Self {
            attribute: 0x1000,
            kernel_bit: true,
            ..Self::default()
        }
    }

    pub fn module_info_offset(&self) -> usize {
        EHDR_SIZE + self.segments.len() * PHDR_SIZE
    }

    pub fn build(&self) -> Vec<u8> {
        let modinfo_off = self.module_info_offset();
        let payload_off = modinfo_off + MODINFO_SIZE;
        let strtab_off = payload_off + self.payload.len();

        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, _) in &self.sections {
            if name.is_empty() {
                name_offsets.push(0);
                continue;
            }
            name_offsets.push(strtab.len() as u32);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }
        let shstrtab_name = strtab.len() as u32;
        strtab.extend_from_slice(b".shstrtab\0");

        let shoff = (strtab_off + strtab.len()).next_multiple_of(4);
        let shnum = self.sections.len() + 1;

        let mut out = Vec::new();

        // ELF header
        out.extend_from_slice(b"\x7FELF");
        out.extend_from_slice(&[1, 1, 1]);
        out.extend_from_slice(&[0; 9]);
        put_u16(&mut out, self.e_type);
        put_u16(&mut out, 8);
        put_u32(&mut out, 1);
        put_u32(&mut out, self.entry);
        put_u32(&mut out, EHDR_SIZE as u32);
        put_u32(&mut out, shoff as u32);
        put_u32(&mut out, 0x10A2_3001);
        put_u16(&mut out, EHDR_SIZE as u16);
        put_u16(&mut out, PHDR_SIZE as u16);
        put_u16(&mut out, self.segments.len() as u16);
        put_u16(&mut out, SHDR_SIZE as u16);
        put_u16(&mut out, shnum as u16);
        put_u16(&mut out, (shnum - 1) as u16);
        assert_eq!(out.len(), EHDR_SIZE);

        let kernel = if self.kernel_bit { 0x8000_0000 } else { 0 };
        for seg in &self.segments {
            let paddr = seg.paddr.unwrap_or(modinfo_off as u32 | kernel);
            for v in [seg.p_type, payload_off as u32, seg.vaddr, paddr, 0, seg.memsz, 5, seg.align] {
                put_u32(&mut out, v);
            }
        }

        // Module info
        put_u16(&mut out, self.attribute);
        out.extend_from_slice(&self.version);
        out.extend_from_slice(&self.name);
        out.push(self.terminal);
        for v in [0x0000_8000, 0x100, 0x120, 0x140, 0x160] {
            put_u32(&mut out, v);
        }
        assert_eq!(out.len(), payload_off);

        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&strtab);
        out.resize(shoff, 0);

        for ((_, size), name) in self.sections.iter().zip(&name_offsets) {
            put_shdr(&mut out, *name, 1, payload_off as u32, *size);
        }
        put_shdr(&mut out, shstrtab_name, 3, strtab_off as u32, strtab.len() as u32);

        out
    }
}

fn put_shdr(out: &mut Vec<u8>, name: u32, sh_type: u32, offset: u32, size: u32) {
    for v in [name, sh_type, 0, 0, offset, size, 0, 0, 4, 0] {
        put_u32(out, v);
    }
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

pub fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

/// A PBP with fake assets before the PRX and a fake PSAR after it.
pub struct Pbp {
    pub bytes: Vec<u8>,
    pub prx_offset: usize,
    pub psar_offset: usize,
}

pub fn wrap_in_pbp(prx: &[u8], assets: &[u8], psar: &[u8]) -> Pbp {
    let assets_off = 0x28u32;
    let prx_offset = 0x28 + assets.len();
    let psar_offset = prx_offset + prx.len();

    let mut bytes = Vec::new();
    put_u32(&mut bytes, 0x50425000);
    put_u32(&mut bytes, 0x0001_0000);
    for i in 0..6 {
        put_u32(&mut bytes, assets_off + i * (assets.len() as u32 / 6));
    }
    put_u32(&mut bytes, prx_offset as u32);
    put_u32(&mut bytes, psar_offset as u32);
    bytes.extend_from_slice(assets);
    bytes.extend_from_slice(prx);
    bytes.extend_from_slice(psar);

    Pbp {
        bytes,
        prx_offset,
        psar_offset,
    }
}

/// Splits a packed PRX into its header and the decompressed ELF.
pub fn unpack(packed: &[u8]) -> (PspHeader, Vec<u8>) {
    let header = PspHeader::from_bytes(packed).unwrap();
    let envelope = &packed[PSP_HEADER_SIZE..header.psp_size as usize];

    let mut elf = Vec::new();
    GzDecoder::new(envelope).read_to_end(&mut elf).unwrap();
    (header, elf)
}

pub fn assets() -> Vec<u8> {
    (0..0x180u32).map(|i| (i * 31 % 256) as u8).collect()
}

pub fn psar() -> Vec<u8> {
    b"PSAR\0\0\0\x01".iter().copied().cycle().take(0x200).collect()
}
