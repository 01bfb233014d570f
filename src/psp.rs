//! PSP specific records: the PBP container header, the module info record
//! embedded in every PRX and the `~PSP` header written in front of the
//! compressed ELF.

use std::{fmt, ops::Range};

use bitflag_attr::bitflag;
use rand::Rng;

#[cfg(feature = "dev")]
use bstr::ByteSlice;

use crate::{
    elf::{Elf32Phdr, ElfImage},
    error::Error,
    utils::{self, AsBytes, ByteReader, ByteWriter, TryFromBytes},
};

pub const PSP_HEADER_MAGIC: u32 = 0x5053507E;
pub const PBP_HEADER_MAGIC: u32 = 0x50425000;

/// Maximum number of segments the `~PSP` header can describe.
pub const MAX_SEGMENTS: usize = 4;

/// Visible bytes of a module name, a NUL always follows.
pub const MODULE_NAME_LEN: usize = 27;

/// `comp_attribute` value for a gzip compressed payload.
const COMP_ATTRIBUTE_GZIP: u16 = 1;

#[derive(Clone)]
#[cfg_attr(feature = "dev", derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct PbpHeader {
    pub magic: u32,
    pub version: u32,
    pub sfo_offset: u32,
    pub icon0_offset: u32,
    pub icon1_offset: u32,
    pub pic0_offset: u32,
    pub pic1_offset: u32,
    pub snd0_offset: u32,
    pub prx_offset: u32,
    pub psar_offset: u32,
}

impl PbpHeader {
    /// Byte range of the PRX inside the PBP file.
    ///
    /// The PRX may not overlap the PBP header.
    pub fn prx_range(&self) -> Result<Range<usize>, Error> {
        if self.prx_offset < Self::SIZE as u32 || self.prx_offset > self.psar_offset {
            return Err(Error::MalformedPbp {
                prx_offset: self.prx_offset,
                psar_offset: self.psar_offset,
            });
        }
        Ok(self.prx_offset as usize..self.psar_offset as usize)
    }
}

impl TryFromBytes for PbpHeader {
    const SIZE: usize = 0x28;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, Error> {
        let [
            magic,
            version,
            sfo_offset,
            icon0_offset,
            icon1_offset,
            pic0_offset,
            pic1_offset,
            snd0_offset,
            prx_offset,
            psar_offset,
        ] = r.u32s::<10>()?;

        Ok(Self {
            magic,
            version,
            sfo_offset,
            icon0_offset,
            icon1_offset,
            pic0_offset,
            pic1_offset,
            snd0_offset,
            prx_offset,
            psar_offset,
        })
    }
}

impl AsBytes for PbpHeader {
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.u32s(&[
            self.magic,
            self.version,
            self.sfo_offset,
            self.icon0_offset,
            self.icon1_offset,
            self.pic0_offset,
            self.pic1_offset,
            self.snd0_offset,
            self.prx_offset,
            self.psar_offset,
        ])
    }
}

/// `SceModuleInfo` as laid out in the PRX (32-bit pointers).
#[derive(Clone)]
#[cfg_attr(feature = "dev", derive(PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct SceModuleInfo {
    pub mod_attr: ModInfoAttribute,
    pub mod_version_low: u8,
    pub mod_version_high: u8,
    pub mod_name: [u8; MODULE_NAME_LEN],
    pub terminal: u8,
    pub gp_value: u32,
    pub ent_top: u32,
    pub ent_end: u32,
    pub stub_top: u32,
    pub stub_end: u32,
}

impl SceModuleInfo {
    /// Module name up to (excluding) the first NUL, at most 27 bytes.
    pub fn name(&self) -> &[u8] {
        let len = self.mod_name.iter().position(|&b| b == 0).unwrap_or(MODULE_NAME_LEN);
        &self.mod_name[..len]
    }
}

#[cfg(feature = "dev")]
impl fmt::Debug for SceModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceModuleInfo")
            .field("mod_attr", &self.mod_attr)
            .field("mod_version_low", &self.mod_version_low)
            .field("mod_version_high", &self.mod_version_high)
            .field("mod_name", &self.mod_name.as_bstr())
            .field("terminal", &self.terminal)
            .field("gp_value", &format_args!("0x{:08X}", self.gp_value))
            .field("ent_top", &format_args!("0x{:08X}", self.ent_top))
            .field("ent_end", &format_args!("0x{:08X}", self.ent_end))
            .field("stub_top", &format_args!("0x{:08X}", self.stub_top))
            .field("stub_end", &format_args!("0x{:08X}", self.stub_end))
            .finish()
    }
}

impl TryFromBytes for SceModuleInfo {
    const SIZE: usize = 0x34;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            mod_attr: ModInfoAttribute::from_bits_retain(r.u16()?),
            mod_version_low: r.u8()?,
            mod_version_high: r.u8()?,
            mod_name: r.array()?,
            terminal: r.u8()?,
            gp_value: r.u32()?,
            ent_top: r.u32()?,
            ent_end: r.u32()?,
            stub_top: r.u32()?,
            stub_end: r.u32()?,
        })
    }
}

impl AsBytes for SceModuleInfo {
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.u16(self.mod_attr.bits())?;
        w.u8(self.mod_version_low)?;
        w.u8(self.mod_version_high)?;
        w.bytes(&self.mod_name)?;
        w.u8(self.terminal)?;
        w.u32s(&[self.gp_value, self.ent_top, self.ent_end, self.stub_top, self.stub_end])
    }
}

#[cfg_attr(feature = "dev", derive(PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct PspHeader {
    pub signature: u32,
    pub attribute: ModInfoAttribute,
    pub comp_attribute: u16,
    pub module_version_low: u8,
    pub module_version_high: u8,
    pub module_name: [u8; 28],
    pub version: u8,
    pub num_segments: u8,
    pub elf_size: u32,
    pub psp_size: u32,
    pub entry: u32,
    pub module_info_offset: u32,
    pub bss_size: u32,
    pub seg_align: [u16; MAX_SEGMENTS],
    pub seg_addr: [u32; MAX_SEGMENTS],
    pub seg_size: [u32; MAX_SEGMENTS],
    pub reserved: [u32; 5],
    pub devkit_version: u32,
    pub decrypt_mode: DecryptMode,
    pub padding: u8,
    pub overlap_size: u16,
    pub key_data0: [u8; 0x30],
    pub comp_size: u32,
    pub _80: u32,
    pub reserved2: [u32; 2],
    pub key_data1: [u8; 0x10],
    pub tag: u32,
    pub scheck: [u8; 0x58],
    pub key_data2: u32,
    pub oe_tag: u32,
    pub key_data3: [u8; 0x1C],
}

#[cfg(feature = "dev")]
impl fmt::Debug for PspHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PspHeader")
            .field("signature", &format_args!("0x{:08X}", self.signature))
            .field("attribute", &self.attribute)
            .field("comp_attribute", &self.comp_attribute)
            .field("module_version_low", &self.module_version_low)
            .field("module_version_high", &self.module_version_high)
            .field("module_name", &self.module_name.as_bstr())
            .field("version", &self.version)
            .field("num_segments", &self.num_segments)
            .field("elf_size", &self.elf_size)
            .field("psp_size", &self.psp_size)
            .field("entry", &format_args!("0x{:08X}", self.entry))
            .field("module_info_offset", &format_args!("0x{:08X}", self.module_info_offset))
            .field("bss_size", &self.bss_size)
            .field("seg_align", &format_args!("{:?}", self.seg_align))
            .field("seg_addr", &format_args!("{:08X?}", self.seg_addr))
            .field("seg_size", &format_args!("{:?}", self.seg_size))
            .field("devkit_version", &format_args!("0x{:08X}", self.devkit_version))
            .field("decrypt_mode", &self.decrypt_mode)
            .field("comp_size", &self.comp_size)
            .field("tag", &format_args!("0x{:08X}", self.tag))
            .field("oe_tag", &format_args!("0x{:08X}", self.oe_tag))
            .finish_non_exhaustive()
    }
}

impl Default for PspHeader {
    fn default() -> Self {
        Self {
            signature: PSP_HEADER_MAGIC,
            attribute: Default::default(),
            comp_attribute: Default::default(),
            module_version_low: Default::default(),
            module_version_high: Default::default(),
            module_name: Default::default(),
            version: 1,
            num_segments: Default::default(),
            elf_size: Default::default(),
            psp_size: Default::default(),
            entry: Default::default(),
            module_info_offset: Default::default(),
            bss_size: Default::default(),
            seg_align: Default::default(),
            seg_addr: Default::default(),
            seg_size: Default::default(),
            reserved: Default::default(),
            devkit_version: Default::default(),
            decrypt_mode: Default::default(),
            padding: Default::default(),
            overlap_size: Default::default(),
            key_data0: [0; 0x30],
            comp_size: Default::default(),
            _80: 0x80,
            reserved2: Default::default(),
            key_data1: Default::default(),
            tag: Default::default(),
            scheck: [0; 0x58],
            key_data2: Default::default(),
            oe_tag: Default::default(),
            key_data3: Default::default(),
        }
    }
}

impl TryFromBytes for PspHeader {
    const SIZE: usize = 0x150;

    fn read_fields(r: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            signature: r.u32()?,
            attribute: ModInfoAttribute::from_bits_retain(r.u16()?),
            comp_attribute: r.u16()?,
            module_version_low: r.u8()?,
            module_version_high: r.u8()?,
            module_name: r.array()?,
            version: r.u8()?,
            num_segments: r.u8()?,
            elf_size: r.u32()?,
            psp_size: r.u32()?,
            entry: r.u32()?,
            module_info_offset: r.u32()?,
            bss_size: r.u32()?,
            seg_align: r.u16s()?,
            seg_addr: r.u32s()?,
            seg_size: r.u32s()?,
            reserved: r.u32s()?,
            devkit_version: r.u32()?,
            decrypt_mode: DecryptMode::from_raw(r.u8()?),
            padding: r.u8()?,
            overlap_size: r.u16()?,
            key_data0: r.array()?,
            comp_size: r.u32()?,
            _80: r.u32()?,
            reserved2: r.u32s()?,
            key_data1: r.array()?,
            tag: r.u32()?,
            scheck: r.array()?,
            key_data2: r.u32()?,
            oe_tag: r.u32()?,
            key_data3: r.array()?,
        })
    }
}

impl AsBytes for PspHeader {
    fn write_fields(&self, w: &mut ByteWriter<'_>) -> Result<(), Error> {
        w.u32(self.signature)?;
        w.u16(self.attribute.bits())?;
        w.u16(self.comp_attribute)?;
        w.u8(self.module_version_low)?;
        w.u8(self.module_version_high)?;
        w.bytes(&self.module_name)?;
        w.u8(self.version)?;
        w.u8(self.num_segments)?;
        w.u32s(&[
            self.elf_size,
            self.psp_size,
            self.entry,
            self.module_info_offset,
            self.bss_size,
        ])?;
        w.u16s(&self.seg_align)?;
        w.u32s(&self.seg_addr)?;
        w.u32s(&self.seg_size)?;
        w.u32s(&self.reserved)?;
        w.u32(self.devkit_version)?;
        w.u8(self.decrypt_mode as u8)?;
        w.u8(self.padding)?;
        w.u16(self.overlap_size)?;
        w.bytes(&self.key_data0)?;
        w.u32(self.comp_size)?;
        w.u32(self._80)?;
        w.u32s(&self.reserved2)?;
        w.bytes(&self.key_data1)?;
        w.u32(self.tag)?;
        w.bytes(&self.scheck)?;
        w.u32(self.key_data2)?;
        w.u32(self.oe_tag)?;
        w.bytes(&self.key_data3)
    }
}

#[bitflag(u16)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModInfoAttribute {
    /// Kernel mode
    KernelMode = 0x1000,
    /// Boot mode
    BootMode = 0x2000,
    /// VSH/XMB API (updater)
    VshAPI = 0x0800,
    /// App API (comics, etc)
    AppAPI = 0x0600,
    /// USB and WLAN API (skype, etc)
    UsbWlanAPI = 0x0400,
    /// MS API
    MsAPI  = 0x0200,
}

#[repr(u8)]
#[cfg_attr(feature = "dev", derive(PartialOrd, Ord))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DecryptMode {
    /// Value not produced by this packer (only seen when decoding).
    Unknown = 0x0,
    Kernel = 0x2,
    Vsh    = 0x3,
    #[default]
    Standard = 0x4,
    UsbWlan = 0xA,
    Updater = 0xC,
    Ms     = 0xD,
    App    = 0xE,
}

impl DecryptMode {
    fn from_raw(v: u8) -> Self {
        match v {
            0x2 => Self::Kernel,
            0x3 => Self::Vsh,
            0x4 => Self::Standard,
            0xA => Self::UsbWlan,
            0xC => Self::Updater,
            0xD => Self::Ms,
            0xE => Self::App,
            _ => Self::Unknown,
        }
    }
}

/// Loader settings implied by a module's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptSettings {
    pub mode: DecryptMode,
    /// Zero when the firmware does not need a specific devkit version.
    pub devkit_version: u32,
    /// Attribute to store, possibly with extra API bits set.
    pub attribute: ModInfoAttribute,
}

/// Picks the decryption mode and devkit version for a module.
///
/// The API checks for PBPs go from the most to the least privileged API, a
/// module requesting several APIs gets the strongest one.
pub fn derive_decrypt_mode(attribute: ModInfoAttribute, is_pbp: bool) -> DecryptSettings {
    let mut attribute = attribute;
    let mut devkit_version = 0;

    let mode = if attribute.contains(ModInfoAttribute::KernelMode) {
        devkit_version = if attribute.contains(ModInfoAttribute::BootMode) {
            0x06060110
        } else {
            0x05070110
        };
        DecryptMode::Kernel
    } else if is_pbp {
        if attribute.intersects(ModInfoAttribute::VshAPI) {
            DecryptMode::Updater
        } else if attribute.intersects(ModInfoAttribute::AppAPI) {
            DecryptMode::App
        } else if attribute.intersects(ModInfoAttribute::UsbWlanAPI) {
            DecryptMode::UsbWlan
        } else {
            attribute |= ModInfoAttribute::MsAPI;
            DecryptMode::Ms
        }
    } else if attribute.intersects(ModInfoAttribute::VshAPI) {
        DecryptMode::Vsh
    } else {
        devkit_version = 0x05070210;
        DecryptMode::Standard
    };

    DecryptSettings {
        mode,
        devkit_version,
        attribute,
    }
}

impl PspHeader {
    /// Starts a header for the module described by `mod_info`.
    ///
    /// `module_info_offset` is the raw physical address of the module info
    /// segment, kernel bit included.
    pub fn for_module(mod_info: &SceModuleInfo, module_info_offset: u32) -> Self {
        let mut header = PspHeader {
            attribute: mod_info.mod_attr,
            module_info_offset,
            comp_attribute: COMP_ATTRIBUTE_GZIP,
            module_version_low: mod_info.mod_version_low,
            module_version_high: mod_info.mod_version_high,
            ..Default::default()
        };
        header.set_module_name(mod_info.name());
        header
    }

    /// Copies `name` as a C string, truncated to 27 bytes.
    pub fn set_module_name(&mut self, name: &[u8]) {
        let name = name.split(|&b| b == 0).next().unwrap_or_default();
        let len = name.len().min(MODULE_NAME_LEN);

        self.module_name = [0; 28];
        self.module_name[..len].copy_from_slice(&name[..len]);
    }

    pub fn set_decrypt_mode(&mut self, is_pbp: bool) {
        let settings = derive_decrypt_mode(self.attribute, is_pbp);

        self.attribute = settings.attribute;
        self.devkit_version = settings.devkit_version;
        self.decrypt_mode = settings.mode;
    }

    /// Copies the first `num_segments` program headers into the segment
    /// table and returns the size of `.bss`.
    pub fn read_segments_bss_info(&mut self, elf: &ElfImage<'_>) -> Result<u32, Error> {
        let phdrs = elf.program_headers(self.num_segments as usize)?;

        for (i, phdr) in phdrs.iter().enumerate().take(MAX_SEGMENTS) {
            self.seg_align[i] = phdr.p_align as u16;
            self.seg_addr[i] = phdr.p_vaddr;
            self.seg_size[i] = phdr.p_memsz;
            log::trace!(
                "segment {i}: addr 0x{:08X} size 0x{:X} align 0x{:X}",
                phdr.p_vaddr,
                phdr.p_memsz,
                phdr.p_align
            );
        }

        let bss = elf.find_section(c".bss")?.ok_or(Error::NoBssSection)?;
        self.bss_size = bss.sh_size;
        Ok(bss.sh_size)
    }

    /// Fills the key areas with random placeholder data.
    pub fn fill_key_data(&mut self, rnd: &mut impl Rng) {
        rnd.fill(&mut self.key_data0);
        rnd.fill(&mut self.key_data1);
        rnd.fill(&mut self.key_data3);
    }

    pub fn module_name(&self) -> &[u8] {
        let len = self.module_name.iter().position(|&b| b == 0).unwrap_or(28);
        &self.module_name[..len]
    }
}

/// Assembles every header field that does not depend on the compressed
/// payload. Sizes of the compressed data are set once it exists.
pub fn build_header(
    elf: &ElfImage<'_>, mod_info_phdr: &Elf32Phdr, mod_info: &SceModuleInfo, kind: ExecutableKind,
    psp_tag: u32, oe_tag: u32,
) -> Result<PspHeader, Error> {
    let elf_header = elf.header();
    let mut psp_header = PspHeader::for_module(mod_info, mod_info_phdr.p_paddr);

    psp_header.elf_size = u32::try_from(elf.bytes().len()).map_err(|_| Error::FileTooBig)?;
    psp_header.entry = elf_header.e_entry;

    psp_header.num_segments = match elf_header.e_phnum as usize {
        0 => return Err(Error::NoSegments),
        n => n.min(MAX_SEGMENTS) as u8,
    };

    psp_header.read_segments_bss_info(elf)?;
    psp_header.set_decrypt_mode(kind.is_pbp());

    psp_header.tag = psp_tag;
    psp_header.oe_tag = oe_tag;

    psp_header.fill_key_data(&mut utils::rand());

    Ok(psp_header)
}

#[repr(u8)]
#[cfg_attr(feature = "dev", derive(PartialOrd, Ord))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutableKind {
    UserPrx,
    KernelPrx,
    Pbp,
}

impl ExecutableKind {
    pub fn is_pbp(&self) -> bool {
        matches!(self, ExecutableKind::Pbp)
    }
}

impl fmt::Display for ExecutableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableKind::UserPrx => f.pad("User PRX"),
            ExecutableKind::KernelPrx => f.pad("Kernel PRX"),
            ExecutableKind::Pbp => f.pad("PBP"),
        }
    }
}

/// Tag checked by the firmware loader for each kind of executable.
pub fn default_psp_tag(kind: ExecutableKind) -> u32 {
    match kind {
        ExecutableKind::UserPrx => 0x457B06F0,
        ExecutableKind::KernelPrx => 0xDADADAF0,
        ExecutableKind::Pbp => 0xADF305F0,
    }
}

/// Tag checked by custom firmware loaders for each kind of executable.
pub fn default_oe_tag(kind: ExecutableKind) -> u32 {
    match kind {
        ExecutableKind::UserPrx => 0x8555ABF2,
        ExecutableKind::KernelPrx => 0x55668D96,
        ExecutableKind::Pbp => 0x7316308C,
    }
}
