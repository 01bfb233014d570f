//! Packing of a PRX, bare or inside a PBP, into a `~PSP` container.

use std::ops::Range;

use crate::{
    elf::{ELF_MAGIC, ElfImage},
    error::Error,
    gzip,
    psp::{
        self, ExecutableKind, PBP_HEADER_MAGIC, PSP_HEADER_MAGIC, PbpHeader, PspHeader,
        SceModuleInfo,
    },
    utils::{AsBytes, TryFromBytes},
};

/// Packs `exec` in place.
///
/// `psp_tag_of` and `oe_tag_of` choose the header tags for the detected kind
/// of executable. On error `exec` is left exactly as it was; on success it is
/// replaced by the packed file and the detected kind is returned.
pub fn pack<P, O>(exec: &mut Vec<u8>, psp_tag_of: P, oe_tag_of: O) -> Result<ExecutableKind, Error>
where
    P: Fn(ExecutableKind) -> u32,
    O: Fn(ExecutableKind) -> u32,
{
    let (mut packed, kind) = pack_impl(exec, &psp_tag_of, &oe_tag_of)?;
    std::mem::swap(exec, &mut packed);
    Ok(kind)
}

/// [`pack`] with the stock firmware tags.
pub fn pack_with_default_tags(exec: &mut Vec<u8>) -> Result<ExecutableKind, Error> {
    pack(exec, psp::default_psp_tag, psp::default_oe_tag)
}

fn pack_impl(
    exec: &[u8], psp_tag_of: &dyn Fn(ExecutableKind) -> u32,
    oe_tag_of: &dyn Fn(ExecutableKind) -> u32,
) -> Result<(Vec<u8>, ExecutableKind), Error> {
    let (mut exec_kind, elf_range) = classify(exec)?;

    let elf_bytes = exec.get(elf_range.clone()).ok_or(Error::FileTooSmall)?;
    if elf_bytes.get(..4) != Some(ELF_MAGIC.to_le_bytes().as_slice()) {
        return Err(Error::NotPrx);
    }
    let elf = ElfImage::parse(elf_bytes)?;
    if !elf.header().is_prx() {
        return Err(Error::NotPrx);
    }

    let mod_info_phdr = elf.find_module_info_phdr()?.ok_or(Error::NoModuleInfo)?;
    let is_kernel_module = mod_info_phdr.is_kernel_module_info();

    let mod_info_start = mod_info_phdr.module_info_offset() as usize;
    let mod_info_slice = elf_bytes.get(mod_info_start..).ok_or(Error::FileTooSmall)?;
    let mut mod_info = SceModuleInfo::from_bytes(mod_info_slice)?;

    if is_kernel_module != mod_info.mod_attr.contains(psp::ModInfoAttribute::KernelMode) {
        return Err(Error::MixedPrivileges);
    }

    if is_kernel_module && exec_kind.is_pbp() {
        return Err(Error::KernelBundleConflict);
    } else if is_kernel_module {
        exec_kind = ExecutableKind::KernelPrx;
    }

    log::debug!(
        "packing {exec_kind} module `{}` (attribute 0x{:04X}, module info at 0x{:08X})",
        String::from_utf8_lossy(mod_info.name()),
        mod_info.mod_attr.bits(),
        mod_info_phdr.p_paddr,
    );

    let mut psp_header = psp::build_header(
        &elf,
        &mod_info_phdr,
        &mod_info,
        exec_kind,
        psp_tag_of(exec_kind),
        oe_tag_of(exec_kind),
    )?;

    log::debug!(
        "{} segment(s), bss 0x{:X}, decrypt mode {:?}, devkit 0x{:08X}",
        psp_header.num_segments,
        psp_header.bss_size,
        psp_header.decrypt_mode,
        psp_header.devkit_version,
    );

    // The compressed ELF carries the attribute as stored in the header.
    let mut elf_image = elf_bytes.to_vec();
    mod_info.mod_attr = psp_header.attribute;
    mod_info.write_bytes(&mut elf_image[mod_info_start..])?;

    let compressed = gzip::gzip_compress(&elf_image)?;

    psp_header.comp_size = u32::try_from(compressed.len()).map_err(|_| Error::FileTooBig)?;
    psp_header.psp_size = psp_header
        .comp_size
        .checked_add(PspHeader::SIZE as u32)
        .ok_or(Error::FileTooBig)?;

    log::debug!(
        "compressed 0x{:X} bytes of ELF into 0x{:X} bytes of container",
        elf_bytes.len(),
        psp_header.psp_size
    );

    let packed = reframe(exec, elf_range, &psp_header, &compressed, exec_kind)?;
    Ok((packed, exec_kind))
}

/// Finds what kind of file `exec` is and where its ELF lives.
fn classify(exec: &[u8]) -> Result<(ExecutableKind, Range<usize>), Error> {
    let file_magic = exec.first_chunk::<4>().ok_or(Error::FileTooSmall)?;

    match u32::from_le_bytes(*file_magic) {
        PSP_HEADER_MAGIC => Err(Error::AlreadyPacked),
        PBP_HEADER_MAGIC => {
            let pbp = PbpHeader::from_bytes(exec)?;
            Ok((ExecutableKind::Pbp, pbp.prx_range()?))
        },
        _ => Ok((ExecutableKind::UserPrx, 0..exec.len())),
    }
}

/// Builds the output file: `~PSP` header and compressed ELF, plus the
/// surrounding PBP data when there is any.
fn reframe(
    exec: &[u8], elf_range: Range<usize>, psp_header: &PspHeader, compressed: &[u8],
    exec_kind: ExecutableKind,
) -> Result<Vec<u8>, Error> {
    let (before, after) = if exec_kind.is_pbp() {
        (&exec[..elf_range.start], &exec[elf_range.end..])
    } else {
        (&[][..], &[][..])
    };

    let mut packed =
        Vec::with_capacity(before.len() + PspHeader::SIZE + compressed.len() + after.len());
    packed.extend_from_slice(before);
    packed.extend_from_slice(&psp_header.to_bytes()?);
    packed.extend_from_slice(compressed);
    packed.extend_from_slice(after);

    if exec_kind.is_pbp() {
        let mut pbp = PbpHeader::from_bytes(&packed)?;
        pbp.psar_offset = pbp
            .prx_offset
            .checked_add(psp_header.psp_size)
            .ok_or(Error::FileTooBig)?;
        pbp.write_bytes(&mut packed)?;
    }

    Ok(packed)
}
