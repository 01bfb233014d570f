//! Minimal gzip envelope around a raw DEFLATE stream.
//!
//! The `~PSP` loader expects a fixed 10 byte gzip header (no name, no
//! mtime, maximum-compression flag and the "Acorn RISCOS" OS byte that the
//! firmware tools always emit), followed by the deflated payload, the CRC-32
//! of the uncompressed data and its size.

use std::fmt;

use flate2::{Compress, CompressError, Compression, Crc, FlushCompress, Status};

pub const GZIP_HEADER: [u8; 10] = [0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x0B];
pub const GZIP_HEADER_LEN: usize = GZIP_HEADER.len();
pub const GZIP_TRAILER_LEN: usize = 8;

const MIN_GZIP_LEN: usize = GZIP_HEADER_LEN + GZIP_TRAILER_LEN;

/// Deflate stored blocks are at most 16 KiB for the window we use.
const DEFLATE_BLOCK_LEN: usize = 16384;

/// Worst-case size of [`gzip_compress`] output for `len_src` input bytes.
///
/// Accounts for incompressible data being emitted as stored blocks (5 bytes
/// of overhead per 16 KiB block), the stream terminator and the envelope.
pub fn gzip_max_compressed_size(len_src: usize) -> usize {
    let num_16k_block = len_src.div_ceil(DEFLATE_BLOCK_LEN);

    len_src + 6 + (num_16k_block * 5) + MIN_GZIP_LEN
}

/// CRC-32 (IEEE) of `buf`.
pub fn crc32(buf: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(buf);
    crc.sum()
}

pub enum GzipError {
    /// Output capacity cannot even hold the envelope.
    OutputTooSmall { capacity: usize },
    Deflate(CompressError),
    /// The encoder ran out of output space before finishing the stream.
    StreamIncomplete { written: usize },
    /// No room left for the CRC and size trailer.
    NoTrailerSpace { needed: usize, left: usize },
}

impl fmt::Display for GzipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GzipError::OutputTooSmall { capacity } => {
                write!(f, "output buffer of {capacity} bytes cannot hold a gzip stream")
            },
            GzipError::Deflate(e) => write!(f, "{e}"),
            GzipError::StreamIncomplete { written } => {
                write!(f, "deflate stream did not finish after {written} bytes")
            },
            GzipError::NoTrailerSpace { needed, left } => {
                write!(f, "not enough space for the gzip trailer ({left} of {needed} bytes)")
            },
        }
    }
}

impl fmt::Debug for GzipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputTooSmall { capacity } => {
                f.debug_struct("OutputTooSmall").field("capacity", capacity).finish()
            },
            Self::Deflate(e) => f.debug_tuple("Deflate").field(e).finish(),
            Self::StreamIncomplete { written } => {
                f.debug_struct("StreamIncomplete").field("written", written).finish()
            },
            Self::NoTrailerSpace { needed, left } => f
                .debug_struct("NoTrailerSpace")
                .field("needed", needed)
                .field("left", left)
                .finish(),
        }
    }
}

impl std::error::Error for GzipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GzipError::Deflate(e) => Some(e),
            _ => None,
        }
    }
}

/// Compresses `src` into a gzip envelope of at most `capacity` bytes.
///
/// The deflate state lives for this call only, so independent packs never
/// share encoder state.
pub fn gzip_compress_bounded(src: &[u8], capacity: usize) -> Result<Vec<u8>, GzipError> {
    if capacity < MIN_GZIP_LEN {
        return Err(GzipError::OutputTooSmall { capacity });
    }

    let mut out = vec![0u8; capacity];
    out[..GZIP_HEADER_LEN].copy_from_slice(&GZIP_HEADER);

    let crc = crc32(src);

    // Raw deflate, the envelope supplies its own header and trailer.
    let mut deflate = Compress::new(Compression::best(), false);
    let stream_area = &mut out[GZIP_HEADER_LEN..capacity - GZIP_TRAILER_LEN];
    let status = deflate
        .compress(src, stream_area, FlushCompress::Finish)
        .map_err(GzipError::Deflate)?;

    let written = deflate.total_out() as usize;
    if status != Status::StreamEnd {
        return Err(GzipError::StreamIncomplete { written });
    }

    let trailer_start = GZIP_HEADER_LEN + written;
    let left = capacity - trailer_start;
    if left < GZIP_TRAILER_LEN {
        return Err(GzipError::NoTrailerSpace {
            needed: GZIP_TRAILER_LEN,
            left,
        });
    }

    out[trailer_start..trailer_start + 4].copy_from_slice(&crc.to_le_bytes());
    out[trailer_start + 4..trailer_start + 8].copy_from_slice(&(src.len() as u32).to_le_bytes());
    out.truncate(trailer_start + GZIP_TRAILER_LEN);

    log::trace!(
        "gzip: {} bytes deflated to {written} (crc32 0x{crc:08X})",
        src.len()
    );

    Ok(out)
}

/// Compresses `src` into a gzip envelope sized by [`gzip_max_compressed_size`].
pub fn gzip_compress(src: &[u8]) -> Result<Vec<u8>, GzipError> {
    gzip_compress_bounded(src, gzip_max_compressed_size(src.len()))
}
