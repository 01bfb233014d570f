use std::{ffi::FromBytesUntilNulError, fmt, io};

use crate::gzip::GzipError;

pub enum Error {
    AlreadyPacked,
    NotPrx,
    NoModuleInfo,
    MixedPrivileges,
    KernelBundleConflict,
    NoSegments,
    NoBssSection,
    CompressionFailed(GzipError),
    FromBytes { input_len: usize, expected_len: usize },
    FileTooSmall,
    FileTooBig,
    MalformedPbp { prx_offset: u32, psar_offset: u32 },
    CStr(FromBytesUntilNulError),
    Io(io::Error),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => 101,
            Error::AlreadyPacked => 102,
            Error::NotPrx => 103,
            Error::MalformedPbp { .. } => 104,
            Error::NoModuleInfo => 106,
            Error::FileTooBig => 107,
            Error::FileTooSmall => 108,
            Error::KernelBundleConflict => 109,
            Error::MixedPrivileges => 110,
            Error::NoSegments => 111,
            Error::NoBssSection => 112,
            Error::FromBytes { .. } => 113,
            Error::CStr(_) => 115,
            Error::CompressionFailed(_) => 116,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FromBytesUntilNulError> for Error {
    fn from(value: FromBytesUntilNulError) -> Self {
        Self::CStr(value)
    }
}

impl From<GzipError> for Error {
    fn from(value: GzipError) -> Self {
        Self::CompressionFailed(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyPacked => f.pad("file already packed"),
            Error::NotPrx => f.pad("the program was expecting a PRX file"),
            Error::NoModuleInfo => {
                f.pad("the elf part of the file do not have a module info segment")
            },
            Error::MixedPrivileges => {
                f.pad("the file has mixed privileges between the elf and module info data")
            },
            Error::KernelBundleConflict => f.pad("a kernel PBP is not a valid PSP format"),
            Error::NoSegments => f.pad("the elf part of the file has no segments"),
            Error::NoBssSection => f.pad("the elf part of the file do not have a `.bss` section"),
            Error::CompressionFailed(e) => write!(f, "gzip compression failed: {e}"),
            Error::FromBytes { .. } => {
                write!(f, "the program had a internal type conversion error: {self:?}")
            },
            Error::FileTooSmall => f.pad("the file is smaller than expected"),
            Error::FileTooBig => f.pad("the file is bigger than expected for a PSP file"),
            Error::MalformedPbp {
                prx_offset,
                psar_offset,
            } => write!(
                f,
                "the PBP header is malformed: PRX offset 0x{prx_offset:08X} is past PSAR offset \
                 0x{psar_offset:08X}"
            ),
            Error::CStr(e) => write!(f, "the program had a internal type conversion error: {e}"),
            Error::Io(error) => write!(f, "{error}"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPacked => write!(f, "AlreadyPacked"),
            Self::NotPrx => write!(f, "NotPrx"),
            Self::NoModuleInfo => write!(f, "NoModuleInfo"),
            Self::MixedPrivileges => write!(f, "MixedPrivileges"),
            Self::KernelBundleConflict => write!(f, "KernelBundleConflict"),
            Self::NoSegments => write!(f, "NoSegments"),
            Self::NoBssSection => write!(f, "NoBssSection"),
            Self::CompressionFailed(e) => f.debug_tuple("CompressionFailed").field(e).finish(),
            Self::FromBytes {
                input_len,
                expected_len,
            } => f
                .debug_struct("FromBytes")
                .field("input_len", input_len)
                .field("expected_len", expected_len)
                .finish(),
            Self::FileTooSmall => write!(f, "FileTooSmall"),
            Self::FileTooBig => write!(f, "FileTooBig"),
            Self::MalformedPbp {
                prx_offset,
                psar_offset,
            } => f
                .debug_struct("MalformedPbp")
                .field("prx_offset", &format_args!("{prx_offset:#010X}"))
                .field("psar_offset", &format_args!("{psar_offset:#010X}"))
                .finish(),
            Self::CStr(e) => f.debug_tuple("CStr").field(e).finish(),
            Self::Io(arg0) => f.debug_tuple("Io").field(arg0).finish(),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::CStr(e) => Some(e),
            Error::CompressionFailed(e) => Some(e),
            _ => None,
        }
    }
}
