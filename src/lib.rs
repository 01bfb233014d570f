//! Packer for PlayStation Portable executables.
//!
//! Turns an unsigned PRX (optionally inside a PBP) into the compressed
//! `~PSP` container the console loader expects. The key areas of the header
//! are filled with random placeholders; signing is left to other tools.
//!
//! ```no_run
//! let mut exec = std::fs::read("EBOOT.PBP")?;
//! let kind = psp_packer::pack_with_default_tags(&mut exec)?;
//! println!("packed a {kind}");
//! std::fs::write("EBOOT.PBP", &exec)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod elf;
pub mod error;
pub mod gzip;
pub mod pack;
pub mod psp;
pub mod utils;

pub use error::Error;
pub use pack::{pack, pack_with_default_tags};
pub use psp::{ExecutableKind, default_oe_tag, default_psp_tag};
