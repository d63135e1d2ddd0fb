/*
    FluxFox
    https://github.com/dbalsom/fluxfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! # fluxcore
//!
//! fluxcore decodes and encodes the floppy disk image formats used by vintage
//! IBM Personal Computers and compatibles, for real-time delivery to a
//! flux-reversal drive emulator.
//!
//! Two image families are supported:
//!
//! - **HFE** ([`hfe`]): a pre-encoded bitcell stream, optionally carrying
//!   inline opcodes for index marks, bitrate changes, and flaky bits.
//! - **IMG** ([`system34`], [`geometry`]): raw sector-payload images in many
//!   host-specific dialects, encoded on the fly to IBM/ISO MFM or FM.
//!
//! The main entry point is [`image::Image`], opened against anything
//! implementing [`io::FileIo`].

pub mod bit_ring;
pub mod codec;
pub mod crc;
pub mod flux;
pub mod geometry;
pub mod hfe;
pub mod image;
pub mod io;
pub mod system34;
pub mod track;

use thiserror::Error;

/// The largest sector payload this crate will encode or decode (`sec_no == 6`).
pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Maximum number of HFEv3 `OP_index` marks remembered per track.
pub const MAX_CUSTOM_PULSES: usize = 8;

#[derive(Debug, Error)]
pub enum DiskImageError {
    #[error("an IO error occurred reading or writing the disk image: {0}")]
    Io(String),
    #[error("the disk image geometry could not be determined from its size or header")]
    UnknownGeometry,
    #[error("a CRC error was detected decoding the disk image")]
    BadCrc,
    #[error("the requested sector ID is out of range for this track")]
    BadSector,
    #[error("an HFEv3 write would have landed inside an opcode")]
    BadOpcodeOffset,
    #[error("extending the disk image would exceed the backing file's capacity")]
    DiskFull,
    #[error("a write-back flux offset could not be mapped to a sector")]
    SectorOffsetOutOfRange,
    #[error("the disk image format parser encountered malformed data")]
    FormatParseError,
    #[error("an invalid function parameter was supplied")]
    ParameterError,
}

impl From<std::io::Error> for DiskImageError {
    fn from(err: std::io::Error) -> Self {
        DiskImageError::Io(err.to_string())
    }
}

impl From<binrw::Error> for DiskImageError {
    fn from(err: binrw::Error) -> Self {
        DiskImageError::Io(err.to_string())
    }
}
