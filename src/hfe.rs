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

//! HxC Floppy Emulator (HFE) image reader/writer: a pre-encoded bitcell
//! stream, stored as 256-byte blocks interleaved between the two sides of a
//! track, with an optional (HFEv3) inline opcode stream.

use binrw::{BinRead, BinWrite};
use log::debug;

use crate::bit_ring::{BitcellRing, DataRing};
use crate::codec::REVERSE_TABLE;
use crate::io::FileIo;
use crate::DiskImageError;

pub const SIG_V1: &[u8; 8] = b"HXCPICFE";
pub const SIG_V3: &[u8; 8] = b"HXCHFEV3";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackEncoding {
    IsoIbmMfm = 0,
    AmigaMfm = 1,
    IsoIbmFm = 2,
    EmuFm = 3,
    Unknown = 0xFF,
}

impl From<u8> for TrackEncoding {
    fn from(v: u8) -> Self {
        match v {
            0 => TrackEncoding::IsoIbmMfm,
            1 => TrackEncoding::AmigaMfm,
            2 => TrackEncoding::IsoIbmFm,
            3 => TrackEncoding::EmuFm,
            _ => TrackEncoding::Unknown,
        }
    }
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct DiskHeader {
    pub sig: [u8; 8],
    pub format_revision: u8,
    pub nr_tracks: u8,
    pub nr_sides: u8,
    pub track_encoding: u8,
    pub bitrate: u16,
    pub rpm: u16,
    pub interface_mode: u8,
    pub rsvd: u8,
    pub track_list_offset: u16,
    pub write_allowed: u8,
    pub single_step: u8,
    pub t0s0_altencoding: u8,
    pub t0s0_encoding: u8,
    pub t0s1_altencoding: u8,
    pub t0s1_encoding: u8,
}

#[derive(Debug, BinRead, BinWrite, Copy, Clone)]
#[brw(little)]
pub struct TrackHeader {
    pub offset: u16,
    pub len: u16,
}

/// HFEv3 inline opcodes, stored in the low nibble of a bitcell byte when that
/// nibble is `0xF` (bit-reversed on disk, so `0xF` survives the reversal).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Nop,
    Index,
    Bitrate,
    Skip,
    Rand,
}

impl Opcode {
    fn from_code(code: u8) -> Option<Opcode> {
        match code {
            0 => Some(Opcode::Nop),
            8 => Some(Opcode::Index),
            4 => Some(Opcode::Bitrate),
            12 => Some(Opcode::Skip),
            2 => Some(Opcode::Rand),
            _ => None,
        }
    }
}

/// Detects an HFEv3 opcode byte: on disk, an opcode's low nibble is always
/// `0xF` (a bit pattern no regularly encoded bitcell byte produces), with the
/// opcode code itself carried in the high nibble.
pub fn decode_opcode(byte: u8) -> Option<Opcode> {
    if byte & 0x0F != 0x0F {
        return None;
    }
    Opcode::from_code((byte >> 4) & 0xF)
}

/// Build the on-disk byte for `op`.
pub fn encode_opcode(op: Opcode) -> u8 {
    let code = match op {
        Opcode::Nop => 0u8,
        Opcode::Index => 8,
        Opcode::Bitrate => 4,
        Opcode::Skip => 12,
        Opcode::Rand => 2,
    };
    (code << 4) | 0x0F
}

pub struct HfeImage {
    pub header: DiskHeader,
    pub is_v3: bool,
    pub nr_cyls: u8,
    pub nr_sides: u8,
    pub double_step: bool,
    pub write_bc_ticks_per_us: u32,
    track_list: Vec<TrackHeader>,
}

impl HfeImage {
    pub fn open(io: &mut dyn FileIo) -> Result<HfeImage, DiskImageError> {
        io.seek_from_start(0)?;
        let mut raw = [0u8; 26];
        io.read_exact(&mut raw)?;
        let mut cursor = std::io::Cursor::new(&raw[..]);
        let header: DiskHeader = DiskHeader::read(&mut cursor)?;

        let is_v3 = if &header.sig == SIG_V3 {
            if header.format_revision != 0 {
                return Err(DiskImageError::FormatParseError);
            }
            true
        } else if &header.sig == SIG_V1 {
            if header.format_revision > 1 {
                return Err(DiskImageError::FormatParseError);
            }
            false
        } else {
            return Err(DiskImageError::FormatParseError);
        };

        if header.nr_tracks == 0 || !(1..=2).contains(&header.nr_sides) || header.bitrate == 0 {
            return Err(DiskImageError::FormatParseError);
        }

        let double_step = header.single_step == 0;
        let mut nr_cyls = header.nr_tracks;
        if double_step {
            nr_cyls = nr_cyls.saturating_mul(2);
        }

        let tlut_offset = header.track_list_offset as u64 * 512;
        let mut track_list = Vec::with_capacity(header.nr_tracks as usize);
        for t in 0..header.nr_tracks as u64 {
            io.seek_from_start(tlut_offset + t * 4)?;
            let mut buf = [0u8; 4];
            io.read_exact(&mut buf)?;
            let mut cursor = std::io::Cursor::new(&buf[..]);
            track_list.push(TrackHeader::read(&mut cursor)?);
        }

        debug!("opened HFE{} image: {} tracks, {} side(s), {} kbit/s", if is_v3 { "v3" } else { "v1" }, header.nr_tracks, header.nr_sides, header.bitrate);

        let write_bc_ticks_per_us = 500 / header.bitrate.max(1) as u32;

        Ok(HfeImage { nr_sides: header.nr_sides, double_step, write_bc_ticks_per_us, header, is_v3, nr_cyls, track_list })
    }

    fn track_header(&self, track: u32) -> TrackHeader {
        self.track_list[(track / 2) as usize]
    }

    /// Half-block length (bytes) for one side of one track.
    fn side_len(&self, track: u32) -> usize {
        self.track_header(track).len as usize / 2
    }

    /// Byte offset into the file where side `side`'s first half-block of
    /// `track`'s 256-byte block begins.
    fn block_base(&self, track: u32) -> u64 {
        self.track_header(track).offset as u64 * 512
    }

    pub fn tracklen_bits(&self, track: u32) -> u32 {
        self.side_len(track) as u32 * 8
    }

    /// Read the entire per-side bitcell stream for `track` into `ring`,
    /// de-interleaving the 256-byte blocks shared between both sides.
    pub fn read_track(&self, io: &mut dyn FileIo, track: u32, ring: &mut BitcellRing) -> Result<(), DiskImageError> {
        let side = (track % 2) as usize;
        let side_len = self.side_len(track);
        let base = self.block_base(track);
        let mut staging = DataRing::new(512);
        ring.reset();

        let mut pos = 0usize;
        while pos < side_len {
            let block_idx = pos / 256;
            let in_block = pos % 256;
            let take = (256 - in_block).min(side_len - pos);
            let off = base + (block_idx as u64) * 512 + (side as u64) * 256 + in_block as u64;
            io.seek_from_start(off)?;
            let mut buf = vec![0u8; take];
            io.read_exact(&mut buf)?;
            staging.fill(&buf);
            for &b in staging.remaining() {
                // Bitcell bytes are stored on disk LSB-first; the ring (and
                // everything downstream reading raw cells MSB-first) expects
                // the reversed, logical bit order.
                ring.push_byte(REVERSE_TABLE[b as usize]);
            }
            staging.consume(take);
            pos += take;
        }
        Ok(())
    }

    /// Read-modify-write a span of raw bitcell bytes back into `track`'s
    /// on-disk block. HFEv3 opcodes are preserved rather than overwritten:
    /// `nop`/`index` occupy one on-disk byte, `bitrate`/`skip` occupy two
    /// (`skip` additionally preserves the following data byte, since its
    /// precise partial-bit effect isn't worth reproducing on write-back),
    /// and only `rand` is replaced with real encoded data.
    pub fn write_track(
        &self,
        io: &mut dyn FileIo,
        track: u32,
        start_bit: u32,
        bytes: &[u8],
    ) -> Result<(), DiskImageError> {
        if !start_bit.is_multiple_of(8) {
            return Err(DiskImageError::BadOpcodeOffset);
        }
        let side = (track % 2) as usize;
        let side_len = self.side_len(track);
        let base = self.block_base(track);
        let byte_off = |pos: usize| -> u64 {
            let block_idx = pos / 256;
            let in_block = pos % 256;
            base + (block_idx as u64) * 512 + (side as u64) * 256 + in_block as u64
        };

        let mut pos = (start_bit / 8) as usize;
        let mut src_idx = 0usize;
        while pos < side_len && src_idx < bytes.len() {
            if self.is_v3 {
                io.seek_from_start(byte_off(pos))?;
                let mut cur = [0u8; 1];
                io.read_exact(&mut cur)?;
                if let Some(op) = decode_opcode(cur[0]) {
                    match op {
                        Opcode::Skip => {
                            debug!("write_track: preserving skip opcode (and following byte) at track {track} offset {pos}");
                            pos += 3;
                            continue;
                        }
                        Opcode::Bitrate => {
                            debug!("write_track: preserving bitrate opcode at track {track} offset {pos}");
                            pos += 2;
                            continue;
                        }
                        Opcode::Nop | Opcode::Index => {
                            pos += 1;
                            continue;
                        }
                        Opcode::Rand => {
                            // Replaced with real data below, same as an ordinary byte.
                        }
                    }
                }
            }

            let incoming = bytes[src_idx];
            src_idx += 1;
            io.seek_from_start(byte_off(pos))?;
            io.write_all(&[REVERSE_TABLE[incoming as usize]])?;
            pos += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_v1_image(nr_sides: u8, cells_per_track: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[0..8].copy_from_slice(SIG_V1);
        buf[8] = 0; // format_revision
        buf[9] = 1; // nr_tracks
        buf[10] = nr_sides;
        buf[11] = 0; // ISOIBM MFM
        buf[12..14].copy_from_slice(&250u16.to_le_bytes());
        buf[14..16].copy_from_slice(&300u16.to_le_bytes());
        buf[16] = 0; // interface_mode
        buf[17] = 0; // rsvd
        buf[18..20].copy_from_slice(&1u16.to_le_bytes()); // track_list_offset: block 1
        buf[20] = 1; // write_allowed
        buf[21] = 1; // single_step

        let block_len = cells_per_track / 8 * nr_sides as usize;
        let mut tlut = vec![0u8; 512];
        tlut[0..2].copy_from_slice(&2u16.to_le_bytes()); // track data at block 2
        tlut[2..4].copy_from_slice(&(block_len as u16).to_le_bytes());
        buf.extend_from_slice(&tlut);

        let mut data = vec![0u8; 512.max(block_len.div_ceil(512) * 512)];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        buf.extend_from_slice(&data);
        buf
    }

    #[test]
    fn hfev1_header_round_trips() {
        let raw = build_v1_image(2, 2048);
        let mut io = Cursor::new(raw);
        let image = HfeImage::open(&mut io).unwrap();
        assert!(!image.is_v3);
        assert_eq!(image.nr_sides, 2);
        assert_eq!(image.nr_cyls, 1); // single_step == 1 here, so no cylinder doubling
    }

    #[test]
    fn read_track_deinterleaves_sides() {
        let raw = build_v1_image(2, 2048);
        let mut io = Cursor::new(raw);
        let image = HfeImage::open(&mut io).unwrap();
        let mut ring = BitcellRing::new(1024);
        image.read_track(&mut io, 0, &mut ring).unwrap();
        assert_eq!(ring.fill_bits(), image.tracklen_bits(0));
    }

    #[test]
    fn decode_opcode_recognizes_index_nibble() {
        assert_eq!(decode_opcode(encode_opcode(Opcode::Index)), Some(Opcode::Index));
        assert_eq!(decode_opcode(encode_opcode(Opcode::Bitrate)), Some(Opcode::Bitrate));
        assert_eq!(decode_opcode(encode_opcode(Opcode::Skip)), Some(Opcode::Skip));
        assert_eq!(decode_opcode(encode_opcode(Opcode::Rand)), Some(Opcode::Rand));
    }

    #[test]
    fn decode_opcode_ignores_ordinary_bytes() {
        assert_eq!(decode_opcode(0xAA), None);
        assert_eq!(decode_opcode(REVERSE_TABLE[0xAAu8 as usize]), None);
    }
}
