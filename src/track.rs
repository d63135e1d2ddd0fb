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

//! Per-track layout derived from a [`Geometry`]: the rotational sector map,
//! gap sizing, and the bitcell budget a track encoder has to fill.

use crate::geometry::{Encoding, Geometry, Layout};

/// MFM gap-3 sizes indexed by `sec_no` (0..=7), matching the reference
/// implementation's table of conventional gap-3 values per sector size.
const MFM_GAP_3: [u16; 8] = [32, 54, 84, 116, 255, 255, 255, 255];
const MFM_GAP_1: u16 = 50;
const MFM_GAP_2_DEFAULT: u16 = 22;
const MFM_GAP_4A_DEFAULT: u16 = 80;
const MFM_GAP_SYNC: u16 = 12;

const FM_GAP_3: [u16; 8] = [27, 42, 58, 138, 255, 255, 255, 255];
const FM_GAP_1: u16 = 16;
const FM_GAP_2_DEFAULT: u16 = 11;
const FM_GAP_4A_DEFAULT: u16 = 16;
const FM_GAP_SYNC: u16 = 6;

/// The fully sized layout for one physical track: gap lengths, the
/// sync-inclusive region sizes used to drive the encoder/decoder state
/// machines, and the bitcell length of the whole revolution.
#[derive(Clone, Debug)]
pub struct TrackLayout {
    pub nr_sectors: u8,
    pub sec_no: u8,
    pub has_iam: bool,
    pub gap_1: u16,
    pub gap_2: u16,
    pub gap_3: u16,
    pub gap_4a: u16,
    pub gap_4: u16,
    pub gap_sync: u16,
    pub post_crc_syncs: u8,
    /// Rotational order: `sec_map[slot]` is the sector ID written to
    /// bitstream position `slot`.
    pub sec_map: Vec<u8>,
    /// Size in bytes of the pre-index-mark region (gap 4a + sync + IAM, or
    /// just gap 4a if the format has no index mark).
    pub idx_sz: u16,
    /// Size in bytes of one IDAM region (sync + ID field + CRC + gap 2).
    pub idam_sz: u16,
    /// Size in bytes of the DAM sync-and-mark prefix.
    pub dam_sz_pre: u16,
    /// Size in bytes of one encoded sector (IDAM + DAM prefix + data + CRC + gap 3).
    pub enc_sec_sz: u32,
    /// Raw (unpadded) track length in bitcells.
    pub raw_tracklen_bits: u32,
    /// Final track length in bitcells, after data-rate inference and padding.
    pub tracklen_bits: u32,
    pub data_rate: u32,
}

impl TrackLayout {
    pub fn new(geom: &Geometry, cyl: u8, track: u32) -> TrackLayout {
        let sec_no = geom.sec_no;
        let nr_sectors = geom.nr_sectors;
        let sec_sz = geom.sector_size() as u32;

        let (gap_3, gap_1, gap_2, gap_4a, gap_sync, gap_byte_mult): (u16, u16, u16, u16, u16, u32) =
            match geom.encoding {
                Encoding::Mfm => {
                    let gap3 = if geom.gap_3 != 0 { geom.gap_3 as u16 } else { MFM_GAP_3[sec_no as usize & 7] };
                    let gap2 = if geom.gap_2 != 0 { geom.gap_2 as u16 } else { MFM_GAP_2_DEFAULT };
                    let gap4a = if geom.gap_4a != 0 { geom.gap_4a as u16 } else { MFM_GAP_4A_DEFAULT };
                    (gap3, MFM_GAP_1, gap2, gap4a, MFM_GAP_SYNC, 2)
                }
                Encoding::Fm => {
                    let gap3 = if geom.gap_3 != 0 { geom.gap_3 as u16 } else { FM_GAP_3[sec_no as usize & 7] };
                    let gap2 = if geom.gap_2 != 0 { geom.gap_2 as u16 } else { FM_GAP_2_DEFAULT };
                    let gap4a = if geom.gap_4a != 0 { geom.gap_4a as u16 } else { FM_GAP_4A_DEFAULT };
                    (gap3, FM_GAP_1, gap2, gap4a, FM_GAP_SYNC, 1)
                }
            };
        let _ = gap_byte_mult;

        let idam_gap_sync = gap_sync.min(gap_3);
        let (idam_sync_bytes, idam_body_bytes) = match geom.encoding {
            Encoding::Mfm => (3u16, 5u16), // 0xA1 x3 + 0xFE + CHRN + 2 CRC bytes = handled below
            Encoding::Fm => (0u16, 5u16),
        };
        let idam_sz = idam_gap_sync + idam_sync_bytes + idam_body_bytes + 2 + gap_2 + geom.post_crc_syncs as u16;

        let dam_sz_pre = match geom.encoding {
            Encoding::Mfm => gap_sync + 3 + 1,
            Encoding::Fm => gap_sync + 1,
        };

        let idx_sz = if geom.has_iam {
            match geom.encoding {
                Encoding::Mfm => gap_4a + gap_sync + 4 + gap_1,
                Encoding::Fm => gap_4a + 1 + gap_1,
            }
        } else {
            gap_4a
        };

        let enc_sec_sz = idam_sz as u32 + dam_sz_pre as u32 + sec_sz + 2 + gap_3 as u32 + geom.post_crc_syncs as u32;
        let raw_track_bytes = enc_sec_sz * nr_sectors as u32 + idx_sz as u32;
        let raw_tracklen_bits = raw_track_bytes * 16;

        let (tracklen_bits, data_rate) = match geom.encoding {
            Encoding::Mfm => {
                let mut shift = 0u32;
                let data_rate;
                loop {
                    let maxlen = ((50_000u32 * 300 / geom.rpm as u32) << shift) + 5_000;
                    if raw_tracklen_bits < maxlen || shift >= 3 {
                        data_rate = 250 << shift;
                        break;
                    }
                    shift += 1;
                }
                let mut tracklen_bits = data_rate * 200 * 300 / geom.rpm as u32;
                if tracklen_bits < raw_tracklen_bits {
                    let dropped = raw_tracklen_bits - gap_4a as u32 * 16;
                    if dropped <= tracklen_bits {
                        tracklen_bits = dropped;
                    } else {
                        tracklen_bits = raw_tracklen_bits + 100;
                    }
                }
                tracklen_bits = (tracklen_bits + 31) & !31;
                (tracklen_bits, data_rate)
            }
            Encoding::Fm => {
                let data_rate = 250u32;
                let mut tracklen_bits = data_rate * 200 * 300 / geom.rpm as u32;
                if tracklen_bits < raw_tracklen_bits {
                    tracklen_bits = raw_tracklen_bits + 100;
                }
                tracklen_bits = (tracklen_bits + 31) & !31;
                (tracklen_bits, data_rate)
            }
        };
        let gap_4 = ((tracklen_bits - raw_tracklen_bits) / 16) as u16;

        let sec_map = build_sector_map(geom, cyl, track);

        TrackLayout {
            nr_sectors,
            sec_no,
            has_iam: geom.has_iam,
            gap_1,
            gap_2,
            gap_3,
            gap_4a,
            gap_4,
            gap_sync,
            post_crc_syncs: geom.post_crc_syncs,
            sec_map,
            idx_sz,
            idam_sz,
            dam_sz_pre,
            enc_sec_sz,
            raw_tracklen_bits,
            tracklen_bits,
            data_rate,
        }
    }

    /// Byte offset of `track`'s data within the backing file, given the
    /// image's geometry.
    pub fn track_offset(geom: &Geometry, track: u32) -> u64 {
        let cyl = (track / 2) as u64;
        let side = (track % 2) as u8;
        let trk_len = geom.nr_sectors as u64 * geom.sector_size() as u64;
        let base = match geom.layout {
            Layout::Interleaved => (cyl * geom.nr_sides as u64 + side as u64) * trk_len,
            Layout::InterleavedSwapSides => {
                let swapped_side = side ^ (geom.nr_sides - 1);
                (cyl * geom.nr_sides as u64 + swapped_side as u64) * trk_len
            }
            Layout::SequentialReverseSide1 => {
                let logical_cyl = if side == 1 { 2 * geom.nr_cyls as u64 - cyl - 1 } else { cyl };
                logical_cyl * trk_len
            }
        };
        base + geom.base_off as u64
    }
}

/// Build the rotational sector permutation for one track: `sec_map[slot]` is
/// the sector ID placed at bitstream position `slot`, derived from the
/// configured interleave and skew.
fn build_sector_map(geom: &Geometry, cyl: u8, track: u32) -> Vec<u8> {
    let n = geom.nr_sectors as usize;
    let mut sec_map = vec![0u8; n];
    let mut taken = vec![false; n];

    let side = (track % 2) as u8;
    let trk = cyl as u32 * geom.nr_sides as u32 + side as u32;
    let skew_unit = if geom.skew_cyls_only { cyl as u32 } else { trk };
    let mut pos = (skew_unit * geom.skew as u32) as usize % n;

    let base = geom.sector_base(side);

    for i in 0..n {
        while taken[pos] {
            pos = (pos + 1) % n;
        }
        sec_map[pos] = base + i as u8;
        taken[pos] = true;
        pos = (pos + geom.interleave as usize) % n;
    }
    sec_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{open_img, Host};
    use std::io::Cursor;

    fn cursor_of_size(size: u64) -> Cursor<Vec<u8>> {
        Cursor::new(vec![0u8; size as usize])
    }

    #[test]
    fn atari_st_720k_sector_map_matches_tos_skew() {
        let mut io = cursor_of_size(720 * 1024);
        let geom = crate::geometry::open_st(&mut io).unwrap();
        assert_eq!(geom.nr_sectors, 9);
        let layout = TrackLayout::new(&geom, 0, 0);
        assert_eq!(layout.sec_map, vec![1, 6, 2, 7, 3, 8, 4, 9, 5]);
    }

    #[test]
    fn pc_dos_1440k_track_is_18_sectors_of_512() {
        let mut io = cursor_of_size(1_474_560);
        let geom = open_img(Host::Generic, &mut io).unwrap();
        assert_eq!(geom.nr_sectors, 18);
        assert_eq!(geom.sector_size(), 512);
        let layout = TrackLayout::new(&geom, 0, 0);
        assert_eq!(layout.sec_map.len(), 18);
    }
}
