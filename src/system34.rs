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

//! IBM System/34 track encoding: the IAM/IDAM/DAM structure shared by MFM and
//! FM tracks, expressed as a phase-based state machine that emits into a
//! [`BitcellRing`] a few bitcells at a time, and a write-back decoder that
//! scans a ring for sync marks and recovers sector payloads.

use crate::bit_ring::BitcellRing;
use crate::codec::{fm_encode, fm_sync, mask_cross_cell, mfm_decode_cell, FM_SYNC_CLOCK, MFM_TABLE};
use crate::crc::{crc16_ccitt_byte, CRC_CCITT_INITIAL};
use crate::geometry::{Encoding, Geometry};
use crate::track::TrackLayout;
use crate::DiskImageError;

type IdamCrcFn = fn(u8, u8, u8, u8) -> u16;
type DamCrcFn = fn(u8, &[u8]) -> u16;

const MFM_GAP_FILL: u8 = 0x4E;
const FM_GAP_FILL: u8 = 0xFF;
const MFM_SYNC_FILL: u8 = 0x00;
const FM_SYNC_FILL: u8 = 0x00;

const IAM_RAW_SYNC: u16 = 0x5224;
const IDAM_DAM_RAW_SYNC: u16 = 0x4489;
const FM_IDX_MARK: u8 = 0xFC;
const IAM_MARK: u8 = 0xFC;
const IDAM_MARK: u8 = 0xFE;
const DAM_MARK: u8 = 0xFB;
const DDAM_MARK: u8 = 0xF8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    PreIndex,
    Sector(u8),
    Done,
}

/// Encodes one physical track's worth of bitcells on demand, called
/// repeatedly from the foreground task until the track's ring has no more
/// room or the track is exhausted.
pub struct TrackEncoder<'a> {
    layout: &'a TrackLayout,
    track: u32,
    encoding: Encoding,
    phase: Phase,
    /// Bit offset within the current phase's region.
    offset: u32,
    prev_raw: u16,
    sector_fetch: Box<dyn FnMut(u8, u8, u8) -> Vec<u8> + 'a>,
}

impl<'a> TrackEncoder<'a> {
    pub fn new(
        geom: &'a Geometry,
        layout: &'a TrackLayout,
        track: u32,
        sector_fetch: Box<dyn FnMut(u8, u8, u8) -> Vec<u8> + 'a>,
    ) -> Self {
        TrackEncoder {
            layout,
            track,
            encoding: geom.encoding,
            phase: Phase::PreIndex,
            offset: 0,
            prev_raw: 0,
            sector_fetch,
        }
    }

    fn emit_raw(&mut self, ring: &mut BitcellRing, raw: u16) {
        let raw = match self.encoding {
            Encoding::Mfm => mask_cross_cell(raw, self.prev_raw),
            Encoding::Fm => raw,
        };
        ring.push_raw16(raw);
        self.prev_raw = raw;
    }

    fn emit_byte(&mut self, ring: &mut BitcellRing, byte: u8) {
        let raw = match self.encoding {
            Encoding::Mfm => MFM_TABLE[byte as usize],
            Encoding::Fm => fm_encode(byte),
        };
        self.emit_raw(ring, raw);
    }

    fn emit_sync_byte(&mut self, ring: &mut BitcellRing, byte: u8, clock: u8) {
        match self.encoding {
            Encoding::Mfm => self.emit_raw(ring, MFM_TABLE[byte as usize]),
            Encoding::Fm => self.emit_raw(ring, fm_sync(byte, clock)),
        }
    }

    /// Emit whatever will fit in `ring`'s remaining headroom. Returns `true`
    /// if any progress was made, `false` if the ring is already full or the
    /// track is exhausted.
    pub fn fill(&mut self, ring: &mut BitcellRing) -> bool {
        let mut progressed = false;
        while ring.space_bits() >= 16 && self.phase != Phase::Done {
            self.step(ring);
            progressed = true;
        }
        progressed
    }

    fn step(&mut self, ring: &mut BitcellRing) {
        match self.phase {
            Phase::PreIndex => self.step_pre_index(ring),
            Phase::Sector(idx) => self.step_sector(ring, idx),
            Phase::Done => {}
        }
    }

    fn step_pre_index(&mut self, ring: &mut BitcellRing) {
        let gap_fill = if self.encoding == Encoding::Mfm { MFM_GAP_FILL } else { FM_GAP_FILL };
        let sync_fill = if self.encoding == Encoding::Mfm { MFM_SYNC_FILL } else { FM_SYNC_FILL };
        let gap4a = self.layout.gap_4a;
        let gap_sync = self.layout.gap_sync;

        if self.layout.has_iam {
            let sync_start = gap4a as u32;
            let iam_start = sync_start + gap_sync as u32;
            let iam_mark_start = iam_start + if self.encoding == Encoding::Mfm { 3 } else { 0 };
            let gap1_start = iam_mark_start + 1;
            let end = gap1_start + self.layout.gap_1 as u32;

            if self.offset < sync_start {
                self.emit_byte(ring, gap_fill);
            } else if self.offset < iam_start {
                self.emit_byte(ring, sync_fill);
            } else if self.encoding == Encoding::Mfm && self.offset < iam_mark_start {
                self.emit_raw(ring, IAM_RAW_SYNC);
            } else if self.offset < gap1_start {
                if self.encoding == Encoding::Mfm {
                    self.emit_byte(ring, IAM_MARK);
                } else {
                    self.emit_sync_byte(ring, FM_IDX_MARK, 0xD7);
                }
            } else if self.offset < end {
                self.emit_byte(ring, gap_fill);
            } else {
                self.offset = 0;
                self.phase = Phase::Sector(0);
                return;
            }
        } else {
            if self.offset < gap4a as u32 {
                self.emit_byte(ring, gap_fill);
            } else {
                self.offset = 0;
                self.phase = Phase::Sector(0);
                return;
            }
        }
        self.offset += 1;
    }

    fn step_sector(&mut self, ring: &mut BitcellRing, idx: u8) {
        if idx as usize >= self.layout.sec_map.len() {
            self.phase = Phase::Done;
            return;
        }
        let sec_id = self.layout.sec_map[idx as usize];
        let cyl = (self.track / 2) as u8;
        let head = (self.track % 2) as u8;
        let gap_fill = if self.encoding == Encoding::Mfm { MFM_GAP_FILL } else { FM_GAP_FILL };
        let sync_fill = if self.encoding == Encoding::Mfm { MFM_SYNC_FILL } else { FM_SYNC_FILL };
        let sync_len = if self.encoding == Encoding::Mfm { 3u32 } else { 0 };

        let idam_gap_sync = self.layout.gap_sync.min(self.layout.gap_3);
        let idam_rawsync_start = idam_gap_sync as u32;
        let idam_mark_start = idam_rawsync_start + sync_len;
        let idam_body_start = idam_mark_start + 1;
        let idam_crc_start = idam_body_start + 4;
        let idam_gap2_start = idam_crc_start + 2;
        let dam_rawsync_start = idam_gap2_start + self.layout.gap_2 as u32 + self.layout.gap_sync as u32;
        let dam_sync_start = dam_rawsync_start - self.layout.gap_sync as u32;
        let dam_mark_start = dam_rawsync_start + sync_len;
        let dam_body_start = dam_mark_start + 1;
        let sec_sz = 128u32 << self.layout.sec_no;
        let dam_crc_start = dam_body_start + sec_sz;
        let gap3_start = dam_crc_start + 2;
        let sector_end = gap3_start + self.layout.gap_3 as u32;

        let (idam_crc_fn, dam_crc_fn): (IdamCrcFn, DamCrcFn) = match self.encoding {
            Encoding::Mfm => (idam_crc, dam_crc),
            Encoding::Fm => (fm_idam_crc, fm_dam_crc),
        };

        if self.offset < idam_rawsync_start {
            self.emit_byte(ring, sync_fill);
        } else if self.offset < idam_mark_start {
            self.emit_raw(ring, IDAM_DAM_RAW_SYNC);
        } else if self.offset < idam_body_start {
            self.emit_sync_byte(ring, IDAM_MARK, FM_SYNC_CLOCK);
        } else if self.offset < idam_crc_start {
            let field = [cyl, head, sec_id, self.layout.sec_no];
            self.emit_byte(ring, field[(self.offset - idam_body_start) as usize]);
        } else if self.offset < idam_gap2_start {
            let crc = idam_crc_fn(cyl, head, sec_id, self.layout.sec_no);
            let byte = if self.offset == idam_crc_start { (crc >> 8) as u8 } else { crc as u8 };
            self.emit_byte(ring, byte);
        } else if self.offset < dam_sync_start {
            self.emit_byte(ring, gap_fill);
        } else if self.offset < dam_rawsync_start {
            self.emit_byte(ring, sync_fill);
        } else if self.offset < dam_mark_start {
            self.emit_raw(ring, IDAM_DAM_RAW_SYNC);
        } else if self.offset < dam_body_start {
            self.emit_sync_byte(ring, DAM_MARK, FM_SYNC_CLOCK);
        } else if self.offset < dam_crc_start {
            let data = (self.sector_fetch)(cyl, head, sec_id);
            let byte_idx = (self.offset - dam_body_start) as usize;
            self.emit_byte(ring, data.get(byte_idx).copied().unwrap_or(0));
        } else if self.offset < gap3_start {
            let data = (self.sector_fetch)(cyl, head, sec_id);
            let crc = dam_crc_fn(DAM_MARK, &data);
            let byte = if self.offset == dam_crc_start { (crc >> 8) as u8 } else { crc as u8 };
            self.emit_byte(ring, byte);
        } else if self.offset < sector_end {
            self.emit_byte(ring, gap_fill);
        } else {
            self.offset = 0;
            self.phase = Phase::Sector(idx + 1);
            return;
        }
        self.offset += 1;
    }
}

fn idam_crc(cyl: u8, head: u8, sec_id: u8, sec_no: u8) -> u16 {
    let mut crc = CRC_CCITT_INITIAL;
    for b in [0xA1, 0xA1, 0xA1, IDAM_MARK, cyl, head, sec_id, sec_no] {
        crc = crc16_ccitt_byte(b, crc);
    }
    crc
}

fn dam_crc(mark: u8, data: &[u8]) -> u16 {
    let mut crc = CRC_CCITT_INITIAL;
    for b in [0xA1, 0xA1, 0xA1, mark] {
        crc = crc16_ccitt_byte(b, crc);
    }
    for &b in data {
        crc = crc16_ccitt_byte(b, crc);
    }
    crc
}

fn fm_idam_crc(cyl: u8, head: u8, sec_id: u8, sec_no: u8) -> u16 {
    let mut crc = CRC_CCITT_INITIAL;
    for b in [IDAM_MARK, cyl, head, sec_id, sec_no] {
        crc = crc16_ccitt_byte(b, crc);
    }
    crc
}

fn fm_dam_crc(mark: u8, data: &[u8]) -> u16 {
    let mut crc = CRC_CCITT_INITIAL;
    crc = crc16_ccitt_byte(mark, crc);
    for &b in data {
        crc = crc16_ccitt_byte(b, crc);
    }
    crc
}

/// A decoded sector header, recovered while scanning a write-side ring for
/// sync marks.
#[derive(Debug, Clone, Copy)]
pub struct SectorHeader {
    pub cyl: u8,
    pub head: u8,
    pub sec_id: u8,
    pub sec_no: u8,
}

/// Scans a ring of raw bitcells written in from a host, recovering IDAM and
/// DAM fields. Mirrors the reference write-path decoder's sync-scan loop,
/// but as a pull API: call [`TrackDecoder::next_event`] until it returns
/// `None` (ring temporarily exhausted).
pub struct TrackDecoder {
    encoding: Encoding,
    last_idam: Option<SectorHeader>,
}

#[derive(Debug)]
pub enum DecodeEvent {
    Idam(SectorHeader),
    Data { bytes: Vec<u8>, crc_ok: bool },
}

impl TrackDecoder {
    pub fn new(encoding: Encoding) -> Self {
        TrackDecoder { encoding, last_idam: None }
    }

    /// Consume from `ring` until a full IDAM or DAM is recovered, or the
    /// ring doesn't have enough queued bits to make progress.
    pub fn next_event(&mut self, ring: &mut BitcellRing, sec_sz: usize) -> Option<DecodeEvent> {
        match self.encoding {
            Encoding::Mfm => self.next_event_mfm(ring, sec_sz),
            Encoding::Fm => self.next_event_fm(ring, sec_sz),
        }
    }

    fn next_event_mfm(&mut self, ring: &mut BitcellRing, sec_sz: usize) -> Option<DecodeEvent> {
        while ring.fill_bits() >= 16 {
            if ring.fill_bits() < 64 {
                return None;
            }
            let raw0 = ring.pop_raw16();
            if raw0 != IDAM_DAM_RAW_SYNC {
                continue;
            }
            // Expect two more 0xA1 sync cells before the mark byte.
            let raw1 = ring.pop_raw16();
            if mfm_decode_cell(raw1) != 0xA1 {
                continue;
            }
            let raw2 = ring.pop_raw16();
            if mfm_decode_cell(raw2) != 0xA1 {
                continue;
            }
            let mark_raw = ring.pop_raw16();
            let mark = mfm_decode_cell(mark_raw);
            match mark {
                IDAM_MARK => {
                    if ring.fill_bits() < (4 + 2) * 16 {
                        return None;
                    }
                    let cyl = mfm_decode_cell(ring.pop_raw16());
                    let head = mfm_decode_cell(ring.pop_raw16());
                    let sec_id = mfm_decode_cell(ring.pop_raw16());
                    let sec_no = mfm_decode_cell(ring.pop_raw16());
                    let crc_hi = mfm_decode_cell(ring.pop_raw16());
                    let crc_lo = mfm_decode_cell(ring.pop_raw16());
                    let got_crc = ((crc_hi as u16) << 8) | crc_lo as u16;
                    let expect = idam_crc(cyl, head, sec_id, sec_no);
                    let header = SectorHeader { cyl, head, sec_id, sec_no };
                    self.last_idam = Some(header);
                    if got_crc != expect {
                        continue;
                    }
                    return Some(DecodeEvent::Idam(header));
                }
                DAM_MARK | DDAM_MARK => {
                    if ring.fill_bits() < (sec_sz as u32 + 2) * 16 {
                        return None;
                    }
                    let mut data = vec![0u8; sec_sz];
                    for b in data.iter_mut() {
                        *b = mfm_decode_cell(ring.pop_raw16());
                    }
                    let crc_hi = mfm_decode_cell(ring.pop_raw16());
                    let crc_lo = mfm_decode_cell(ring.pop_raw16());
                    let got_crc = ((crc_hi as u16) << 8) | crc_lo as u16;
                    let expect = dam_crc(mark, &data);
                    return Some(DecodeEvent::Data { bytes: data, crc_ok: got_crc == expect });
                }
                _ => continue,
            }
        }
        None
    }

    fn next_event_fm(&mut self, ring: &mut BitcellRing, sec_sz: usize) -> Option<DecodeEvent> {
        while ring.fill_bits() >= 16 {
            if ring.fill_bits() < 16 {
                return None;
            }
            let raw0 = ring.pop_raw16();
            let expect_idam = fm_sync(IDAM_MARK, FM_SYNC_CLOCK);
            let expect_dam = fm_sync(DAM_MARK, FM_SYNC_CLOCK);
            let expect_ddam = fm_sync(DDAM_MARK, FM_SYNC_CLOCK);
            let mark = if raw0 == expect_idam {
                IDAM_MARK
            } else if raw0 == expect_dam {
                DAM_MARK
            } else if raw0 == expect_ddam {
                DDAM_MARK
            } else {
                continue;
            };
            match mark {
                IDAM_MARK => {
                    if ring.fill_bits() < (4 + 2) * 16 {
                        return None;
                    }
                    let cyl = mfm_decode_cell(ring.pop_raw16());
                    let head = mfm_decode_cell(ring.pop_raw16());
                    let sec_id = mfm_decode_cell(ring.pop_raw16());
                    let sec_no = mfm_decode_cell(ring.pop_raw16());
                    let crc_hi = mfm_decode_cell(ring.pop_raw16());
                    let crc_lo = mfm_decode_cell(ring.pop_raw16());
                    let got_crc = ((crc_hi as u16) << 8) | crc_lo as u16;
                    let expect = fm_idam_crc(cyl, head, sec_id, sec_no);
                    let header = SectorHeader { cyl, head, sec_id, sec_no };
                    self.last_idam = Some(header);
                    if got_crc != expect {
                        continue;
                    }
                    return Some(DecodeEvent::Idam(header));
                }
                DAM_MARK | DDAM_MARK => {
                    if ring.fill_bits() < (sec_sz as u32 + 2) * 16 {
                        return None;
                    }
                    let mut data = vec![0u8; sec_sz];
                    for b in data.iter_mut() {
                        *b = mfm_decode_cell(ring.pop_raw16());
                    }
                    let crc_hi = mfm_decode_cell(ring.pop_raw16());
                    let crc_lo = mfm_decode_cell(ring.pop_raw16());
                    let got_crc = ((crc_hi as u16) << 8) | crc_lo as u16;
                    let expect = fm_dam_crc(mark, &data);
                    return Some(DecodeEvent::Data { bytes: data, crc_ok: got_crc == expect });
                }
                _ => continue,
            }
        }
        None
    }

    pub fn last_idam(&self) -> Option<SectorHeader> {
        self.last_idam
    }
}

pub fn check_opcode_offset(offset_bits: u32) -> Result<(), DiskImageError> {
    if !offset_bits.is_multiple_of(16) {
        return Err(DiskImageError::BadOpcodeOffset);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{open_img, Host, Layout};
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    #[test]
    fn mfm_idam_crc_self_checks_to_zero() {
        let mut crc = CRC_CCITT_INITIAL;
        for b in [0xA1, 0xA1, 0xA1, IDAM_MARK, 0u8, 0, 1, 2] {
            crc = crc16_ccitt_byte(b, crc);
        }
        let hi_lo_crc = idam_crc(0, 0, 1, 2);
        for b in [(hi_lo_crc >> 8) as u8, hi_lo_crc as u8] {
            crc = crc16_ccitt_byte(b, crc);
        }
        assert_eq!(crc, 0);
    }

    #[test]
    fn encode_then_decode_recovers_sector_header_and_data() {
        let mut io = Cursor::new(vec![0u8; 1_474_560]);
        let geom = open_img(Host::Generic, &mut io).unwrap();
        assert!(matches!(geom.layout, Layout::Interleaved));
        let layout = TrackLayout::new(&geom, 0, 0);

        let payload = Rc::new(RefCell::new(vec![0xABu8; 512]));
        let payload_clone = payload.clone();
        let mut encoder =
            TrackEncoder::new(&geom, &layout, 0, Box::new(move |_c, _h, _s| payload_clone.borrow().clone()));

        let mut ring = BitcellRing::new(1 << 16);
        while encoder.fill(&mut ring) {}

        let mut decoder = TrackDecoder::new(Encoding::Mfm);
        let mut saw_idam = false;
        let mut saw_good_data = false;
        loop {
            match decoder.next_event(&mut ring, 512) {
                Some(DecodeEvent::Idam(h)) => {
                    saw_idam = true;
                    assert_eq!(h.sec_id, layout.sec_map[0]);
                }
                Some(DecodeEvent::Data { bytes, crc_ok }) => {
                    if crc_ok {
                        saw_good_data = true;
                        assert_eq!(bytes, vec![0xABu8; 512]);
                    }
                    break;
                }
                None => break,
            }
        }
        assert!(saw_idam);
        assert!(saw_good_data);
    }
}
