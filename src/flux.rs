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

//! Converts a queued bitcell stream into flux-reversal timer intervals, the
//! representation a drive emulator's interrupt-driven tail actually feeds to
//! hardware: one tick count per `1` bitcell, counting the `0` bitcells since
//! the previous `1`.
//!
//! This is the consumer side of a [`BitcellRing`]: it never blocks, and it
//! interprets HFEv3's inline opcode stream (index marks, bitrate changes,
//! and flaky-bit injection) as it walks the ring byte by byte.

use rand::Rng;

use crate::bit_ring::BitcellRing;
use crate::codec::REVERSE_TABLE;
use crate::hfe::{decode_opcode, Opcode};
use crate::MAX_CUSTOM_PULSES;

/// Minimum bytes of lookahead the emitter wants queued before it extracts
/// another bitcell, matching the reference tail's 3-byte readahead.
const LOOKAHEAD_BITS: u32 = 3 * 8;

pub struct FluxEmitter {
    ticks_per_cell: u32,
    tracklen_bits: u32,
    cur_bc: u32,
    cur_ticks: u64,
    tracklen_ticks: u64,
    index_pulses: [u64; MAX_CUSTOM_PULSES],
    next_index_pulse_pos: usize,
    index_pulses_len: usize,
    is_v3: bool,
    cur_byte: u8,
    bit_pos: u8,
    pending_ticks: u32,
    rng_byte: Option<u8>,
}

impl FluxEmitter {
    pub fn new(ticks_per_cell: u32, tracklen_bits: u32, is_v3: bool) -> Self {
        FluxEmitter {
            ticks_per_cell,
            tracklen_bits,
            cur_bc: 0,
            cur_ticks: 0,
            tracklen_ticks: 0,
            index_pulses: [0; MAX_CUSTOM_PULSES],
            next_index_pulse_pos: 0,
            index_pulses_len: 0,
            is_v3,
            cur_byte: 0,
            bit_pos: 8,
            pending_ticks: 0,
            rng_byte: None,
        }
    }

    pub fn tracklen_ticks(&self) -> u64 {
        self.tracklen_ticks
    }

    pub fn index_pulses(&self) -> &[u64] {
        &self.index_pulses[..self.index_pulses_len]
    }

    fn record_index_pulse(&mut self) {
        if self.next_index_pulse_pos < MAX_CUSTOM_PULSES {
            self.index_pulses[self.next_index_pulse_pos] = self.cur_ticks;
            self.next_index_pulse_pos += 1;
        }
    }

    /// Pull whatever bytes are available from `ring` and push flux-reversal
    /// tick counts into `out`. Returns `true` if progress was made.
    pub fn emit(&mut self, ring: &mut BitcellRing, out: &mut Vec<u32>) -> bool {
        let mut produced = false;
        loop {
            if ring.fill_bits() < LOOKAHEAD_BITS {
                break;
            }

            if self.cur_bc >= self.tracklen_bits {
                self.tracklen_ticks = self.cur_ticks;
                self.cur_bc = 0;
                self.cur_ticks = 0;
                // Skip any unconsumed tail of the in-flight byte.
                self.bit_pos = 8;
                self.index_pulses_len = self.next_index_pulse_pos;
                self.next_index_pulse_pos = 0;
                produced = true;
                continue;
            }

            if self.bit_pos >= 8 {
                if ring.fill_bits() < 8 {
                    break;
                }
                self.cur_byte = ring.pop_byte();
                self.bit_pos = 0;
            }

            let mut x = self.cur_byte;
            let mut y = self.bit_pos;

            if self.is_v3 && y == 0 {
                // `x` is stored in reversed (logical, MSB-first) order; opcode
                // detection and any raw value bytes that follow an opcode are
                // defined in terms of the on-disk byte, so un-reverse first.
                if let Some(op) = decode_opcode(REVERSE_TABLE[x as usize]) {
                    match op {
                        Opcode::Index => {
                            self.record_index_pulse();
                            self.advance_cells(1);
                            produced = true;
                            continue;
                        }
                        Opcode::Nop => {
                            self.advance_cells(1);
                            produced = true;
                            continue;
                        }
                        Opcode::Bitrate => {
                            if ring.fill_bits() < 8 {
                                break;
                            }
                            let mult = REVERSE_TABLE[ring.pop_byte() as usize];
                            self.ticks_per_cell = (2u32 * 16 * mult as u32) / 72;
                            self.cur_bc = self.cur_bc.wrapping_add(16);
                            self.bit_pos = 8;
                            produced = true;
                            continue;
                        }
                        Opcode::Skip => {
                            if ring.fill_bits() < 8 {
                                break;
                            }
                            let skip_bits = REVERSE_TABLE[ring.pop_byte() as usize] & 7;
                            self.cur_bc = self.cur_bc.wrapping_add(16);
                            if ring.fill_bits() < 8 {
                                break;
                            }
                            self.cur_byte = ring.pop_byte();
                            self.bit_pos = skip_bits;
                            x = self.cur_byte;
                            y = self.bit_pos;
                        }
                        Opcode::Rand => {
                            x = self.rand_byte();
                        }
                    }
                }
            }

            while y < 8 {
                let bit = (x >> (7 - y)) & 1;
                self.pending_ticks += self.ticks_per_cell >> 4;
                self.cur_ticks += (self.ticks_per_cell >> 4) as u64;
                self.cur_bc = self.cur_bc.wrapping_add(1);
                y += 1;
                if bit == 1 {
                    out.push(self.pending_ticks.saturating_sub(1));
                    self.pending_ticks = 0;
                    produced = true;
                }
            }
            self.bit_pos = y;
        }
        produced
    }

    fn advance_cells(&mut self, bytes: u32) {
        self.cur_bc = self.cur_bc.wrapping_add(bytes * 8);
        self.bit_pos = 8;
    }

    fn rand_byte(&mut self) -> u8 {
        if let Some(b) = self.rng_byte.take() {
            return b;
        }
        rand::thread_rng().gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_one_pulse_per_set_bit() {
        let mut ring = BitcellRing::new(16);
        ring.push_byte(0b1000_0000);
        ring.push_byte(0b0000_0001);
        ring.push_byte(0);
        ring.push_byte(0);
        let mut emitter = FluxEmitter::new(16 * 16, 64, false);
        let mut out = Vec::new();
        emitter.emit(&mut ring, &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn wraps_track_and_records_length() {
        let mut ring = BitcellRing::new(16);
        for _ in 0..8 {
            ring.push_byte(0xFF);
        }
        let mut emitter = FluxEmitter::new(16 * 16, 16, false);
        let mut out = Vec::new();
        emitter.emit(&mut ring, &mut out);
        assert!(emitter.tracklen_ticks() > 0);
    }
}
