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

//! Byte <-> bitcell lookup tables shared by the MFM and FM track codecs.

/// Byte-reversal table, used by the HFE writer to convert a raw bitcell byte
/// (MSB-first logical order) into HFE's LSB-first on-disk storage order.
pub const REVERSE_TABLE: [u8; 256] = generate_reverse_table();

const fn reverse_bits(mut byte: u8) -> u8 {
    byte = (byte & 0xF0) >> 4 | (byte & 0x0F) << 4;
    byte = (byte & 0xCC) >> 2 | (byte & 0x33) << 2;
    byte = (byte & 0xAA) >> 1 | (byte & 0x55) << 1;
    byte
}

const fn generate_reverse_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = reverse_bits(i as u8);
        i += 1;
    }
    table
}

/// MFM encoding table: `MFM_TABLE[byte]` is the 16-bit raw cell pattern for
/// `byte`, assuming the previous data bit (carried from the prior byte) is 0.
/// Callers crossing a byte boundary must additionally clear bit 15 when the
/// previous emitted cell's low bit was 1 (see [`mask_cross_cell`]) — MFM
/// never allows two consecutive flux-producing bits.
pub const MFM_TABLE: [u16; 256] = generate_mfm_table();

const fn generate_mfm_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut byte = 0usize;
    while byte < 256 {
        let mut cell = 0u16;
        let mut prev_data_bit = 0u8;
        let mut i = 7i32;
        while i >= 0 {
            let data_bit = ((byte >> i) & 1) as u8;
            let clock_bit = if prev_data_bit == 0 && data_bit == 0 { 1u16 } else { 0u16 };
            let shift = (i as u16) * 2;
            cell |= (data_bit as u16) << shift;
            cell |= clock_bit << (shift + 1);
            prev_data_bit = data_bit;
            i -= 1;
        }
        table[byte] = cell;
        byte += 1;
    }
    table
}

/// Clear the top clock bit of a freshly encoded raw cell if the previous raw
/// cell's low bit (its last data bit) was set: MFM forbids two adjacent
/// flux-producing bits across a cell boundary.
#[inline]
pub fn mask_cross_cell(raw: u16, prev_raw: u16) -> u16 {
    raw & !(prev_raw << 15)
}

/// Decode a raw 16-bit MFM cell back into its data byte, discarding clock bits.
#[inline]
pub fn mfm_decode_cell(raw: u16) -> u8 {
    let mut byte = 0u8;
    let mut i = 7i32;
    while i >= 0 {
        let data_bit = ((raw >> (i * 2)) & 1) as u8;
        byte = (byte << 1) | data_bit;
        i -= 1;
    }
    byte
}

/// Spread a byte's bits into the even bit positions of a 16-bit word, zeroing
/// the odd positions. Used to build FM sync cells from independent data and
/// clock-pattern bytes.
#[inline]
const fn spread(byte: u8) -> u16 {
    MFM_TABLE[byte as usize] & 0x5555
}

/// Synthesize a raw FM cell for `data`, using `clock` as the clock-pattern
/// byte (for sync marks this is a clock pattern that violates normal FM
/// encoding, e.g. `0xC7`, which is what makes a sync cell recognizable).
#[inline]
pub fn fm_sync(data: u8, clock: u8) -> u16 {
    let dat = spread(data);
    let clk = spread(clock) << 1;
    clk | dat
}

/// Encode an ordinary FM data byte: a clock transition in every cell, data
/// bits in the even positions. Equivalent to [`fm_sync`] with an all-ones
/// clock byte.
#[inline]
pub fn fm_encode(data: u8) -> u16 {
    fm_sync(data, 0xFF)
}

/// Clock pattern used for IBM-format FM address marks (IDAM/DAM).
pub const FM_SYNC_CLOCK: u8 = 0xC7;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfm_round_trips_every_byte() {
        for byte in 0u16..256 {
            let cell = MFM_TABLE[byte as usize];
            assert_eq!(mfm_decode_cell(cell), byte as u8);
        }
    }

    #[test]
    fn mfm_table_has_no_adjacent_ones_within_a_cell() {
        for byte in 0u16..256 {
            let cell = MFM_TABLE[byte as usize];
            let mut prev = 0u16;
            for i in (0..16).rev() {
                let bit = (cell >> i) & 1;
                assert!(!(prev == 1 && bit == 1), "adjacent 1 bits in cell for byte {byte:#04x}");
                prev = bit;
            }
        }
    }

    #[test]
    fn reverse_table_matches_naive_reversal() {
        for byte in 0u16..256 {
            let byte = byte as u8;
            let mut expect = 0u8;
            for i in 0..8 {
                if byte & (1 << i) != 0 {
                    expect |= 1 << (7 - i);
                }
            }
            assert_eq!(REVERSE_TABLE[byte as usize], expect);
        }
    }

    #[test]
    fn fm_sync_places_data_in_even_bit_positions() {
        let raw = fm_sync(0xFE, FM_SYNC_CLOCK);
        assert_eq!(mfm_decode_cell(raw), 0xFE);
    }
}
