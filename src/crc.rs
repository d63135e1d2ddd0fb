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

//! CRC-16/CCITT as used by the IBM/ISO System34 track format.

/// Initial value fed to every IDAM/DAM CRC computation.
pub const CRC_CCITT_INITIAL: u16 = 0xFFFF;

const POLY: u16 = 0x1021;

/// Compute CRC-16-CCITT over `data`, continuing from `start` (defaults to
/// [`CRC_CCITT_INITIAL`]). Callers checking a header-plus-trailing-CRC region
/// pass the full region including the CRC bytes; a correct region crc's to 0.
pub fn crc16_ccitt(data: &[u8], start: Option<u16>) -> u16 {
    let mut crc = start.unwrap_or(CRC_CCITT_INITIAL);
    for &byte in data {
        crc = crc16_ccitt_byte(byte, crc);
    }
    crc
}

/// Incremental, single-byte CRC-16-CCITT update, for streaming the data phase
/// of a sector without buffering the whole payload first.
#[inline]
pub fn crc16_ccitt_byte(byte: u8, crc: u16) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 { (crc << 1) ^ POLY } else { crc << 1 };
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idam_crc_self_checks() {
        let idam = [0xa1u8, 0xa1, 0xa1, 0xfe, 0, 0, 1, 2];
        let crc = crc16_ccitt(&idam, None);
        let mut full = idam.to_vec();
        full.push((crc >> 8) as u8);
        full.push(crc as u8);
        assert_eq!(crc16_ccitt(&full, None), 0);
    }

    #[test]
    fn incremental_matches_bulk() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let bulk = crc16_ccitt(data, None);
        let mut crc = CRC_CCITT_INITIAL;
        for &b in data {
            crc = crc16_ccitt_byte(b, crc);
        }
        assert_eq!(bulk, crc);
    }
}
