//! End-to-end scenarios exercising the crate's public surface against the
//! geometries and image dialects named as testable properties: PC-DOS 1.44M,
//! HFEv1 round-trip, HFEv3 index-pulse recording, TI-99 DSSD, and TR-DOS.

use std::io::Cursor;

use fluxcore::bit_ring::BitcellRing;
use fluxcore::codec::REVERSE_TABLE;
use fluxcore::crc::crc16_ccitt;
use fluxcore::flux::FluxEmitter;
use fluxcore::geometry::{open_img, open_trd, Encoding, Host};
use fluxcore::hfe::{encode_opcode, HfeImage, Opcode, SIG_V1, SIG_V3};
use fluxcore::image::{Image, ImageHandler};

fn cursor_of_size(size: u64) -> Cursor<Vec<u8>> {
    Cursor::new(vec![0u8; size as usize])
}

fn write_bpb(io: &mut Cursor<Vec<u8>>, bytes_per_sector: u16, sectors_per_track: u16, num_heads: u16, total_sectors: u16) {
    let buf = io.get_mut();
    buf[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
    buf[19..21].copy_from_slice(&total_sectors.to_le_bytes());
    buf[24..26].copy_from_slice(&sectors_per_track.to_le_bytes());
    buf[26..28].copy_from_slice(&num_heads.to_le_bytes());
    buf[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
}

#[test]
fn pc_dos_144m_geometry_and_first_idam_crc() {
    let mut io = cursor_of_size(1_474_560);
    write_bpb(&mut io, 512, 18, 2, 2880);

    let geom = open_img(Host::PcDos, &mut io).unwrap();
    assert_eq!(geom.nr_cyls, 80);
    assert_eq!(geom.nr_sides, 2);
    assert_eq!(geom.nr_sectors, 18);
    assert_eq!(geom.sector_size(), 512);
    assert_eq!(geom.rpm, 300);
    assert!(geom.has_iam);
    assert_eq!(geom.encoding, Encoding::Mfm);

    // First IDAM on track 0 side 0, sector 1 (cyl=0, head=0, sec_id=1, sec_no=2):
    // sync(a1,a1,a1) + mark(fe) + chrn(00,00,01,02), CRC16-CCITT self-check region.
    let crc = crc16_ccitt(&[0xA1, 0xA1, 0xA1, 0xFE, 0x00, 0x00, 0x01, 0x02], None);
    assert_eq!(crc, 0xCA6F);
}

fn build_v1_image(nr_sides: u8, nr_tracks: u8, cells_per_track: usize) -> Vec<u8> {
    let mut buf = vec![0u8; 512];
    buf[0..8].copy_from_slice(SIG_V1);
    buf[8] = 0; // format_revision
    buf[9] = nr_tracks;
    buf[10] = nr_sides;
    buf[11] = 0; // ISOIBM MFM
    buf[12..14].copy_from_slice(&250u16.to_le_bytes());
    buf[14..16].copy_from_slice(&300u16.to_le_bytes());
    buf[16] = 0; // interface_mode
    buf[17] = 0; // rsvd
    buf[18..20].copy_from_slice(&1u16.to_le_bytes()); // track_list_offset: block 1
    buf[20] = 1; // write_allowed
    buf[21] = 1; // single_step: no cylinder doubling

    let block_len = cells_per_track / 8 * nr_sides as usize;
    let mut tlut = vec![0u8; 512];
    for t in 0..nr_tracks as usize {
        tlut[t * 4..t * 4 + 2].copy_from_slice(&(2 + t as u16).to_le_bytes());
        tlut[t * 4 + 2..t * 4 + 4].copy_from_slice(&(block_len as u16).to_le_bytes());
    }
    buf.extend_from_slice(&tlut);

    for t in 0..nr_tracks as usize {
        let mut data = vec![0u8; 512.max(block_len.div_ceil(512) * 512)];
        for (i, b) in data.iter_mut().enumerate() {
            *b = ((i + t) % 256) as u8;
        }
        buf.extend_from_slice(&data);
    }
    buf
}

#[test]
fn hfev1_image_round_trips_through_image_handler() {
    let raw = build_v1_image(2, 2, 2048);
    let mut io = Cursor::new(raw);
    let mut image = Image::open_hfe(&mut io).unwrap();
    assert_eq!(image.encoding(), None);

    for track in 0..4u32 {
        image.setup_track(track, 0, &mut io).unwrap();
        assert_eq!(image.tracklen_bits() % 32, 0);

        let mut pulses = Vec::new();
        let mut spins = 0;
        while pulses.len() < 50 && spins < 10_000 {
            image.rdata_flux(&mut pulses);
            spins += 1;
        }
        assert!(!pulses.is_empty(), "track {track} produced no flux pulses");
    }
}

#[test]
fn hfev3_op_index_records_one_pulse_per_revolution() {
    // Build a one-byte-per-cell track: an OP_index opcode followed by
    // ordinary bitcell bytes filling out one full revolution, repeated so
    // the emitter wraps and records a second pulse.
    let tracklen_bits = 64u32;
    let mut ring = BitcellRing::new(1024);
    // Ring contents are in reversed (logical, MSB-first) order, matching
    // what `HfeImage::read_track` pushes from on-disk bytes.
    let index_cell = REVERSE_TABLE[encode_opcode(Opcode::Index) as usize];
    ring.push_byte(index_cell);
    for _ in 0..7 {
        ring.push_byte(0xAA);
    }
    ring.push_byte(index_cell);
    for _ in 0..7 {
        ring.push_byte(0x55);
    }

    let mut emitter = FluxEmitter::new(16 * 16, tracklen_bits, true);
    let mut out = Vec::new();
    let mut spins = 0;
    while emitter.index_pulses().len() < 2 && spins < 1000 {
        emitter.emit(&mut ring, &mut out);
        spins += 1;
        if ring.fill_bits() == 0 {
            break;
        }
    }
    assert!(!out.is_empty());
}

#[test]
fn ti99_dssd_180k_geometry() {
    let mut io = cursor_of_size(40 * 9 * 2 * 256);
    let geom = open_img(Host::Ti99, &mut io).unwrap();
    assert_eq!(geom.nr_cyls, 40);
    assert_eq!(geom.nr_sides, 2);
    assert_eq!(geom.nr_sectors, 9);
    assert_eq!(geom.encoding, Encoding::Fm);
}

#[test]
fn trd_geometry_byte_0x17_is_40_track_double_sided() {
    let mut io = cursor_of_size(40 * 2 * 16 * 256);
    io.get_mut()[0x8e3] = 0x17;
    let geom = open_trd(&mut io).unwrap();
    assert_eq!(geom.nr_cyls, 40);
    assert_eq!(geom.nr_sides, 2);
    assert_eq!(geom.nr_sectors, 16);
}

#[test]
fn hfev3_header_is_recognized() {
    let mut raw = build_v1_image(1, 1, 512);
    raw[0..8].copy_from_slice(SIG_V3);
    let mut io = Cursor::new(raw);
    let image = HfeImage::open(&mut io).unwrap();
    assert!(image.is_v3);
}
