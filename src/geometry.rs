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

//! Geometry resolution: mapping an image's size, an optional host hint, and
//! on-image metadata to a complete [`Geometry`].

use binrw::{BinRead, BinWrite};
use log::{debug, trace};
use strum::{Display, EnumString};

use crate::io::FileIo;
use crate::DiskImageError;

/// Sector-payload layout within the backing file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `(cyl * nr_sides + side) * trk_len`
    Interleaved,
    /// As [`Layout::Interleaved`], but `side` is complemented.
    InterleavedSwapSides,
    /// Side 0 cylinders ascending, then side 1 cylinders descending.
    SequentialReverseSide1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Mfm,
    Fm,
}

/// Host platforms with a distinct geometry-template list, mirroring the
/// `HOST_*` configuration surface an emulator frontend would expose.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumString, Display)]
pub enum Host {
    Akai,
    Gem,
    Casio,
    Dec,
    Ensoniq,
    Fluke,
    Kaypro,
    Memotech,
    Msx,
    Nascom,
    Pc98,
    PcDos,
    Ti99,
    Uknc,
    Generic,
}

/// Resolved per-image geometry constants, established once at `open`.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub nr_cyls: u8,
    pub nr_sides: u8,
    pub double_step: bool,
    pub nr_sectors: u8,
    /// Sector size is `128 << sec_no`.
    pub sec_no: u8,
    pub interleave: u8,
    pub skew: u8,
    pub skew_cyls_only: bool,
    pub sec_base: [u8; 2],
    pub has_iam: bool,
    pub layout: Layout,
    pub rpm: u16,
    /// 0 means "use the codec default for this `sec_no`".
    pub gap_2: u8,
    pub gap_3: u8,
    pub gap_4a: u8,
    pub post_crc_syncs: u8,
    pub base_off: u32,
    pub encoding: Encoding,
}

impl Geometry {
    pub fn sector_size(&self) -> usize {
        128usize << self.sec_no
    }

    pub fn sector_base(&self, side: u8) -> u8 {
        self.sec_base[(side & (self.nr_sides - 1)) as usize]
    }

    pub fn image_size(&self) -> u64 {
        self.nr_cyls as u64 * self.nr_sides as u64 * self.nr_sectors as u64 * self.sector_size() as u64
            + self.base_off as u64
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CylsClass {
    C40,
    C80,
}

impl CylsClass {
    fn tolerance(self) -> (u32, u32) {
        match self {
            CylsClass::C40 => (38, 42),
            CylsClass::C80 => (77, 85),
        }
    }
}

/// A single candidate geometry, equivalent to one row of the reference
/// implementation's `struct img_type` tables.
#[derive(Copy, Clone, Debug)]
struct Template {
    nr_secs: u8,
    nr_sides: u8,
    has_iam: bool,
    gap3: u8,
    interleave: u8,
    sec_no: u8,
    base: u8,
    inter_track_numbering: bool,
    skew: u8,
    cyls: CylsClass,
    rpm: u16,
}

const fn t(
    nr_secs: u8,
    nr_sides: u8,
    has_iam: bool,
    gap3: u8,
    interleave: u8,
    sec_no: u8,
    base: u8,
    inter_track_numbering: bool,
    skew: u8,
    cyls: CylsClass,
    rpm: u16,
) -> Template {
    Template { nr_secs, nr_sides, has_iam, gap3, interleave, sec_no, base, inter_track_numbering, skew, cyls, rpm }
}

use CylsClass::{C40, C80};

const IMG_TYPE: &[Template] = &[
    t(8, 1, true, 84, 1, 2, 1, false, 0, C40, 300),  // 160k
    t(9, 1, true, 84, 1, 2, 1, false, 0, C40, 300),  // 180k
    t(10, 1, true, 30, 1, 2, 1, false, 0, C40, 300), // 200k
    t(8, 2, true, 84, 1, 2, 1, false, 0, C40, 300),  // 320k
    t(9, 2, true, 84, 1, 2, 1, false, 0, C40, 300),  // 360k (#1)
    t(10, 2, true, 30, 1, 2, 1, false, 0, C40, 300), // 400k (#1)
    t(15, 2, true, 84, 1, 2, 1, false, 0, C80, 360), // 1.2MB
    t(9, 1, true, 84, 1, 2, 1, false, 0, C80, 300),  // 360k (#2)
    t(10, 1, true, 30, 1, 2, 1, false, 0, C80, 300), // 400k (#2)
    t(11, 1, true, 3, 2, 2, 1, false, 0, C80, 300),  // 440k
    t(8, 2, true, 84, 1, 2, 1, false, 0, C80, 300),  // 640k
    t(9, 2, true, 84, 1, 2, 1, false, 0, C80, 300),  // 720k
    t(10, 2, true, 30, 1, 2, 1, false, 0, C80, 300), // 800k
    t(11, 2, true, 3, 2, 2, 1, false, 0, C80, 300),  // 880k
    t(18, 2, true, 84, 1, 2, 1, false, 0, C80, 300), // 1.44M
    t(19, 2, true, 70, 1, 2, 1, false, 0, C80, 300), // 1.52M
    t(21, 2, true, 18, 2, 2, 1, false, 0, C80, 300), // 1.68M
    t(20, 2, true, 40, 1, 2, 1, false, 0, C80, 300), // 1.6M
    t(36, 2, true, 84, 1, 2, 1, false, 0, C80, 300), // 2.88M
];

const ADFS_TYPE: &[Template] = &[
    t(5, 2, true, 116, 1, 3, 0, false, 1, C80, 300),  // ADFS D/E: 800k
    t(10, 2, true, 116, 1, 3, 0, false, 2, C80, 300), // ADFS F: 1600k
    t(16, 2, true, 57, 1, 1, 0, false, 0, C80, 300),  // ADFS L: 640k
    t(16, 1, true, 57, 1, 1, 0, false, 0, C80, 300),  // ADFS M: 320k
    t(16, 1, true, 57, 1, 1, 0, false, 0, C40, 300),  // ADFS S: 160k
];

const AKAI_TYPE: &[Template] =
    &[t(5, 2, true, 116, 1, 3, 1, false, 0, C80, 300), t(10, 2, true, 116, 1, 3, 1, false, 0, C80, 300)];

const CASIO_TYPE: &[Template] = &[t(8, 2, true, 116, 3, 3, 1, false, 0, C80, 360)];

const D81_TYPE: &[Template] = &[t(10, 2, true, 30, 1, 2, 1, false, 0, C80, 300)];

const DEC_TYPE: &[Template] = &[t(10, 1, true, 30, 1, 2, 1, false, 0, C80, 300)];

const ENSONIQ_TYPE: &[Template] =
    &[t(10, 2, true, 30, 1, 2, 0, false, 0, C80, 300), t(20, 2, true, 40, 1, 2, 0, false, 0, C80, 300)];

const FLUKE_TYPE: &[Template] = &[t(16, 2, true, 57, 2, 1, 0, false, 0, C80, 300)];

const KAYPRO_TYPE: &[Template] = &[
    t(10, 1, true, 30, 3, 2, 0, true, 0, C40, 300),
    t(10, 2, true, 30, 3, 2, 0, true, 0, C40, 300),
    t(10, 2, true, 30, 3, 2, 0, true, 0, C80, 300),
];

const MBD_TYPE: &[Template] = &[
    t(11, 2, true, 30, 1, 3, 1, false, 0, C80, 300),
    t(5, 2, true, 116, 3, 1, 1, false, 0, C80, 300),
    t(11, 2, true, 30, 1, 3, 1, false, 0, C40, 300),
    t(5, 2, true, 116, 3, 1, 1, false, 0, C40, 300),
];

const MEMOTECH_TYPE: &[Template] =
    &[t(16, 2, true, 57, 3, 1, 1, false, 0, C40, 300), t(16, 2, true, 57, 3, 1, 1, false, 0, C80, 300)];

const MSX_TYPE: &[Template] =
    &[t(8, 1, true, 84, 1, 2, 1, false, 0, C80, 300), t(9, 1, true, 84, 1, 2, 1, false, 0, C80, 300)];

const NASCOM_TYPE: &[Template] =
    &[t(16, 1, true, 57, 3, 1, 1, false, 8, C80, 300), t(16, 2, true, 57, 3, 1, 1, false, 8, C80, 300)];

const PC98_TYPE: &[Template] = &[
    t(8, 2, true, 116, 1, 3, 1, false, 0, C80, 360),
    t(8, 2, true, 116, 1, 2, 1, false, 0, C80, 360),
    t(9, 2, true, 116, 1, 2, 1, false, 0, C80, 360),
];

const UKNC_TYPE: &[Template] = &[t(10, 2, false, 38, 1, 2, 1, false, 0, C80, 300)];

/// Walk `templates` looking for one whose (sides × sectors × sector-size ×
/// some cylinder count in the template's tolerance window) matches `size`.
fn match_template(templates: &[Template], size: u64) -> Option<(Template, u8)> {
    for tpl in templates {
        let (min_cyls, max_cyls) = tpl.cyls.tolerance();
        let cyl_sz = tpl.nr_secs as u64 * (128u64 << tpl.sec_no) * tpl.nr_sides as u64;
        for cyls in min_cyls..=max_cyls {
            if cyls as u64 * cyl_sz == size {
                return Some((*tpl, cyls as u8));
            }
        }
    }
    None
}

fn geometry_from_template(tpl: &Template, nr_cyls: u8) -> Geometry {
    let mut sec_base = [tpl.base, tpl.base];
    if tpl.inter_track_numbering {
        sec_base[1] += tpl.nr_secs;
    }
    Geometry {
        nr_cyls,
        nr_sides: tpl.nr_sides,
        double_step: false,
        nr_sectors: tpl.nr_secs,
        sec_no: tpl.sec_no,
        interleave: tpl.interleave,
        skew: tpl.skew,
        skew_cyls_only: false,
        sec_base,
        has_iam: tpl.has_iam,
        layout: Layout::Interleaved,
        rpm: tpl.rpm,
        gap_2: 0,
        gap_3: tpl.gap3,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Mfm,
    }
}

fn open_from_list(templates: &[Template], size: u64) -> Option<Geometry> {
    let (tpl, cyls) = match_template(templates, size)?;
    Some(geometry_from_template(&tpl, cyls))
}

/// BIOS Parameter Block, as read by PC-DOS and MSX geometry disambiguation.
#[derive(Debug, Default, BinRead, BinWrite)]
#[brw(little)]
struct Bpb {
    #[brw(seek_before = std::io::SeekFrom::Start(510))]
    signature: u16,
    #[brw(seek_before = std::io::SeekFrom::Start(11))]
    bytes_per_sector: u16,
    #[brw(seek_before = std::io::SeekFrom::Start(24))]
    sectors_per_track: u16,
    #[brw(seek_before = std::io::SeekFrom::Start(26))]
    num_heads: u16,
    #[brw(seek_before = std::io::SeekFrom::Start(19))]
    total_sectors: u16,
}

fn read_bpb(io: &mut dyn FileIo) -> Result<Bpb, DiskImageError> {
    // Read the whole boot-sector-sized region into a buffer so `seek_before`
    // (relative to the start of whatever reader binrw is given) lands on the
    // same offsets a real boot sector uses, then let binrw do the parsing.
    io.seek_from_start(0)?;
    let mut raw = [0u8; 512];
    io.read_exact(&mut raw)?;
    let mut cursor = std::io::Cursor::new(&raw[..]);
    Ok(Bpb::read(&mut cursor)?)
}

/// Dispatches the default IMG geometry list, plus every host-specific list
/// that needs only size-based template matching (no embedded header).
pub fn open_img(host: Host, io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;

    let host_geometry = match host {
        Host::Akai | Host::Gem => open_from_list(AKAI_TYPE, size),
        Host::Casio => open_from_list(CASIO_TYPE, size),
        Host::Dec => open_from_list(DEC_TYPE, size),
        Host::Ensoniq => open_from_list(ENSONIQ_TYPE, size),
        Host::Fluke => open_from_list(FLUKE_TYPE, size),
        Host::Kaypro => open_from_list(KAYPRO_TYPE, size),
        Host::Memotech => open_from_list(MEMOTECH_TYPE, size),
        Host::Msx => return open_msx(io),
        Host::Nascom => open_from_list(NASCOM_TYPE, size).map(|mut g| {
            g.skew_cyls_only = true;
            g
        }),
        Host::Pc98 => open_from_list(PC98_TYPE, size),
        Host::PcDos => return open_pc_dos(io),
        Host::Ti99 => return open_ti99(io),
        Host::Uknc => {
            return open_from_list(UKNC_TYPE, size)
                .map(|mut g| {
                    g.gap_2 = 24;
                    g.gap_4a = 27;
                    g.post_crc_syncs = 1;
                    g
                })
                .ok_or(DiskImageError::UnknownGeometry);
        }
        Host::Generic => None,
    };

    if let Some(g) = host_geometry {
        debug!("resolved geometry via {host} host list: {:?}x{:?}, {} sectors", g.nr_cyls, g.nr_sides, g.nr_sectors);
        return Ok(g);
    }

    trace!("host-specific geometry list exhausted, falling back to default IMG list");
    open_from_list(IMG_TYPE, size).ok_or(DiskImageError::UnknownGeometry)
}

fn open_msx(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    if size == 320 * 1024 || size == 360 * 1024 {
        let bpb = read_bpb(io)?;
        let plausible = bpb.bytes_per_sector == 512
            && (bpb.num_heads == 1 || bpb.num_heads == 2)
            && bpb.total_sectors as u64 == size / bpb.bytes_per_sector as u64
            && (bpb.sectors_per_track == 8 || bpb.sectors_per_track == 9);
        if plausible {
            let nr_sides = bpb.num_heads as u8;
            return Ok(Geometry {
                nr_cyls: if nr_sides == 1 { 80 } else { 40 },
                nr_sides,
                double_step: false,
                nr_sectors: bpb.sectors_per_track as u8,
                sec_no: 2,
                interleave: 1,
                skew: 0,
                skew_cyls_only: false,
                sec_base: [1, 1],
                has_iam: true,
                layout: Layout::Interleaved,
                rpm: 300,
                gap_2: 0,
                gap_3: 0,
                gap_4a: 0,
                post_crc_syncs: 0,
                base_off: 0,
                encoding: Encoding::Mfm,
            });
        }
    }
    open_from_list(MSX_TYPE, size).ok_or(DiskImageError::UnknownGeometry)
}

fn open_pc_dos(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let bpb = read_bpb(io)?;
    if bpb.signature != 0xAA55 {
        return Err(DiskImageError::UnknownGeometry);
    }
    let sec_no = (0..=6).find(|&n| (128u16 << n) == bpb.bytes_per_sector).ok_or(DiskImageError::UnknownGeometry)?;
    if bpb.sectors_per_track == 0 || bpb.sectors_per_track as usize > 62 {
        return Err(DiskImageError::UnknownGeometry);
    }
    if bpb.num_heads != 1 && bpb.num_heads != 2 {
        return Err(DiskImageError::UnknownGeometry);
    }
    let nr_sectors = bpb.sectors_per_track;
    let nr_sides = bpb.num_heads;
    let nr_cyls = (bpb.total_sectors as u32).div_ceil(nr_sectors as u32 * nr_sides as u32);
    if nr_cyls == 0 {
        return Err(DiskImageError::UnknownGeometry);
    }
    Ok(Geometry {
        nr_cyls: nr_cyls as u8,
        nr_sides: nr_sides as u8,
        double_step: false,
        nr_sectors: nr_sectors as u8,
        sec_no: sec_no as u8,
        interleave: 1,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [1, 1],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 0,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Mfm,
    })
}

pub fn open_adfs(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    open_from_list(ADFS_TYPE, size)
        .map(|mut g| {
            g.skew_cyls_only = true;
            g
        })
        .ok_or(DiskImageError::UnknownGeometry)
}

pub fn open_d81(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    open_from_list(D81_TYPE, size)
        .map(|mut g| {
            g.layout = Layout::InterleavedSwapSides;
            g
        })
        .ok_or(DiskImageError::UnknownGeometry)
}

pub fn open_mbd(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    open_from_list(MBD_TYPE, size).ok_or(DiskImageError::UnknownGeometry)
}

/// MGT (+D/+3 Disciple/SAM) images use the default IMG list verbatim.
pub fn open_mgt(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    open_from_list(IMG_TYPE, size).ok_or(DiskImageError::UnknownGeometry)
}

/// Atari ST: the default 80-cylinder entries with no IAM, and a 2-sector
/// skew on 9-sectors-per-track (720k) disks to match how TOS formats them.
pub fn open_st(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    let st_type: Vec<Template> = IMG_TYPE
        .iter()
        .filter(|tpl| tpl.cyls == C80)
        .map(|tpl| {
            let mut tpl = *tpl;
            tpl.has_iam = false;
            if tpl.nr_secs == 9 {
                // TOS formats 9-sector 720k disks with an interleave of 2.
                tpl.interleave = 2;
            }
            tpl
        })
        .collect();
    open_from_list(&st_type, size).ok_or(DiskImageError::UnknownGeometry)
}

pub fn open_trd(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    io.seek_from_start(0x8e3)?;
    let mut geom_byte = [0u8; 1];
    io.read_exact(&mut geom_byte)?;
    let (nr_cyls, nr_sides) = match geom_byte[0] {
        0x16 => (80, 2),
        0x17 => (40, 2),
        0x18 => (80, 1),
        0x19 => (40, 1),
        _ => {
            if size <= 40 * 16 * 256 {
                (40, 1)
            } else if size <= 40 * 2 * 16 * 256 {
                (40, 2)
            } else {
                (80, 2)
            }
        }
    };
    Ok(Geometry {
        nr_cyls,
        nr_sides,
        double_step: false,
        nr_sectors: 16,
        sec_no: 1,
        interleave: 1,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [1, 1],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 57,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Mfm,
    })
}

/// Opus Discovery ("OPD") images: fixed 40/1 or 80/2 geometry by exact size.
pub fn open_opd(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    let (nr_cyls, nr_sides) = match size {
        184_320 => (40, 1),
        737_280 => (80, 2),
        _ => return Err(DiskImageError::UnknownGeometry),
    };
    Ok(Geometry {
        nr_cyls,
        nr_sides,
        double_step: false,
        nr_sectors: 18,
        sec_no: 1,
        interleave: 13,
        skew: 13,
        skew_cyls_only: true,
        sec_base: [0, 0],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 12,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Mfm,
    })
}

fn open_dfs(nr_sides: u8) -> Geometry {
    Geometry {
        nr_cyls: 80,
        nr_sides,
        double_step: false,
        nr_sectors: 10,
        sec_no: 1,
        interleave: 1,
        skew: 3,
        skew_cyls_only: true,
        sec_base: [0, 0],
        has_iam: false,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 21,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Fm,
    }
}

/// Acorn DFS single-sided disk ("SSD").
pub fn open_ssd() -> Geometry {
    open_dfs(1)
}

/// Acorn DFS double-sided disk ("DSD").
pub fn open_dsd() -> Geometry {
    open_dfs(2)
}

/// SAB Diskimage Utility images carry their own 46-byte header.
pub fn open_sdu(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    io.seek_from_start(0)?;
    let mut header = [0u8; 46];
    io.read_exact(&mut header)?;
    let max_c = u16::from_le_bytes([header[28], header[29]]);
    let max_h = u16::from_le_bytes([header[30], header[31]]);
    let max_s = u16::from_le_bytes([header[32], header[33]]);

    if (max_c != 40 && max_c != 80)
        || (max_h != 1 && max_h != 2)
        || (max_s != 9 && max_s != 18 && max_s != 36)
    {
        return Err(DiskImageError::UnknownGeometry);
    }

    Ok(Geometry {
        nr_cyls: max_c as u8,
        nr_sides: max_h as u8,
        double_step: false,
        nr_sectors: max_s as u8,
        sec_no: 2,
        interleave: 1,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [1, 1],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 84,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 46,
        encoding: Encoding::Mfm,
    })
}

fn open_ti99(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    if size % 256 != 0 {
        return Err(DiskImageError::UnknownGeometry);
    }
    let mut sectors256 = size / 256;
    if sectors256 % 10 == 3 {
        // Trailing 3-sector bad-sector-map footer; ignored.
        sectors256 -= 3;
    }
    if sectors256 == 0 {
        return Err(DiskImageError::UnknownGeometry);
    }

    io.seek_from_start(0)?;
    let mut vib = [0u8; 23];
    io.read_exact(&mut vib)?;
    let have_vib = &vib[13..16] == b"DSK";
    let vib_sides = vib[21];
    let vib_tracks_per_side = vib[20];

    let mut geom = Geometry {
        nr_cyls: 0,
        nr_sides: 0,
        double_step: false,
        nr_sectors: 0,
        sec_no: 1,
        interleave: 4,
        skew: 3,
        skew_cyls_only: true,
        sec_base: [0, 0],
        has_iam: false,
        layout: Layout::SequentialReverseSide1,
        rpm: 300,
        gap_2: 0,
        gap_3: 44,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Fm,
    };

    if sectors256 % (40 * 9) == 0 {
        match sectors256 / (40 * 9) {
            1 => {
                geom.nr_cyls = 40;
                geom.nr_sides = 1;
                geom.nr_sectors = 9;
                geom.gap_3 = 44;
                geom.encoding = Encoding::Fm;
                return Ok(geom);
            }
            2 => {
                if have_vib && vib_sides == 1 {
                    geom.nr_cyls = 40;
                    geom.nr_sides = 1;
                    geom.nr_sectors = 18;
                    geom.interleave = 5;
                    geom.gap_3 = 24;
                    geom.encoding = Encoding::Mfm;
                    return Ok(geom);
                }
                geom.nr_cyls = 40;
                geom.nr_sides = 2;
                geom.nr_sectors = 9;
                geom.gap_3 = 44;
                geom.encoding = Encoding::Fm;
                return Ok(geom);
            }
            4 => {
                if have_vib && vib_tracks_per_side == 80 {
                    geom.nr_cyls = 80;
                    geom.nr_sides = 2;
                    geom.nr_sectors = 9;
                    geom.gap_3 = 44;
                    geom.encoding = Encoding::Fm;
                    return Ok(geom);
                }
                geom.nr_cyls = 40;
                geom.nr_sides = 2;
                geom.nr_sectors = 18;
                geom.interleave = 5;
                geom.gap_3 = 24;
                geom.encoding = Encoding::Mfm;
                return Ok(geom);
            }
            8 => {
                geom.nr_cyls = 80;
                geom.nr_sides = 2;
                geom.nr_sectors = 18;
                geom.interleave = 5;
                geom.gap_3 = 24;
                geom.encoding = Encoding::Mfm;
                return Ok(geom);
            }
            16 => {
                geom.nr_cyls = 80;
                geom.nr_sides = 2;
                geom.nr_sectors = 36;
                geom.interleave = 5;
                geom.gap_3 = 24;
                geom.encoding = Encoding::Mfm;
                return Ok(geom);
            }
            _ => {}
        }
    } else if sectors256 % (40 * 16) == 0 {
        let nr_sides = sectors256 / (40 * 16);
        if nr_sides <= 2 {
            geom.nr_cyls = 40;
            geom.nr_sides = nr_sides as u8;
            geom.nr_sectors = 16;
            geom.interleave = 5;
            geom.gap_3 = 44;
            geom.encoding = Encoding::Mfm;
            return Ok(geom);
        }
    }

    Err(DiskImageError::UnknownGeometry)
}

pub fn open_jvc(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    let size = io.size()?;
    let header_len = (size & 255) as usize;
    // Defaults if the header is shorter than the full 5-byte layout.
    let mut spt = 18u16;
    let mut sides = 1u8;
    let mut ssize_code = 1u8;
    let mut sec_id = 1u8;
    let mut attr = 0u8;

    if header_len > 0 {
        let mut header = [0u8; 5];
        io.seek_from_start(0)?;
        io.read_exact(&mut header[..header_len.min(5)])?;
        spt = header[0] as u16;
        if header_len > 1 {
            sides = header[1];
        }
        if header_len > 2 {
            ssize_code = header[2];
        }
        if header_len > 3 {
            sec_id = header[3];
        }
        if header_len > 4 {
            attr = header[4];
        }
    }

    if attr != 0 || (sides != 1 && sides != 2) || spt == 0 {
        return Err(DiskImageError::UnknownGeometry);
    }

    let sec_no = ssize_code & 3;
    let bps = 128u64 << sec_no;
    let mut bpc = bps * spt as u64 * sides as u64;
    let body = size - header_len as u64;
    let mut nr_cyls = body / bpc;
    let mut nr_sides = sides;
    if nr_cyls >= 88 && nr_sides == 1 {
        nr_sides = 2;
        nr_cyls /= 2;
        bpc *= 2;
    }
    if body % bpc >= bps {
        nr_cyls += 1;
    }

    Ok(Geometry {
        nr_cyls: nr_cyls as u8,
        nr_sides,
        double_step: false,
        nr_sectors: spt as u8,
        sec_no,
        interleave: 3,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [sec_id, sec_id],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 20,
        gap_4a: 54,
        post_crc_syncs: 0,
        base_off: header_len as u32,
        encoding: Encoding::Mfm,
    })
}

pub fn open_vdk(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    io.seek_from_start(0)?;
    let mut header = [0u8; 12];
    io.read_exact(&mut header)?;
    if &header[0..2] != b"dk" {
        return Err(DiskImageError::UnknownGeometry);
    }
    let hlen = u16::from_le_bytes([header[2], header[3]]);
    if hlen < 12 {
        return Err(DiskImageError::UnknownGeometry);
    }
    let nr_cyls = header[8];
    let nr_sides = header[9];
    if nr_sides != 1 && nr_sides != 2 {
        return Err(DiskImageError::UnknownGeometry);
    }

    Ok(Geometry {
        nr_cyls,
        nr_sides,
        double_step: false,
        nr_sectors: 18,
        sec_no: 1,
        interleave: 2,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [1, 1],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 300,
        gap_2: 0,
        gap_3: 20,
        gap_4a: 54,
        post_crc_syncs: 0,
        base_off: hlen as u32,
        encoding: Encoding::Mfm,
    })
}

pub fn open_pc98_fdi(io: &mut dyn FileIo) -> Result<Geometry, DiskImageError> {
    io.seek_from_start(0)?;
    let mut header = [0u8; 32];
    io.read_exact(&mut header)?;
    let density = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let header_size = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let sector_size_bytes = u32::from_le_bytes(header[16..20].try_into().unwrap());
    let nr_secs = u32::from_le_bytes(header[20..24].try_into().unwrap());
    let nr_sides = u32::from_le_bytes(header[24..28].try_into().unwrap());
    let cyls = u32::from_le_bytes(header[28..32].try_into().unwrap());

    let (rpm, gap_3) = if density == 0x30 { (300, 84) } else { (360, 116) };
    let sec_no = if sector_size_bytes == 512 { 2 } else { 3 };

    Ok(Geometry {
        nr_cyls: cyls as u8,
        nr_sides: nr_sides as u8,
        double_step: false,
        nr_sectors: nr_secs as u8,
        sec_no,
        interleave: 1,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [1, 1],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm,
        gap_2: 0,
        gap_3,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: header_size,
        encoding: Encoding::Mfm,
    })
}

/// PC-98 "HDM" images carry no header at all: fixed 77/2/8, 1024-byte sectors.
pub fn open_pc98_hdm() -> Geometry {
    Geometry {
        nr_cyls: 77,
        nr_sides: 2,
        double_step: false,
        nr_sectors: 8,
        sec_no: 3,
        interleave: 1,
        skew: 0,
        skew_cyls_only: false,
        sec_base: [1, 1],
        has_iam: true,
        layout: Layout::Interleaved,
        rpm: 360,
        gap_2: 0,
        gap_3: 116,
        gap_4a: 0,
        post_crc_syncs: 0,
        base_off: 0,
        encoding: Encoding::Mfm,
    }
}
