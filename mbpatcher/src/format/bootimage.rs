// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt, fs,
    io::{self, Cursor, Write},
    mem,
    path::Path,
    str::{self, Utf8Error},
};

use bstr::ByteSlice;
use num_traits::ToPrimitive;
use ring::digest::Context;
use thiserror::Error;
use tracing::{debug, warn};
use zerocopy::{little_endian, FromBytes, IntoBytes};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    binbuf::BinBuf,
    format::padding::{self, ZeroPadding},
    util::NumBytes,
};

pub const BOOT_MAGIC: [u8; 8] = *b"ANDROID!";
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;

/// Page sizes a bootloader will actually accept.
pub const PAGE_SIZES: [u32; 7] = [2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// The magic may sit past the start of the file (eg. behind a vendor
/// preamble), but only at 512-byte-aligned offsets within the first block.
const HEADER_SEARCH_LIMIT: usize = 4096;
const HEADER_SEARCH_STRIDE: usize = 512;

// Defaults matching AOSP's mkbootimg.
pub const DEFAULT_PAGE_SIZE: u32 = 2048;
pub const DEFAULT_BASE: u32 = 0x1000_0000;
pub const DEFAULT_KERNEL_OFFSET: u32 = 0x0000_8000;
pub const DEFAULT_RAMDISK_OFFSET: u32 = 0x0100_0000;
pub const DEFAULT_SECOND_OFFSET: u32 = 0x00f0_0000;
pub const DEFAULT_TAGS_OFFSET: u32 = 0x0000_0100;

pub const MTK_MAGIC: [u8; 4] = [0x88, 0x16, 0x88, 0x58];
pub const MTK_HEADER_SIZE: usize = 512;

/// Trailer appended to a bump'd image so the bootloader's signature check
/// passes.
pub const BUMP_MAGIC: [u8; 16] = [
    0x41, 0xa9, 0xe4, 0x67, 0x74, 0x4d, 0x1d, 0x1b, 0xa4, 0x29, 0xf2, 0xec, 0xea, 0x65, 0x52, 0x79,
];

pub const LOKI_MAGIC: [u8; 4] = *b"LOKI";
pub const LOKI_MAGIC_OFFSET: usize = 0x400;

/// Shellcode that Loki patches into the aboot image. The final 8 bytes are
/// placeholders: the last 4 are overwritten with the original ramdisk address.
const LOKI_SHELLCODE: [u8; 64] = [
    0xfe, 0xb5, 0x0d, 0x4d, 0xd5, 0xf8, 0x88, 0x04, 0xab, 0x68, 0x98, 0x42, 0x12, 0xd0, 0xd5, 0xf8,
    0x90, 0x64, 0x0a, 0x4c, 0xd5, 0xf8, 0x8c, 0x74, 0x07, 0xf5, 0x80, 0x57, 0x0f, 0xce, 0x0f, 0xc4,
    0x10, 0x3f, 0xfb, 0xdc, 0xd5, 0xf8, 0x88, 0x04, 0x04, 0x49, 0xd5, 0xf8, 0x8c, 0x24, 0xa8, 0x60,
    0x69, 0x61, 0x2a, 0x61, 0x00, 0x20, 0xfe, 0xbd, 0xff, 0xff, 0xff, 0xff, 0xee, 0xee, 0xee, 0xee,
];
/// Length of the shellcode pattern to match, excluding the placeholders.
const LOKI_SHELLCODE_MATCH_SIZE: usize = 56;
/// Offset of the patched-in ramdisk address within the shellcode.
const LOKI_SHELLCODE_ADDR_OFFSET: usize = 60;

pub const SONY_ELF_IDENT: [u8; 8] = [0x7f, b'E', b'L', b'F', 0x01, 0x01, 0x01, 0x00];

// Sony tags its ELF program segments with (p_type, p_flags) pairs rather than
// section names.
const SONY_TYPE_KERNEL: u32 = 1;
const SONY_FLAGS_KERNEL: u32 = 0;
const SONY_TYPE_RAMDISK: u32 = 1;
const SONY_FLAGS_RAMDISK: u32 = 0x8000_0000;
const SONY_TYPE_IPL: u32 = 1;
const SONY_FLAGS_IPL: u32 = 0x4000_0000;
const SONY_TYPE_CMDLINE: u32 = 4;
const SONY_FLAGS_CMDLINE: u32 = 0;
const SONY_TYPE_RPM: u32 = 1;
const SONY_FLAGS_RPM: u32 = 0x0100_0000;
const SONY_TYPE_APPSBL: u32 = 1;
const SONY_FLAGS_APPSBL: u32 = 0x0200_0000;
const SONY_TYPE_SIN: u32 = 0x8000_0000;

/// Offset of the first program segment's data in a Sony ELF image.
const SONY_SEGMENT_DATA_OFFSET: usize = 4096;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown boot image format")]
    UnknownFormat,
    #[error("Invalid page size: {0}")]
    InvalidPageSize(u32),
    #[error("{0:?} region is out of bounds")]
    FieldOutOfBounds(&'static str),
    #[error("{0:?} field is not UTF-8 encoded: {data:?}", data = .1.as_bstr())]
    StringNotUtf8(&'static str, Vec<u8>, #[source] Utf8Error),
    #[error("{0:?} field is too long: {1:?}")]
    StringTooLong(&'static str, String),
    #[error("Expected {expected} byte {image} image, but have {actual} bytes")]
    MtkSizeMismatch {
        image: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),
    #[error("{0:?} overflowed integer bounds during calculations")]
    IntOverflow(&'static str),
    #[error("Failed to read file: {0:?}")]
    FileRead(String, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    FileWrite(String, #[source] io::Error),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// The closed set of boot image formats the codec understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootImageType {
    Android,
    Bump,
    Loki,
    Mtk,
    SonyElf,
}

impl fmt::Display for BootImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Android => write!(f, "Android"),
            Self::Bump => write!(f, "bump'd Android"),
            Self::Loki => write!(f, "loki'd Android"),
            Self::Mtk => write!(f, "MTK Android"),
            Self::SonyElf => write!(f, "Sony ELF32"),
        }
    }
}

/// The union of every field any supported format may carry. Format handlers
/// decode into this and encode out of it.
#[derive(Clone)]
pub struct BootImageIntermediate {
    // Used in:                       | Android | Loki | Bump | Mtk | Sony |
    pub kernel_addr: u32,          // | X       | X    | X    | X   | X    |
    pub ramdisk_addr: u32,         // | X       | X    | X    | X   | X    |
    pub second_addr: u32,          // | X       | X    | X    | X   |      |
    pub tags_addr: u32,            // | X       | X    | X    | X   |      |
    pub ipl_addr: u32,             // |         |      |      |     | X    |
    pub rpm_addr: u32,             // |         |      |      |     | X    |
    pub appsbl_addr: u32,          // |         |      |      |     | X    |
    pub entrypoint_addr: u32,      // |         |      |      |     | X    |
    pub page_size: u32,            // | X       | X    | X    | X   |      |
    pub board_name: String,        // | X       | X    | X    | X   |      |
    pub cmdline: String,           // | X       | X    | X    | X   | X    |
    pub kernel: BinBuf,            // | X       | X    | X    | X   | X    |
    pub ramdisk: BinBuf,           // | X       | X    | X    | X   | X    |
    pub second: BinBuf,            // | X       | X    | X    | X   |      |
    pub dt: BinBuf,                // | X       | X    | X    | X   |      |
    pub aboot: BinBuf,             // |         | X    |      |     |      |
    pub mtk_kernel_hdr: BinBuf,    // |         |      |      | X   |      |
    pub mtk_ramdisk_hdr: BinBuf,   // |         |      |      | X   |      |
    pub ipl: BinBuf,               // |         |      |      |     | X    |
    pub rpm: BinBuf,               // |         |      |      |     | X    |
    pub appsbl: BinBuf,            // |         |      |      |     | X    |
    pub sony_sin_hdr: BinBuf,      // |         |      |      |     | X    |
    pub sony_sin: BinBuf,          // |         |      |      |     | X    |
    // Raw header values              |---------|------|------|-----|------|
    pub hdr_kernel_size: u32,      // | X       | X    | X    | X   |      |
    pub hdr_ramdisk_size: u32,     // | X       | X    | X    | X   |      |
    pub hdr_second_size: u32,      // | X       | X    | X    | X   |      |
    pub hdr_dt_size: u32,          // | X       | X    | X    | X   |      |
    pub hdr_unused: u32,           // | X       | X    | X    | X   |      |
    pub id: [u32; 8],              // | X       | X    | X    | X   |      |
}

impl Default for BootImageIntermediate {
    fn default() -> Self {
        Self {
            kernel_addr: DEFAULT_BASE.wrapping_add(DEFAULT_KERNEL_OFFSET),
            ramdisk_addr: DEFAULT_BASE.wrapping_add(DEFAULT_RAMDISK_OFFSET),
            second_addr: DEFAULT_BASE.wrapping_add(DEFAULT_SECOND_OFFSET),
            tags_addr: DEFAULT_BASE.wrapping_add(DEFAULT_TAGS_OFFSET),
            ipl_addr: 0,
            rpm_addr: 0,
            appsbl_addr: 0,
            entrypoint_addr: 0,
            page_size: DEFAULT_PAGE_SIZE,
            board_name: String::new(),
            cmdline: String::new(),
            kernel: BinBuf::new(),
            ramdisk: BinBuf::new(),
            second: BinBuf::new(),
            dt: BinBuf::new(),
            aboot: BinBuf::new(),
            mtk_kernel_hdr: BinBuf::new(),
            mtk_ramdisk_hdr: BinBuf::new(),
            ipl: BinBuf::new(),
            rpm: BinBuf::new(),
            appsbl: BinBuf::new(),
            sony_sin_hdr: BinBuf::new(),
            sony_sin: BinBuf::new(),
            hdr_kernel_size: 0,
            hdr_ramdisk_size: 0,
            hdr_second_size: 0,
            hdr_dt_size: 0,
            hdr_unused: 0,
            id: [0; 8],
        }
    }
}

impl PartialEq for BootImageIntermediate {
    /// Compares payloads, addresses, and metadata. `hdr_unused` is excluded:
    /// bootloaders ignore it and some vendors scribble into it.
    fn eq(&self, other: &Self) -> bool {
        self.kernel == other.kernel
            && self.ramdisk == other.ramdisk
            && self.second == other.second
            && self.dt == other.dt
            && self.aboot == other.aboot
            && self.mtk_kernel_hdr == other.mtk_kernel_hdr
            && self.mtk_ramdisk_hdr == other.mtk_ramdisk_hdr
            && self.ipl == other.ipl
            && self.rpm == other.rpm
            && self.appsbl == other.appsbl
            && self.sony_sin_hdr == other.sony_sin_hdr
            && self.sony_sin == other.sony_sin
            && self.kernel_addr == other.kernel_addr
            && self.ramdisk_addr == other.ramdisk_addr
            && self.second_addr == other.second_addr
            && self.tags_addr == other.tags_addr
            && self.ipl_addr == other.ipl_addr
            && self.rpm_addr == other.rpm_addr
            && self.appsbl_addr == other.appsbl_addr
            && self.entrypoint_addr == other.entrypoint_addr
            && self.page_size == other.page_size
            && self.hdr_kernel_size == other.hdr_kernel_size
            && self.hdr_ramdisk_size == other.hdr_ramdisk_size
            && self.hdr_second_size == other.hdr_second_size
            && self.hdr_dt_size == other.hdr_dt_size
            && self.id == other.id
            && self.board_name == other.board_name
            && self.cmdline == other.cmdline
    }
}

impl Eq for BootImageIntermediate {}

impl fmt::Debug for BootImageIntermediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootImageIntermediate")
            .field("kernel_addr", &format_args!("{:#x}", self.kernel_addr))
            .field("ramdisk_addr", &format_args!("{:#x}", self.ramdisk_addr))
            .field("second_addr", &format_args!("{:#x}", self.second_addr))
            .field("tags_addr", &format_args!("{:#x}", self.tags_addr))
            .field("entrypoint_addr", &format_args!("{:#x}", self.entrypoint_addr))
            .field("page_size", &self.page_size)
            .field("board_name", &self.board_name)
            .field("cmdline", &self.cmdline)
            .field("kernel", &NumBytes(self.kernel.size()))
            .field("ramdisk", &NumBytes(self.ramdisk.size()))
            .field("second", &NumBytes(self.second.size()))
            .field("dt", &NumBytes(self.dt.size()))
            .field("mtk_kernel_hdr", &NumBytes(self.mtk_kernel_hdr.size()))
            .field("mtk_ramdisk_hdr", &NumBytes(self.mtk_ramdisk_hdr.size()))
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Raw on-disk layout of the Android boot image header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawBootHeader {
    /// Magic value. This should be equal to [`BOOT_MAGIC`].
    magic: [u8; 8],
    kernel_size: little_endian::U32,
    kernel_addr: little_endian::U32,
    ramdisk_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
    second_size: little_endian::U32,
    second_addr: little_endian::U32,
    tags_addr: little_endian::U32,
    page_size: little_endian::U32,
    dt_size: little_endian::U32,
    unused: little_endian::U32,
    name: [u8; BOOT_NAME_SIZE],
    cmdline: [u8; BOOT_ARGS_SIZE],
    id: [little_endian::U32; 8],
}

/// Raw on-disk layout of the 512-byte MTK vendor header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawMtkHeader {
    /// Magic value. This should be equal to [`MTK_MAGIC`].
    magic: [u8; 4],
    size: little_endian::U32,
    image_type: [u8; 32],
    unused: [u8; 472],
}

/// Raw on-disk layout of the Loki side header at [`LOKI_MAGIC_OFFSET`].
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawLokiHeader {
    /// Magic value. This should be equal to [`LOKI_MAGIC`].
    magic: [u8; 4],
    /// 0 = boot.img, 1 = recovery.img.
    recovery: little_endian::U32,
    build: [u8; 128],
    orig_kernel_size: little_endian::U32,
    orig_ramdisk_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
}

/// Raw on-disk layout of the Sony ELF32 file header. Sony repurposes 8 of the
/// usual 16 ident bytes as an unused scratch area.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawElfHeader {
    /// Ident value. This should be equal to [`SONY_ELF_IDENT`].
    e_ident: [u8; 8],
    e_unused: [u8; 8],
    e_type: little_endian::U16,
    e_machine: little_endian::U16,
    e_version: little_endian::U32,
    e_entry: little_endian::U32,
    e_phoff: little_endian::U32,
    e_shoff: little_endian::U32,
    e_flags: little_endian::U32,
    e_ehsize: little_endian::U16,
    e_phentsize: little_endian::U16,
    e_phnum: little_endian::U16,
    e_shentsize: little_endian::U16,
    e_shnum: little_endian::U16,
    e_shstrndx: little_endian::U16,
}

/// Raw on-disk layout of an ELF32 program segment header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawProgramHeader {
    p_type: little_endian::U32,
    p_offset: little_endian::U32,
    p_vaddr: little_endian::U32,
    p_paddr: little_endian::U32,
    p_filesz: little_endian::U32,
    p_memsz: little_endian::U32,
    p_flags: little_endian::U32,
    p_align: little_endian::U32,
}

/// Bounds-checked view of `size` bytes at `pos`.
fn region<'a>(data: &'a [u8], pos: usize, size: usize, field: &'static str) -> Result<&'a [u8]> {
    let end = pos.checked_add(size).ok_or(Error::IntOverflow(field))?;
    if end > data.len() {
        return Err(Error::FieldOutOfBounds(field));
    }

    Ok(&data[pos..end])
}

fn size_to_u32(size: usize, field: &'static str) -> Result<u32> {
    size.to_u32().ok_or(Error::IntOverflow(field))
}

/// Compute the `id` field. The digest covers each image followed by its size
/// as a 32-bit little-endian integer. The second bootloader size is hashed
/// even when it is zero, matching a long-standing quirk of AOSP's mkbootimg;
/// the device tree size is only hashed when nonzero. For MTK images, the
/// vendor headers are hashed in the position they occupy in the file and the
/// hashed sizes include them.
fn compute_id(
    ir: &BootImageIntermediate,
    mtk_kernel_hdr: Option<&RawMtkHeader>,
    mtk_ramdisk_hdr: Option<&RawMtkHeader>,
) -> Result<[u32; 8]> {
    let mtk_size = |h: Option<&RawMtkHeader>| h.map_or(0, |_| MTK_HEADER_SIZE);
    let kernel_size = size_to_u32(ir.kernel.size() + mtk_size(mtk_kernel_hdr), "kernel_size")?;
    let ramdisk_size = size_to_u32(ir.ramdisk.size() + mtk_size(mtk_ramdisk_hdr), "ramdisk_size")?;
    let second_size = size_to_u32(ir.second.size(), "second_size")?;
    let dt_size = size_to_u32(ir.dt.size(), "dt_size")?;

    let mut context = Context::new(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY);

    if let Some(hdr) = mtk_kernel_hdr {
        context.update(hdr.as_bytes());
    }
    context.update(&ir.kernel);
    context.update(&kernel_size.to_le_bytes());

    if let Some(hdr) = mtk_ramdisk_hdr {
        context.update(hdr.as_bytes());
    }
    context.update(&ir.ramdisk);
    context.update(&ramdisk_size.to_le_bytes());

    if !ir.second.is_empty() {
        context.update(&ir.second);
    }
    context.update(&second_size.to_le_bytes());

    if !ir.dt.is_empty() {
        context.update(&ir.dt);
        context.update(&dt_size.to_le_bytes());
    }

    let digest = context.finish();

    // 20 digest bytes, right-zero-padded to the 32-byte field.
    let mut id_bytes = [0u8; 32];
    id_bytes[..digest.as_ref().len()].copy_from_slice(digest.as_ref());

    let mut id = [0u32; 8];
    for (word, chunk) in id.iter_mut().zip(id_bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes(chunk.try_into().unwrap());
    }

    Ok(id)
}

mod android {
    use super::*;

    /// Find the Android magic at a 512-byte-aligned offset within the first
    /// block of the image.
    pub(super) fn find_header(data: &[u8]) -> Option<usize> {
        (0..=HEADER_SEARCH_LIMIT)
            .step_by(HEADER_SEARCH_STRIDE)
            .find(|&offset| {
                data.len() >= offset + mem::size_of::<RawBootHeader>()
                    && data[offset..offset + BOOT_MAGIC.len()] == BOOT_MAGIC
            })
    }

    /// Compute the offset one past the last image region declared by the
    /// header, starting from `header_index`. Returns `None` if any region
    /// falls outside the file.
    pub(super) fn end_of_regions(
        data: &[u8],
        header_index: usize,
        raw: &RawBootHeader,
        include_dt: bool,
    ) -> Option<usize> {
        let page_size = raw.page_size.get() as usize;
        if !PAGE_SIZES.contains(&raw.page_size.get()) {
            return None;
        }

        let mut sizes = vec![
            mem::size_of::<RawBootHeader>(),
            raw.kernel_size.get() as usize,
            raw.ramdisk_size.get() as usize,
            raw.second_size.get() as usize,
        ];
        if include_dt {
            sizes.push(raw.dt_size.get() as usize);
        }

        let mut pos = header_index;
        for size in sizes {
            pos = pos.checked_add(padding::round(size, page_size)?)?;
            if pos > data.len() {
                return None;
            }
        }

        Some(pos)
    }

    pub(super) fn is_valid(data: &[u8]) -> bool {
        let Some(index) = find_header(data) else {
            return false;
        };
        let Ok((raw, _)) = RawBootHeader::read_from_prefix(&data[index..]) else {
            return false;
        };

        // The device tree is deliberately excluded: some images declare a
        // dt_size larger than the file and decode truncates it instead.
        end_of_regions(data, index, &raw, false).is_some()
    }

    /// Parse header fields only, without touching the image regions.
    pub(super) fn load_header(
        data: &[u8],
        header_index: usize,
    ) -> Result<BootImageIntermediate> {
        let (raw, _) = RawBootHeader::read_from_prefix(&data[header_index..])
            .map_err(|_| Error::FieldOutOfBounds("header"))?;

        let page_size = raw.page_size.get();
        if !PAGE_SIZES.contains(&page_size) {
            return Err(Error::InvalidPageSize(page_size));
        }

        let name = raw.name.trim_end_padding();
        let name = str::from_utf8(name)
            .map_err(|e| Error::StringNotUtf8("name", name.to_vec(), e))?;

        let cmdline = raw.cmdline.trim_end_padding();
        let cmdline = str::from_utf8(cmdline)
            .map_err(|e| Error::StringNotUtf8("cmdline", cmdline.to_vec(), e))?;

        let ir = BootImageIntermediate {
            kernel_addr: raw.kernel_addr.get(),
            ramdisk_addr: raw.ramdisk_addr.get(),
            second_addr: raw.second_addr.get(),
            tags_addr: raw.tags_addr.get(),
            page_size,
            board_name: name.to_owned(),
            cmdline: cmdline.to_owned(),
            hdr_kernel_size: raw.kernel_size.get(),
            hdr_ramdisk_size: raw.ramdisk_size.get(),
            hdr_second_size: raw.second_size.get(),
            hdr_dt_size: raw.dt_size.get(),
            hdr_unused: raw.unused.get(),
            id: raw.id.map(|w| w.get()),
            ..Default::default()
        };

        Ok(ir)
    }

    pub(super) fn load(data: &[u8]) -> Result<BootImageIntermediate> {
        let header_index = find_header(data).ok_or(Error::UnknownFormat)?;

        debug!("Found Android boot image header at offset {header_index}");

        let mut ir = load_header(data, header_index)?;
        let page_size = ir.page_size as usize;

        let mut pos = header_index + mem::size_of::<RawBootHeader>();
        pos += padding::calc(mem::size_of::<RawBootHeader>(), page_size);

        let kernel_size = ir.hdr_kernel_size as usize;
        ir.kernel = BinBuf::from_slice(region(data, pos, kernel_size, "kernel")?);
        pos += kernel_size + padding::calc(kernel_size, page_size);

        let ramdisk_size = ir.hdr_ramdisk_size as usize;
        ir.ramdisk = BinBuf::from_slice(region(data, pos, ramdisk_size, "ramdisk")?);
        pos += ramdisk_size + padding::calc(ramdisk_size, page_size);

        let second_size = ir.hdr_second_size as usize;
        ir.second = BinBuf::from_slice(region(data, pos, second_size, "second")?);
        pos += second_size + padding::calc(second_size, page_size);

        // Some images declare a device tree size that runs past the end of
        // the file. Keep what's actually there so the rest of the image can
        // still be patched.
        let mut dt_size = ir.hdr_dt_size as usize;
        let available = data.len().saturating_sub(pos);
        if dt_size > available {
            warn!(
                "Device tree exceeds boot image size by {} bytes and has been \
                 truncated; the image may no longer be bootable",
                dt_size - available,
            );
            dt_size = available;
        }
        ir.dt = BinBuf::from_slice(region(data, pos, dt_size, "dt")?);
        ir.hdr_dt_size = size_to_u32(dt_size, "dt_size")?;

        Ok(ir)
    }

    pub(super) fn create(ir: &BootImageIntermediate) -> Result<BinBuf> {
        create_with_mtk_headers(ir, None, None)
    }

    /// Shared encoder for the Android family. The MTK variant passes its
    /// vendor headers so they are prefixed to the kernel and ramdisk regions
    /// and hashed in place.
    pub(super) fn create_with_mtk_headers(
        ir: &BootImageIntermediate,
        mtk_kernel_hdr: Option<&RawMtkHeader>,
        mtk_ramdisk_hdr: Option<&RawMtkHeader>,
    ) -> Result<BinBuf> {
        if !PAGE_SIZES.contains(&ir.page_size) {
            return Err(Error::InvalidPageSize(ir.page_size));
        }

        let page_size = u64::from(ir.page_size);

        let mtk_size = |h: Option<&RawMtkHeader>| h.map_or(0, |_| MTK_HEADER_SIZE);
        let kernel_size =
            size_to_u32(ir.kernel.size() + mtk_size(mtk_kernel_hdr), "kernel_size")?;
        let ramdisk_size =
            size_to_u32(ir.ramdisk.size() + mtk_size(mtk_ramdisk_hdr), "ramdisk_size")?;

        let name = ir
            .board_name
            .as_bytes()
            .to_padded_array::<BOOT_NAME_SIZE>()
            .ok_or_else(|| Error::StringTooLong("name", ir.board_name.clone()))?;
        let cmdline = ir
            .cmdline
            .as_bytes()
            .to_padded_array::<BOOT_ARGS_SIZE>()
            .ok_or_else(|| Error::StringTooLong("cmdline", ir.cmdline.clone()))?;

        let id = compute_id(ir, mtk_kernel_hdr, mtk_ramdisk_hdr)?;

        let raw = RawBootHeader {
            magic: BOOT_MAGIC,
            kernel_size: kernel_size.into(),
            kernel_addr: ir.kernel_addr.into(),
            ramdisk_size: ramdisk_size.into(),
            ramdisk_addr: ir.ramdisk_addr.into(),
            second_size: size_to_u32(ir.second.size(), "second_size")?.into(),
            second_addr: ir.second_addr.into(),
            tags_addr: ir.tags_addr.into(),
            page_size: ir.page_size.into(),
            dt_size: size_to_u32(ir.dt.size(), "dt_size")?.into(),
            unused: ir.hdr_unused.into(),
            name,
            cmdline,
            id: id.map(|w| w.into()),
        };

        let mut writer = Cursor::new(Vec::new());

        raw.write_to_io(&mut writer)?;
        padding::write_zeros(&mut writer, page_size)?;

        if let Some(hdr) = mtk_kernel_hdr {
            writer.write_all(hdr.as_bytes())?;
        }
        writer.write_all(&ir.kernel)?;
        padding::write_zeros(&mut writer, page_size)?;

        if let Some(hdr) = mtk_ramdisk_hdr {
            writer.write_all(hdr.as_bytes())?;
        }
        writer.write_all(&ir.ramdisk)?;
        padding::write_zeros(&mut writer, page_size)?;

        if !ir.second.is_empty() {
            writer.write_all(&ir.second)?;
            padding::write_zeros(&mut writer, page_size)?;
        }

        if !ir.dt.is_empty() {
            writer.write_all(&ir.dt)?;
            padding::write_zeros(&mut writer, page_size)?;
        }

        Ok(BinBuf::from(writer.into_inner()))
    }
}

mod bump {
    use super::*;

    pub(super) fn is_valid(data: &[u8]) -> bool {
        let Some(index) = android::find_header(data) else {
            return false;
        };
        let Ok((raw, _)) = RawBootHeader::read_from_prefix(&data[index..]) else {
            return false;
        };
        let Some(end) = android::end_of_regions(data, index, &raw, true) else {
            return false;
        };

        data.len() >= end + BUMP_MAGIC.len() && data[end..end + BUMP_MAGIC.len()] == BUMP_MAGIC
    }

    pub(super) fn load(data: &[u8]) -> Result<BootImageIntermediate> {
        android::load(data)
    }

    pub(super) fn create(ir: &BootImageIntermediate) -> Result<BinBuf> {
        // The Android encoder emits a fully padded image, so the magic can be
        // appended directly.
        let mut data = android::create(ir)?.into_vec();
        data.extend_from_slice(&BUMP_MAGIC);

        Ok(BinBuf::from(data))
    }
}

mod mtk {
    use super::*;

    fn header_at(data: &[u8], pos: usize, size: u32) -> bool {
        size as usize >= MTK_HEADER_SIZE
            && data.len() >= pos + MTK_MAGIC.len()
            && data[pos..pos + MTK_MAGIC.len()] == MTK_MAGIC
    }

    pub(super) fn is_valid(data: &[u8]) -> bool {
        let Some(index) = android::find_header(data) else {
            return false;
        };
        let Ok((raw, _)) = RawBootHeader::read_from_prefix(&data[index..]) else {
            return false;
        };

        let page_size = raw.page_size.get() as usize;
        if !PAGE_SIZES.contains(&raw.page_size.get()) {
            return false;
        }

        // The MTK header only ever exists for the kernel and ramdisk.
        let mut pos = index + mem::size_of::<RawBootHeader>();
        pos += padding::calc(mem::size_of::<RawBootHeader>(), page_size);

        let kernel_size = raw.kernel_size.get() as usize;
        if pos + kernel_size > data.len() {
            return false;
        }
        if header_at(data, pos, raw.kernel_size.get()) {
            return true;
        }
        pos += kernel_size + padding::calc(kernel_size, page_size);

        let ramdisk_size = raw.ramdisk_size.get() as usize;
        if pos + ramdisk_size > data.len() {
            return false;
        }

        header_at(data, pos, raw.ramdisk_size.get())
    }

    /// Split a 512-byte MTK header off the front of `image`. The stored copy
    /// gets its size field zeroed so that two images differing only in that
    /// derived value compare equal.
    fn strip_header(
        image: &mut BinBuf,
        name: &'static str,
        lenient_oversize: bool,
    ) -> Result<Option<BinBuf>> {
        if image.size() < MTK_HEADER_SIZE || image[..MTK_MAGIC.len()] != MTK_MAGIC {
            return Ok(None);
        }

        let (raw, _) = RawMtkHeader::read_from_prefix(&image[..])
            .map_err(|_| Error::FieldOutOfBounds("mtk_header"))?;

        debug!(
            "MTK {name} header: size={}, type={:?}",
            raw.size.get(),
            raw.image_type.trim_end_padding().as_bstr(),
        );

        let expected = MTK_HEADER_SIZE + raw.size.get() as usize;
        let actual = image.size();

        if actual < expected || (actual != expected && !lenient_oversize) {
            return Err(Error::MtkSizeMismatch {
                image: name,
                expected,
                actual,
            });
        } else if actual != expected {
            // The on-device flasher may have appended a DTB to the kernel.
            warn!(
                "Expected {expected} byte {name} image, but have {actual} bytes; \
                 repacked boot image will not be byte-for-byte identical"
            );
        }

        let mut stored = BinBuf::from_slice(&image[..MTK_HEADER_SIZE]);
        stored.as_mut_slice()[MTK_MAGIC.len()..MTK_MAGIC.len() + 4].fill(0);

        *image = BinBuf::from_slice(&image[MTK_HEADER_SIZE..]);

        Ok(Some(stored))
    }

    pub(super) fn load(data: &[u8]) -> Result<BootImageIntermediate> {
        let mut ir = android::load(data)?;

        if let Some(hdr) = strip_header(&mut ir.kernel, "kernel", true)? {
            ir.mtk_kernel_hdr = hdr;
            ir.hdr_kernel_size = size_to_u32(ir.kernel.size(), "kernel_size")?;
        }

        if let Some(hdr) = strip_header(&mut ir.ramdisk, "ramdisk", false)? {
            ir.mtk_ramdisk_hdr = hdr;
            ir.hdr_ramdisk_size = size_to_u32(ir.ramdisk.size(), "ramdisk_size")?;
        }

        Ok(ir)
    }

    /// Reconstruct a stored header with its size field set to the payload
    /// length it will be written in front of.
    fn rebuild_header(stored: &BinBuf, payload_size: usize) -> Result<Option<RawMtkHeader>> {
        if stored.is_empty() {
            return Ok(None);
        }

        let mut raw = RawMtkHeader::read_from_bytes(&stored[..])
            .map_err(|_| Error::InvalidData("MTK header is not 512 bytes"))?;
        raw.size = size_to_u32(payload_size, "mtk_size")?.into();

        Ok(Some(raw))
    }

    pub(super) fn create(ir: &BootImageIntermediate) -> Result<BinBuf> {
        let kernel_hdr = rebuild_header(&ir.mtk_kernel_hdr, ir.kernel.size())?;
        let ramdisk_hdr = rebuild_header(&ir.mtk_ramdisk_hdr, ir.ramdisk.size())?;

        android::create_with_mtk_headers(ir, kernel_hdr.as_ref(), ramdisk_hdr.as_ref())
    }
}

mod loki {
    use super::*;

    pub(super) fn is_valid(data: &[u8]) -> bool {
        data.len() >= LOKI_MAGIC_OFFSET + mem::size_of::<RawLokiHeader>()
            && data[LOKI_MAGIC_OFFSET..LOKI_MAGIC_OFFSET + LOKI_MAGIC.len()] == LOKI_MAGIC
            && android::find_header(data).is_some()
    }

    /// Recover the pre-Loki ramdisk load address. Newer Loki versions patch
    /// it into their shellcode; older versions force a fixed layout relative
    /// to the kernel address.
    fn find_ramdisk_address(
        data: &[u8],
        ir: &BootImageIntermediate,
        raw: &RawLokiHeader,
    ) -> Result<u32> {
        if raw.ramdisk_addr.get() == 0 {
            return Ok(ir
                .kernel_addr
                .wrapping_sub(DEFAULT_KERNEL_OFFSET)
                .wrapping_add(0x0200_0000));
        }

        let needle = &LOKI_SHELLCODE[..LOKI_SHELLCODE_MATCH_SIZE];

        for window in data.windows(LOKI_SHELLCODE.len()) {
            if window.starts_with(needle) {
                let raw = &window[LOKI_SHELLCODE_ADDR_OFFSET..][..4];
                return Ok(u32::from_le_bytes(raw.try_into().unwrap()));
            }
        }

        Err(Error::InvalidData("Failed to find Loki ramdisk address"))
    }

    /// Find the gzip'd ramdisk in an old-style image where the header sizes
    /// were zeroed. Offsets whose flag byte carries FNAME are preferred since
    /// most stock ramdisks are compressed with the original file name.
    fn old_find_gzip_offset(data: &[u8], start: usize) -> Option<usize> {
        const GZIP_DEFLATE: [u8; 3] = [0x1f, 0x8b, 0x08];

        let mut flag_name = None;
        let mut flag_none = None;

        for offset in start..data.len().saturating_sub(GZIP_DEFLATE.len()) {
            if data[offset..offset + GZIP_DEFLATE.len()] != GZIP_DEFLATE {
                continue;
            }

            match data[offset + GZIP_DEFLATE.len()] {
                0x08 if flag_name.is_none() => flag_name = Some(offset),
                0x00 if flag_none.is_none() => flag_none = Some(offset),
                _ => {}
            }
        }

        flag_name.or(flag_none)
    }

    /// The gzip stream is zero padded up to the 0x200-byte aboot copy at the
    /// end of the file, so search backwards for the last non-zero byte.
    fn old_find_ramdisk_size(
        data: &[u8],
        page_size: usize,
        ramdisk_offset: usize,
    ) -> Result<usize> {
        let begin = data
            .len()
            .checked_sub(0x200)
            .ok_or(Error::FieldOutOfBounds("aboot"))?;
        if begin < page_size {
            return Err(Error::FieldOutOfBounds("ramdisk"));
        }

        let location = (begin - page_size + 1..=begin)
            .rev()
            .find(|&i| data[i] != 0)
            .ok_or(Error::InvalidData("Failed to find end of Loki ramdisk"))?;

        location
            .checked_sub(ramdisk_offset)
            .ok_or(Error::FieldOutOfBounds("ramdisk"))
    }

    fn load_new(
        data: &[u8],
        mut ir: BootImageIntermediate,
        raw: &RawLokiHeader,
    ) -> Result<BootImageIntermediate> {
        debug!("Loki image has a new-style header");

        let page_size = ir.page_size as usize;
        let kernel_size = raw.orig_kernel_size.get() as usize;
        let ramdisk_size = raw.orig_ramdisk_size.get() as usize;

        // From loki_unlok: the fake size covers the shellcode page that was
        // inserted between the ramdisk and the device tree.
        let fake_size = if ir.ramdisk_addr > 0x88f0_0000 || ir.ramdisk_addr < 0x0fa0_0000 {
            page_size
        } else {
            0x200
        };

        let ramdisk_addr = find_ramdisk_address(data, &ir, raw)?;

        let page_kernel_size =
            padding::round(kernel_size, page_size).ok_or(Error::IntOverflow("kernel_size"))?;
        let page_ramdisk_size =
            padding::round(ramdisk_size, page_size).ok_or(Error::IntOverflow("ramdisk_size"))?;

        ir.hdr_kernel_size = size_to_u32(kernel_size, "kernel_size")?;
        ir.hdr_ramdisk_size = size_to_u32(ramdisk_size, "ramdisk_size")?;
        ir.ramdisk_addr = ramdisk_addr;

        ir.kernel = BinBuf::from_slice(region(data, page_size, kernel_size, "kernel")?);
        ir.ramdisk = BinBuf::from_slice(region(
            data,
            page_size + page_kernel_size,
            ramdisk_size,
            "ramdisk",
        )?);

        if ir.hdr_dt_size != 0 {
            ir.dt = BinBuf::from_slice(region(
                data,
                page_size + page_kernel_size + page_ramdisk_size + fake_size,
                ir.hdr_dt_size as usize,
                "dt",
            )?);
        }

        Ok(ir)
    }

    fn load_old(
        data: &[u8],
        mut ir: BootImageIntermediate,
        raw: &RawLokiHeader,
    ) -> Result<BootImageIntermediate> {
        debug!("Loki image has an old-style header with zeroed fields");

        // The kernel tags address is invalid in old images.
        ir.tags_addr = DEFAULT_BASE.wrapping_add(DEFAULT_TAGS_OFFSET);

        let page_size = ir.page_size as usize;

        let gzip_offset = old_find_gzip_offset(data, page_size)
            .ok_or(Error::InvalidData("Failed to find gzip'd Loki ramdisk"))?;
        let ramdisk_size = old_find_ramdisk_size(data, page_size, gzip_offset)?;
        let kernel_size = gzip_offset - page_size;

        ir.hdr_kernel_size = size_to_u32(kernel_size, "kernel_size")?;
        ir.hdr_ramdisk_size = size_to_u32(ramdisk_size, "ramdisk_size")?;
        ir.ramdisk_addr = find_ramdisk_address(data, &ir, raw)?;

        ir.kernel = BinBuf::from_slice(region(data, page_size, kernel_size, "kernel")?);
        ir.ramdisk = BinBuf::from_slice(region(data, gzip_offset, ramdisk_size, "ramdisk")?);

        // Old images carry no usable device tree.
        ir.dt = BinBuf::new();
        ir.hdr_dt_size = 0;

        Ok(ir)
    }

    pub(super) fn load(data: &[u8]) -> Result<BootImageIntermediate> {
        let header_index = android::find_header(data).ok_or(Error::UnknownFormat)?;
        let ir = android::load_header(data, header_index)?;

        let (raw, _) = RawLokiHeader::read_from_prefix(&data[LOKI_MAGIC_OFFSET..])
            .map_err(|_| Error::FieldOutOfBounds("loki_header"))?;

        // Early Loki builds zeroed these fields, in which case the original
        // layout has to be found by searching the file.
        if raw.orig_kernel_size.get() == 0
            || raw.orig_ramdisk_size.get() == 0
            || raw.ramdisk_addr.get() == 0
        {
            load_old(data, ir, &raw)
        } else {
            load_new(data, ir, &raw)
        }
    }
}

mod sony {
    use super::*;

    pub(super) fn is_valid(data: &[u8]) -> bool {
        data.len() >= mem::size_of::<RawElfHeader>()
            && data[..SONY_ELF_IDENT.len()] == SONY_ELF_IDENT
    }

    fn segment<'a>(data: &'a [u8], raw: &RawProgramHeader) -> Result<&'a [u8]> {
        region(
            data,
            raw.p_offset.get() as usize,
            raw.p_memsz.get() as usize,
            "segment",
        )
    }

    pub(super) fn load(data: &[u8]) -> Result<BootImageIntermediate> {
        let (ehdr, _) = RawElfHeader::read_from_prefix(data)
            .map_err(|_| Error::FieldOutOfBounds("elf_header"))?;

        if ehdr.e_ident != SONY_ELF_IDENT {
            return Err(Error::UnknownFormat);
        }

        let mut ir = BootImageIntermediate {
            entrypoint_addr: ehdr.e_entry.get(),
            ..Default::default()
        };

        let mut offset = mem::size_of::<RawElfHeader>();

        for index in 0..ehdr.e_phnum.get() {
            let (phdr, _) = RawProgramHeader::read_from_prefix(&data[offset.min(data.len())..])
                .map_err(|_| Error::FieldOutOfBounds("program_header"))?;
            offset += mem::size_of::<RawProgramHeader>();

            debug!(
                "ELF32 program segment {index}: type={:#x}, flags={:#x}, \
                 offset={}, vaddr={:#x}, memsz={}",
                phdr.p_type.get(),
                phdr.p_flags.get(),
                phdr.p_offset.get(),
                phdr.p_vaddr.get(),
                phdr.p_memsz.get(),
            );

            match (phdr.p_type.get(), phdr.p_flags.get()) {
                (SONY_TYPE_KERNEL, SONY_FLAGS_KERNEL) => {
                    ir.kernel = BinBuf::from_slice(segment(data, &phdr)?);
                    ir.kernel_addr = phdr.p_vaddr.get();
                    ir.hdr_kernel_size = phdr.p_memsz.get();
                }
                (SONY_TYPE_RAMDISK, SONY_FLAGS_RAMDISK) => {
                    ir.ramdisk = BinBuf::from_slice(segment(data, &phdr)?);
                    ir.ramdisk_addr = phdr.p_vaddr.get();
                    ir.hdr_ramdisk_size = phdr.p_memsz.get();
                }
                (SONY_TYPE_IPL, SONY_FLAGS_IPL) => {
                    ir.ipl = BinBuf::from_slice(segment(data, &phdr)?);
                    ir.ipl_addr = phdr.p_vaddr.get();
                }
                (SONY_TYPE_CMDLINE, SONY_FLAGS_CMDLINE) => {
                    let raw_cmdline = segment(data, &phdr)?;
                    ir.cmdline = str::from_utf8(raw_cmdline)
                        .map_err(|e| {
                            Error::StringNotUtf8("cmdline", raw_cmdline.to_vec(), e)
                        })?
                        .to_owned();
                }
                (SONY_TYPE_RPM, SONY_FLAGS_RPM) => {
                    ir.rpm = BinBuf::from_slice(segment(data, &phdr)?);
                    ir.rpm_addr = phdr.p_vaddr.get();
                }
                (SONY_TYPE_APPSBL, SONY_FLAGS_APPSBL) => {
                    ir.appsbl = BinBuf::from_slice(segment(data, &phdr)?);
                    ir.appsbl_addr = phdr.p_vaddr.get();
                }
                (SONY_TYPE_SIN, _) => {
                    // Every image seen in the wild has two trailing bytes
                    // unaccounted for by p_filesz and p_memsz. Keep them when
                    // they're actually there.
                    let start = phdr.p_offset.get() as usize;
                    let mut end = start
                        .checked_add(phdr.p_memsz.get() as usize)
                        .ok_or(Error::IntOverflow("sin_size"))?;
                    if end > data.len() {
                        return Err(Error::FieldOutOfBounds("sin"));
                    }

                    if end + 2 > data.len() {
                        warn!("Trailing two bytes after \"SIN!\" image are truncated");
                    } else if data[end] == 0 && data[end + 1] == 0 {
                        warn!("Trailing two bytes after \"SIN!\" image are zero");
                    } else {
                        end += 2;
                    }

                    ir.sony_sin = BinBuf::from_slice(&data[start..end]);

                    // Clear the offset so equal images compare equal no
                    // matter where the segment sat in the source file.
                    let mut stored = phdr;
                    stored.p_offset = 0u32.into();
                    ir.sony_sin_hdr = BinBuf::from_slice(stored.as_bytes());
                }
                _ => {
                    return Err(Error::InvalidData(
                        "Invalid type and/or flags in ELF32 program segment header",
                    ));
                }
            }
        }

        Ok(ir)
    }

    struct SegmentPlan<'a> {
        phdr: RawProgramHeader,
        data: &'a [u8],
    }

    fn plan_segment<'a>(
        data: &'a [u8],
        p_type: u32,
        p_flags: u32,
        vaddr: u32,
        offset: &mut usize,
    ) -> Result<SegmentPlan<'a>> {
        let size = size_to_u32(data.len(), "segment_size")?;

        let phdr = RawProgramHeader {
            p_type: p_type.into(),
            p_offset: size_to_u32(*offset, "segment_offset")?.into(),
            p_vaddr: vaddr.into(),
            p_paddr: vaddr.into(),
            p_filesz: size.into(),
            p_memsz: size.into(),
            p_flags: p_flags.into(),
            p_align: 0u32.into(),
        };

        *offset += data.len();

        Ok(SegmentPlan { phdr, data })
    }

    pub(super) fn create(ir: &BootImageIntermediate) -> Result<BinBuf> {
        let have_sin = !ir.sony_sin.is_empty() && !ir.sony_sin_hdr.is_empty();

        // Segment data starts at a fixed offset; the headers (and the inline
        // SIN image) must all fit in front of it.
        let mut offset = SONY_SEGMENT_DATA_OFFSET;
        let mut segments = vec![];

        if !ir.kernel.is_empty() {
            segments.push(plan_segment(
                &ir.kernel,
                SONY_TYPE_KERNEL,
                SONY_FLAGS_KERNEL,
                ir.kernel_addr,
                &mut offset,
            )?);
        }
        if !ir.ramdisk.is_empty() {
            segments.push(plan_segment(
                &ir.ramdisk,
                SONY_TYPE_RAMDISK,
                SONY_FLAGS_RAMDISK,
                ir.ramdisk_addr,
                &mut offset,
            )?);
        }
        if !ir.cmdline.is_empty() {
            segments.push(plan_segment(
                ir.cmdline.as_bytes(),
                SONY_TYPE_CMDLINE,
                SONY_FLAGS_CMDLINE,
                0,
                &mut offset,
            )?);
        }
        if !ir.ipl.is_empty() {
            segments.push(plan_segment(
                &ir.ipl,
                SONY_TYPE_IPL,
                SONY_FLAGS_IPL,
                ir.ipl_addr,
                &mut offset,
            )?);
        }
        if !ir.rpm.is_empty() {
            segments.push(plan_segment(
                &ir.rpm,
                SONY_TYPE_RPM,
                SONY_FLAGS_RPM,
                ir.rpm_addr,
                &mut offset,
            )?);
        }
        if !ir.appsbl.is_empty() {
            segments.push(plan_segment(
                &ir.appsbl,
                SONY_TYPE_APPSBL,
                SONY_FLAGS_APPSBL,
                ir.appsbl_addr,
                &mut offset,
            )?);
        }

        let phnum = segments.len() + usize::from(have_sin);

        let mut entrypoint = ir.entrypoint_addr;
        if entrypoint == 0 && !ir.kernel.is_empty() {
            entrypoint = ir.kernel_addr;
        }

        let ehdr = RawElfHeader {
            e_ident: SONY_ELF_IDENT,
            e_unused: [0; 8],
            e_type: 2u16.into(),
            e_machine: 40u16.into(),
            e_version: 1u32.into(),
            e_entry: entrypoint.into(),
            e_phoff: (mem::size_of::<RawElfHeader>() as u32).into(),
            e_shoff: 0u32.into(),
            e_flags: 0u32.into(),
            e_ehsize: (mem::size_of::<RawElfHeader>() as u16).into(),
            e_phentsize: (mem::size_of::<RawProgramHeader>() as u16).into(),
            e_phnum: (phnum
                .to_u16()
                .ok_or(Error::IntOverflow("e_phnum"))?)
            .into(),
            e_shentsize: 0u16.into(),
            e_shnum: 0u16.into(),
            e_shstrndx: 0u16.into(),
        };

        let mut writer = Cursor::new(Vec::new());
        ehdr.write_to_io(&mut writer)?;

        for segment in &segments {
            segment.phdr.write_to_io(&mut writer)?;
        }

        if have_sin {
            let mut sin_phdr = RawProgramHeader::read_from_bytes(&ir.sony_sin_hdr[..])
                .map_err(|_| Error::InvalidData("Sony SIN header is not 32 bytes"))?;

            // The SIN image directly follows the program headers.
            let sin_offset =
                mem::size_of::<RawElfHeader>() + phnum * mem::size_of::<RawProgramHeader>();
            sin_phdr.p_offset = size_to_u32(sin_offset, "sin_offset")?.into();

            let filesz = sin_phdr.p_filesz.get() as usize;
            if filesz + 2 == ir.sony_sin.size() {
                debug!("The SIN image contains the two unidentified trailing bytes");
            } else if filesz != ir.sony_sin.size() {
                return Err(Error::InvalidData(
                    "Sony SIN image size does not match the program header",
                ));
            }

            if sin_offset + ir.sony_sin.size() >= SONY_SEGMENT_DATA_OFFSET {
                return Err(Error::InvalidData(
                    "Sony SIN image does not fit before the segment data",
                ));
            }

            sin_phdr.write_to_io(&mut writer)?;
            writer.write_all(&ir.sony_sin)?;
        }

        padding::write_zeros(&mut writer, SONY_SEGMENT_DATA_OFFSET as u64)?;

        for segment in &segments {
            writer.write_all(segment.data)?;
        }

        Ok(BinBuf::from(writer.into_inner()))
    }
}

/// A boot image decoded into its intermediate representation, remembering the
/// format it came from and the format it will be encoded back to.
#[derive(Clone, Debug)]
pub struct BootImage {
    ir: BootImageIntermediate,
    source_type: BootImageType,
    target_type: BootImageType,
}

impl Default for BootImage {
    fn default() -> Self {
        Self {
            ir: BootImageIntermediate::default(),
            source_type: BootImageType::Android,
            target_type: BootImageType::Android,
        }
    }
}

impl PartialEq for BootImage {
    /// Only the contents matter: a loki'd image and its plain Android
    /// re-encoding compare equal.
    fn eq(&self, other: &Self) -> bool {
        self.ir == other.ir
    }
}

impl Eq for BootImage {}

impl BootImage {
    /// Probe `data` against every known format and return the first match.
    ///
    /// The order matters: Loki, Bump, and MTK images all begin with (or wrap)
    /// a valid Android header, so they must be recognized before the plain
    /// Android probe.
    pub fn detect(data: &[u8]) -> Option<BootImageType> {
        if loki::is_valid(data) {
            Some(BootImageType::Loki)
        } else if bump::is_valid(data) {
            Some(BootImageType::Bump)
        } else if mtk::is_valid(data) {
            Some(BootImageType::Mtk)
        } else if android::is_valid(data) {
            Some(BootImageType::Android)
        } else if sony::is_valid(data) {
            Some(BootImageType::SonyElf)
        } else {
            None
        }
    }

    pub fn is_valid(data: &[u8]) -> bool {
        Self::detect(data).is_some()
    }

    /// Decode a boot image from binary data. The headers and images (eg.
    /// kernel and ramdisk) are copied out of `data`.
    pub fn load(data: &[u8]) -> Result<Self> {
        let source_type = Self::detect(data).ok_or(Error::UnknownFormat)?;

        debug!("Boot image is a {source_type} boot image");

        let ir = match source_type {
            BootImageType::Android => android::load(data)?,
            BootImageType::Bump => bump::load(data)?,
            BootImageType::Loki => loki::load(data)?,
            BootImageType::Mtk => mtk::load(data)?,
            BootImageType::SonyElf => sony::load(data)?,
        };

        // Repatching with Loki requires the device's aboot partition, so
        // loki'd sources are re-encoded as plain Android images.
        let target_type = match source_type {
            BootImageType::Loki => BootImageType::Android,
            t => t,
        };

        Ok(Self {
            ir,
            source_type,
            target_type,
        })
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| Error::FileRead(path.display().to_string(), e))?;

        Self::load(&data)
    }

    /// Encode the image in the target format. This is equivalent to AOSP's
    /// mkbootimg: sizes are recomputed from the payload lengths and the SHA-1
    /// identity is refreshed.
    pub fn create(&self) -> Result<BinBuf> {
        let mut target_type = self.target_type;
        if target_type == BootImageType::Loki {
            warn!("Loki repacking is not supported; creating a plain Android image");
            target_type = BootImageType::Android;
        }

        debug!("Creating {target_type} boot image");

        match target_type {
            BootImageType::Android => android::create(&self.ir),
            BootImageType::Bump => bump::create(&self.ir),
            BootImageType::Mtk => mtk::create(&self.ir),
            BootImageType::SonyElf => sony::create(&self.ir),
            BootImageType::Loki => unreachable!(),
        }
    }

    pub fn create_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = self.create()?;

        fs::write(path, &data).map_err(|e| Error::FileWrite(path.display().to_string(), e))
    }

    /// The format of the image this instance was decoded from.
    pub fn source_type(&self) -> BootImageType {
        self.source_type
    }

    /// The format [`Self::create`] will encode.
    pub fn target_type(&self) -> BootImageType {
        self.target_type
    }

    pub fn set_target_type(&mut self, target_type: BootImageType) {
        self.target_type = target_type;
    }

    pub fn intermediate(&self) -> &BootImageIntermediate {
        &self.ir
    }

    /// Direct access to the IR. Prefer the `set_*_image` methods for the
    /// payloads whose sizes are cached in the header.
    pub fn intermediate_mut(&mut self) -> &mut BootImageIntermediate {
        &mut self.ir
    }

    pub fn board_name(&self) -> &str {
        &self.ir.board_name
    }

    pub fn set_board_name(&mut self, name: String) {
        self.ir.board_name = name;
    }

    pub fn kernel_cmdline(&self) -> &str {
        &self.ir.cmdline
    }

    pub fn set_kernel_cmdline(&mut self, cmdline: String) {
        self.ir.cmdline = cmdline;
    }

    pub fn page_size(&self) -> u32 {
        self.ir.page_size
    }

    pub fn kernel_image(&self) -> &BinBuf {
        &self.ir.kernel
    }

    pub fn set_kernel_image(&mut self, data: BinBuf) {
        self.ir.hdr_kernel_size = data.size() as u32;
        self.ir.kernel = data;
    }

    pub fn ramdisk_image(&self) -> &BinBuf {
        &self.ir.ramdisk
    }

    pub fn set_ramdisk_image(&mut self, data: BinBuf) {
        self.ir.hdr_ramdisk_size = data.size() as u32;
        self.ir.ramdisk = data;
    }

    pub fn second_image(&self) -> &BinBuf {
        &self.ir.second
    }

    pub fn set_second_image(&mut self, data: BinBuf) {
        self.ir.hdr_second_size = data.size() as u32;
        self.ir.second = data;
    }

    pub fn device_tree_image(&self) -> &BinBuf {
        &self.ir.dt
    }

    pub fn set_device_tree_image(&mut self, data: BinBuf) {
        self.ir.hdr_dt_size = data.size() as u32;
        self.ir.dt = data;
    }
}
