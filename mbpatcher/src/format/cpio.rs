// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Cursor, Read, Write},
};

use bstr::ByteSlice;
use num_traits::ToPrimitive;
use thiserror::Error;

use crate::{
    binbuf::BinBuf,
    format::padding,
    stream::{CountingReader, CountingWriter, FromReader, ReadFixedSizeExt, ToWriter,
        WriteZerosExt},
    util::NumBytes,
};

const MAGIC_NEW: &[u8; 6] = b"070701";

const CPIO_TRAILER: &[u8; 10] = b"TRAILER!!!";

pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// First inode number handed out when an archive is serialized. High enough
/// to not clash with inodes the kernel assigns while unpacking.
const INODE_BASE: u32 = 300000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {0:?}")]
    UnknownMagic([u8; 6]),
    #[error("{0:?} field is not a hex string: {data:?}", data = .1.as_bstr())]
    InvalidHexField(&'static str, [u8; 8]),
    #[error("Entry path is not NULL-terminated")]
    PathNotTerminated,
    #[error("Archive does not end with a trailer entry")]
    MissingTrailer,
    #[error("No entry exists at path: {:?}", .0.as_bstr())]
    EntryMissing(Vec<u8>),
    #[error("{0:?} overflowed integer bounds during calculations")]
    IntOverflow(&'static str),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Read u32 formatted as an ASCII 8-char wide hex string.
fn read_int(mut reader: impl Read, field: &'static str) -> Result<u32> {
    let buf: [u8; 8] = reader.read_array_exact()?;

    let mut value = 0;

    for b in buf {
        let digit = (b as char)
            .to_digit(16)
            .ok_or(Error::InvalidHexField(field, buf))?;

        value <<= 4;
        value |= digit;
    }

    Ok(value)
}

/// Write u32 formatted as an ASCII 8-char wide hex string.
fn write_int(mut writer: impl Write, mut value: u32) -> io::Result<()> {
    let mut buf = [b'0'; 8];
    let mut index = 7;

    while value != 0 {
        buf[index] = char::from_digit(value & 0xf, 16).unwrap() as u8;
        value >>= 4;
        index -= 1;
    }

    writer.write_all(&buf)
}

/// A single member of a newc archive. The entry's data lives in [`Self::content`];
/// for symlinks, that is the link target.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct CpioEntry {
    /// File path without a leading `/`.
    pub name: Vec<u8>,

    /// `st_mode`-style mode: type bits plus permissions.
    pub mode: u32,

    /// Owner user ID.
    pub uid: u32,

    /// Owner group ID.
    pub gid: u32,

    /// Number of paths referencing the inode.
    pub nlink: u32,

    /// Modification timestamp in Unix time.
    pub mtime: u32,

    /// Major ID (class of device) for the device containing the inode.
    pub dev_major: u32,

    /// Minor ID (specific device instance) for the device containing the inode.
    pub dev_minor: u32,

    /// Major ID represented by this entry. Only relevant for device nodes.
    pub rdev_major: u32,

    /// Minor ID represented by this entry. Only relevant for device nodes.
    pub rdev_minor: u32,

    /// File content. Symlinks store the link target here.
    pub content: BinBuf,

    /// Inode as parsed from the source archive. Reassigned on serialization.
    pub inode: u32,
}

impl fmt::Debug for CpioEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpioEntry")
            .field("name", &self.name.as_bstr())
            .field("mode", &format_args!("0o{:o}", self.mode))
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("nlink", &self.nlink)
            .field("mtime", &self.mtime)
            .field("dev", &format_args!("{:x},{:x}", self.dev_major, self.dev_minor))
            .field("rdev", &format_args!("{:x},{:x}", self.rdev_major, self.rdev_minor))
            .field("content", &NumBytes(self.content.size()))
            .finish()
    }
}

impl CpioEntry {
    pub fn new_file(name: &[u8], perms: u32, content: BinBuf) -> Self {
        Self {
            name: name.to_owned(),
            mode: S_IFREG | (perms & 0o7777),
            nlink: 1,
            content,
            ..Default::default()
        }
    }

    pub fn new_directory(name: &[u8], perms: u32) -> Self {
        Self {
            name: name.to_owned(),
            mode: S_IFDIR | (perms & 0o7777),
            nlink: 1,
            ..Default::default()
        }
    }

    pub fn new_symlink(name: &[u8], target: &[u8]) -> Self {
        Self {
            name: name.to_owned(),
            mode: S_IFLNK | 0o777,
            nlink: 1,
            content: BinBuf::from_slice(target),
            ..Default::default()
        }
    }

    pub fn new_char_device(name: &[u8], perms: u32, major: u32, minor: u32) -> Self {
        Self {
            name: name.to_owned(),
            mode: S_IFCHR | (perms & 0o7777),
            nlink: 1,
            rdev_major: major,
            rdev_minor: minor,
            ..Default::default()
        }
    }

    fn new_trailer() -> Self {
        Self {
            name: CPIO_TRAILER.to_vec(),
            nlink: 1,
            ..Default::default()
        }
    }

    pub fn is_trailer(&self) -> bool {
        self.name == CPIO_TRAILER
    }
}

impl<R: Read> FromReader<R> for CpioEntry {
    type Error = Error;

    fn from_reader(reader: R) -> Result<Self> {
        let mut reader = CountingReader::new(reader);

        let magic: [u8; 6] = reader.read_array_exact()?;
        if magic != *MAGIC_NEW {
            return Err(Error::UnknownMagic(magic));
        }

        let inode = read_int(&mut reader, "ino")?;
        let mode = read_int(&mut reader, "mode")?;
        let uid = read_int(&mut reader, "uid")?;
        let gid = read_int(&mut reader, "gid")?;
        let nlink = read_int(&mut reader, "nlink")?;
        let mtime = read_int(&mut reader, "mtime")?;
        let file_size = read_int(&mut reader, "filesize")?;
        let dev_major = read_int(&mut reader, "devmajor")?;
        let dev_minor = read_int(&mut reader, "devminor")?;
        let rdev_major = read_int(&mut reader, "rdevmajor")?;
        let rdev_minor = read_int(&mut reader, "rdevminor")?;
        let name_size = read_int(&mut reader, "namesize")?;
        let _check = read_int(&mut reader, "check")?;

        let mut name = reader.read_vec_exact(
            name_size
                .to_usize()
                .ok_or(Error::IntOverflow("namesize"))?,
        )?;
        if name.last() != Some(&b'\0') {
            return Err(Error::PathNotTerminated);
        }
        name.pop();
        padding::read_discard(&mut reader, 4)?;

        let content = reader.read_vec_exact(
            file_size
                .to_usize()
                .ok_or(Error::IntOverflow("filesize"))?,
        )?;
        padding::read_discard(&mut reader, 4)?;

        Ok(Self {
            name,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            dev_major,
            dev_minor,
            rdev_major,
            rdev_minor,
            content: BinBuf::from(content),
            inode,
        })
    }
}

impl<W: Write> ToWriter<W> for CpioEntry {
    type Error = Error;

    fn to_writer(&self, writer: W) -> Result<()> {
        let mut writer = CountingWriter::new(writer);

        let name_size = self
            .name
            .len()
            .checked_add(1)
            .and_then(|s| s.to_u32())
            .ok_or(Error::IntOverflow("namesize"))?;
        let file_size = self
            .content
            .size()
            .to_u32()
            .ok_or(Error::IntOverflow("filesize"))?;

        writer.write_all(MAGIC_NEW)?;

        write_int(&mut writer, self.inode)?;
        write_int(&mut writer, self.mode)?;
        write_int(&mut writer, self.uid)?;
        write_int(&mut writer, self.gid)?;
        write_int(&mut writer, self.nlink)?;
        write_int(&mut writer, self.mtime)?;
        write_int(&mut writer, file_size)?;
        write_int(&mut writer, self.dev_major)?;
        write_int(&mut writer, self.dev_minor)?;
        write_int(&mut writer, self.rdev_major)?;
        write_int(&mut writer, self.rdev_minor)?;
        write_int(&mut writer, name_size)?;
        // The checksum field is always zero in the non-CRC newc format.
        write_int(&mut writer, 0)?;

        writer.write_all(&self.name)?;
        writer.write_zeros_exact(1)?;
        padding::write_zeros(&mut writer, 4)?;

        if !self.content.is_empty() {
            writer.write_all(&self.content)?;
            padding::write_zeros(&mut writer, 4)?;
        }

        Ok(())
    }
}

/// An in-memory "new ASCII" (newc) cpio archive.
///
/// Entries keep their order across load, edit, and serialize, except that
/// [`Self::set_contents`] appends when the path does not already exist.
#[derive(Clone, Default)]
pub struct CpioArchive {
    entries: Vec<CpioEntry>,
}

impl CpioArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an archive from its serialized form. Fails on a short read, bad
    /// magic, non-hex header fields, an unterminated path, or a missing
    /// trailer entry.
    pub fn load(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let mut entries = vec![];

        loop {
            let entry = match CpioEntry::from_reader(&mut reader) {
                Ok(e) => e,
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Error::MissingTrailer);
                }
                Err(e) => return Err(e),
            };

            if entry.is_trailer() {
                break;
            }

            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn exists(&self, name: &[u8]) -> bool {
        self.position(name).is_some()
    }

    /// Get the content of the entry at `name`, if one exists.
    pub fn contents(&self, name: &[u8]) -> Option<&BinBuf> {
        self.position(name).map(|i| &self.entries[i].content)
    }

    /// Replace the content of the entry at `name`, keeping its metadata. If no
    /// such entry exists, a regular file entry with default metadata is
    /// appended.
    pub fn set_contents(&mut self, name: &[u8], content: BinBuf) {
        match self.position(name) {
            Some(i) => self.entries[i].content = content,
            None => self.entries.push(CpioEntry::new_file(name, 0o644, content)),
        }
    }

    /// Remove the entry at `name`. Returns whether an entry was removed.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        match self.position(name) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Add a fully specified entry, replacing any existing entry in place.
    pub fn add_entry(&mut self, entry: CpioEntry) {
        match self.position(&entry.name) {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn enumerate(&self) -> impl Iterator<Item = (&[u8], &CpioEntry)> {
        self.entries.iter().map(|e| (e.name.as_slice(), e))
    }

    /// Serialize the archive, terminated by the trailer entry. Inode numbers
    /// are reassigned sequentially to avoid clashes between archives.
    pub fn serialize(&self) -> Result<BinBuf> {
        let mut writer = Cursor::new(Vec::new());

        for (i, entry) in self.entries.iter().enumerate() {
            let inode = (i as u32)
                .checked_add(INODE_BASE)
                .ok_or(Error::IntOverflow("ino"))?;

            let mut renumbered = entry.clone();
            renumbered.inode = inode;
            renumbered.to_writer(&mut writer)?;
        }

        CpioEntry::new_trailer().to_writer(&mut writer)?;

        Ok(BinBuf::from(writer.into_inner()))
    }

    fn position(&self, name: &[u8]) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

impl fmt::Debug for CpioArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpioArchive")
            .field("entries", &self.entries)
            .finish()
    }
}

impl PartialEq for CpioArchive {
    /// Compares entries in order. Inode numbers are excluded since they are
    /// reassigned on serialization anyway.
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| {
                    let mut b = b.clone();
                    b.inode = a.inode;
                    *a == b
                })
    }
}

impl Eq for CpioArchive {}
