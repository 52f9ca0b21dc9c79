// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use assert_matches::assert_matches;
use mbpatcher::{
    binbuf::BinBuf,
    format::cpio::{self, CpioArchive, CpioEntry},
};

/// Build a raw newc header + name + content block by hand, padded the way the
/// format requires.
fn raw_entry(ino: u32, mode: u32, nlink: u32, name: &str, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(b"070701");
    for value in [
        ino,
        mode,
        0, // uid
        0, // gid
        nlink,
        0, // mtime
        content.len() as u32,
        0, // devmajor
        0, // devminor
        0, // rdevmajor
        0, // rdevminor
        name.len() as u32 + 1,
        0, // check
    ] {
        out.extend_from_slice(format!("{value:08x}").as_bytes());
    }

    out.extend_from_slice(name.as_bytes());
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }

    out.extend_from_slice(content);
    while out.len() % 4 != 0 {
        out.push(0);
    }

    out
}

fn raw_archive(entries: &[(u32, u32, u32, &str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();

    for (ino, mode, nlink, name, content) in entries {
        out.extend_from_slice(&raw_entry(*ino, *mode, *nlink, name, content));
    }
    out.extend_from_slice(&raw_entry(0, 0, 1, "TRAILER!!!", b""));

    out
}

#[test]
fn serialized_layout() {
    let mut archive = CpioArchive::new();
    archive.set_contents(b"foo", BinBuf::from_slice(b"bar"));

    let data = archive.serialize().unwrap();

    // Inodes are assigned from 300000 and new entries get 0644 regular file
    // metadata.
    let expected = raw_archive(&[(300000, 0o100644, 1, "foo", b"bar")]);
    assert_eq!(&*data, expected.as_slice());
}

#[test]
fn round_trip_archive() {
    let mut archive = CpioArchive::new();
    archive.add_entry(CpioEntry::new_directory(b"sbin", 0o755));
    archive.add_entry(CpioEntry::new_file(
        b"init.rc",
        0o750,
        BinBuf::from_slice(b"on early-init\n    start mbtool\n"),
    ));
    archive.add_entry(CpioEntry::new_symlink(b"sbin/healthd", b"../init"));
    archive.add_entry(CpioEntry::new_char_device(b"dev/null", 0o666, 1, 3));

    let data = archive.serialize().unwrap();
    let loaded = CpioArchive::load(&data).unwrap();

    assert_eq!(loaded, archive);

    // Entry order must survive the round trip.
    let names: Vec<_> = loaded.enumerate().map(|(name, _)| name.to_vec()).collect();
    assert_eq!(
        names,
        [&b"sbin"[..], b"init.rc", b"sbin/healthd", b"dev/null"],
    );

    // Serialization is deterministic.
    assert_eq!(&*loaded.serialize().unwrap(), &*data);
}

#[test]
fn add_then_remove_is_noop() {
    let mut archive = CpioArchive::new();
    archive.add_entry(CpioEntry::new_file(
        b"default.prop",
        0o644,
        BinBuf::from_slice(b"ro.secure=1\n"),
    ));
    let original = archive.serialize().unwrap();

    let mut edited = CpioArchive::load(&original).unwrap();
    edited.set_contents(b"foo", BinBuf::from_slice(b"bar"));
    assert!(edited.exists(b"foo"));
    assert!(edited.remove(b"foo"));
    assert!(!edited.remove(b"foo"));

    assert_eq!(&*edited.serialize().unwrap(), &*original);
}

#[test]
fn set_contents_keeps_metadata_and_order() {
    let mut archive = CpioArchive::new();
    archive.add_entry(CpioEntry {
        name: b"init.rc".to_vec(),
        mode: cpio::S_IFREG | 0o750,
        uid: 1000,
        gid: 1000,
        nlink: 1,
        mtime: 1400000000,
        content: BinBuf::from_slice(b"old"),
        ..Default::default()
    });
    archive.add_entry(CpioEntry::new_file(b"zzz", 0o644, BinBuf::from_slice(b"x")));

    archive.set_contents(b"init.rc", BinBuf::from_slice(b"new contents"));

    let (name, entry) = archive.enumerate().next().unwrap();
    assert_eq!(name, b"init.rc");
    assert_eq!(entry.mode, cpio::S_IFREG | 0o750);
    assert_eq!(entry.uid, 1000);
    assert_eq!(entry.mtime, 1400000000);
    assert_eq!(&*entry.content, b"new contents");

    assert_eq!(&**archive.contents(b"init.rc").unwrap(), b"new contents");
    assert_eq!(archive.contents(b"missing"), None);
}

#[test]
fn load_rejects_bad_magic() {
    let mut data = raw_archive(&[(300000, 0o100644, 1, "foo", b"bar")]);
    data[..6].copy_from_slice(b"070707");

    assert_matches!(CpioArchive::load(&data), Err(cpio::Error::UnknownMagic(_)));
}

#[test]
fn load_rejects_non_hex_field() {
    let mut data = raw_archive(&[(300000, 0o100644, 1, "foo", b"bar")]);
    // Corrupt the inode field.
    data[6] = b'z';

    assert_matches!(
        CpioArchive::load(&data),
        Err(cpio::Error::InvalidHexField("ino", _))
    );
}

#[test]
fn load_rejects_unterminated_name() {
    let mut data = raw_entry(300000, 0o100644, 1, "foo", b"");
    // "foo\0" followed by alignment padding; overwrite the NUL.
    data[113] = b'!';
    data.extend_from_slice(&raw_entry(0, 0, 1, "TRAILER!!!", b""));

    assert_matches!(
        CpioArchive::load(&data),
        Err(cpio::Error::PathNotTerminated));
}

#[test]
fn load_rejects_missing_trailer() {
    let data = raw_entry(300000, 0o100644, 1, "foo", b"bar");

    assert_matches!(CpioArchive::load(&data), Err(cpio::Error::MissingTrailer));

    assert_matches!(CpioArchive::load(b""), Err(cpio::Error::MissingTrailer));
}
