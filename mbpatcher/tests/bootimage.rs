// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use assert_matches::assert_matches;
use mbpatcher::{
    binbuf::BinBuf,
    format::bootimage::{self, BootImage, BootImageType, BUMP_MAGIC},
};

const PAGE_SIZE: u32 = 2048;

/// Shellcode that Loki patches into the aboot image, with the trailing 4
/// bytes replaced by the original ramdisk address.
const SHELLCODE: [u8; 64] = [
    0xfe, 0xb5, 0x0d, 0x4d, 0xd5, 0xf8, 0x88, 0x04, 0xab, 0x68, 0x98, 0x42, 0x12, 0xd0, 0xd5, 0xf8,
    0x90, 0x64, 0x0a, 0x4c, 0xd5, 0xf8, 0x8c, 0x74, 0x07, 0xf5, 0x80, 0x57, 0x0f, 0xce, 0x0f, 0xc4,
    0x10, 0x3f, 0xfb, 0xdc, 0xd5, 0xf8, 0x88, 0x04, 0x04, 0x49, 0xd5, 0xf8, 0x8c, 0x24, 0xa8, 0x60,
    0x69, 0x61, 0x2a, 0x61, 0x00, 0x20, 0xfe, 0xbd, 0xff, 0xff, 0xff, 0xff, 0xee, 0xee, 0xee, 0xee,
];

#[derive(Clone)]
struct HeaderFields {
    kernel_size: u32,
    kernel_addr: u32,
    ramdisk_size: u32,
    ramdisk_addr: u32,
    second_size: u32,
    second_addr: u32,
    tags_addr: u32,
    page_size: u32,
    dt_size: u32,
    unused: u32,
    name: Vec<u8>,
    cmdline: Vec<u8>,
    id: [u8; 32],
}

impl Default for HeaderFields {
    fn default() -> Self {
        Self {
            kernel_size: 0,
            kernel_addr: 0x10008000,
            ramdisk_size: 0,
            ramdisk_addr: 0x11000000,
            second_size: 0,
            second_addr: 0x10f00000,
            tags_addr: 0x10000100,
            page_size: PAGE_SIZE,
            dt_size: 0,
            unused: 0,
            name: vec![],
            cmdline: vec![],
            id: [0; 32],
        }
    }
}

/// Assemble the 608-byte Android header by hand so the codec is validated
/// against an independent construction.
fn raw_header(fields: &HeaderFields) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(b"ANDROID!");
    for value in [
        fields.kernel_size,
        fields.kernel_addr,
        fields.ramdisk_size,
        fields.ramdisk_addr,
        fields.second_size,
        fields.second_addr,
        fields.tags_addr,
        fields.page_size,
        fields.dt_size,
        fields.unused,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }

    let mut name = fields.name.clone();
    name.resize(16, 0);
    out.extend_from_slice(&name);

    let mut cmdline = fields.cmdline.clone();
    cmdline.resize(512, 0);
    out.extend_from_slice(&cmdline);

    out.extend_from_slice(&fields.id);

    assert_eq!(out.len(), 608);
    out
}

fn pad_to_page(out: &mut Vec<u8>, page_size: usize) {
    let len = out.len().next_multiple_of(page_size);
    out.resize(len, 0);
}

fn raw_image(fields: &HeaderFields, images: &[&[u8]]) -> Vec<u8> {
    let mut out = raw_header(fields);
    pad_to_page(&mut out, fields.page_size as usize);

    for image in images {
        out.extend_from_slice(image);
        pad_to_page(&mut out, fields.page_size as usize);
    }

    out
}

/// SHA-1 over the mkbootimg hash stream: each image followed by its size as
/// a 32-bit little-endian integer.
fn sha1_id(chunks: &[&[u8]]) -> [u8; 32] {
    let mut context = ring::digest::Context::new(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY);
    for chunk in chunks {
        context.update(chunk);
    }

    let mut id = [0u8; 32];
    id[..20].copy_from_slice(context.finish().as_ref());
    id
}

fn id_words(id: [u8; 32]) -> [u32; 8] {
    let mut words = [0u32; 8];
    for (word, chunk) in words.iter_mut().zip(id.chunks_exact(4)) {
        *word = u32::from_le_bytes(chunk.try_into().unwrap());
    }
    words
}

#[test]
fn minimal_android_round_trip() {
    let kernel = [0x01, 0x02, 0x03, 0x04];
    let ramdisk = [0x0a, 0x0b, 0x0c, 0x0d];

    let id = sha1_id(&[
        &kernel,
        &4u32.to_le_bytes(),
        &ramdisk,
        &4u32.to_le_bytes(),
        &0u32.to_le_bytes(),
    ]);

    let fields = HeaderFields {
        kernel_size: 4,
        ramdisk_size: 4,
        id,
        ..Default::default()
    };
    let data = raw_image(&fields, &[&kernel, &ramdisk]);

    assert_eq!(BootImage::detect(&data), Some(BootImageType::Android));

    let image = BootImage::load(&data).unwrap();
    assert_eq!(image.source_type(), BootImageType::Android);
    assert_eq!(image.target_type(), BootImageType::Android);
    assert_eq!(&**image.kernel_image(), &kernel);
    assert_eq!(&**image.ramdisk_image(), &ramdisk);
    assert_eq!(image.page_size(), PAGE_SIZE);
    assert_eq!(image.intermediate().id, id_words(id));
    assert!(image.kernel_cmdline().is_empty());
    assert!(image.board_name().is_empty());

    let created = image.create().unwrap();
    assert_eq!(&*created, data.as_slice());
}

#[test]
fn android_all_sections_round_trip() {
    let kernel = b"kernel data".as_slice();
    let ramdisk = b"ramdisk data".as_slice();
    let second = b"second data".as_slice();
    let dt = b"device tree data".as_slice();

    let id = sha1_id(&[
        kernel,
        &(kernel.len() as u32).to_le_bytes(),
        ramdisk,
        &(ramdisk.len() as u32).to_le_bytes(),
        second,
        &(second.len() as u32).to_le_bytes(),
        dt,
        &(dt.len() as u32).to_le_bytes(),
    ]);

    let fields = HeaderFields {
        kernel_size: kernel.len() as u32,
        ramdisk_size: ramdisk.len() as u32,
        second_size: second.len() as u32,
        dt_size: dt.len() as u32,
        name: b"hammerhead".to_vec(),
        cmdline: b"console=ttyHSL0,115200,n8".to_vec(),
        id,
        ..Default::default()
    };
    let data = raw_image(&fields, &[kernel, ramdisk, second, dt]);

    let image = BootImage::load(&data).unwrap();
    assert_eq!(image.board_name(), "hammerhead");
    assert_eq!(image.kernel_cmdline(), "console=ttyHSL0,115200,n8");
    assert_eq!(&**image.second_image(), second);
    assert_eq!(&**image.device_tree_image(), dt);

    let created = image.create().unwrap();
    assert_eq!(&*created, data.as_slice());

    // Decoding the re-encoded image must yield the same representation.
    let reloaded = BootImage::load(&created).unwrap();
    assert_eq!(reloaded, image);
}

#[test]
fn android_replacing_ramdisk_updates_sizes_and_id() {
    let fields = HeaderFields {
        kernel_size: 4,
        ramdisk_size: 4,
        id: sha1_id(&[
            &[1, 2, 3, 4],
            &4u32.to_le_bytes(),
            &[5, 6, 7, 8],
            &4u32.to_le_bytes(),
            &0u32.to_le_bytes(),
        ]),
        ..Default::default()
    };
    let data = raw_image(&fields, &[&[1, 2, 3, 4], &[5, 6, 7, 8]]);

    let mut image = BootImage::load(&data).unwrap();
    let new_ramdisk = b"completely different ramdisk".to_vec();
    image.set_ramdisk_image(BinBuf::from(new_ramdisk.clone()));

    assert_eq!(
        image.intermediate().hdr_ramdisk_size,
        new_ramdisk.len() as u32,
    );

    let created = image.create().unwrap();
    let reloaded = BootImage::load(&created).unwrap();

    assert_eq!(&**reloaded.ramdisk_image(), new_ramdisk.as_slice());

    let expected_id = sha1_id(&[
        &[1, 2, 3, 4],
        &4u32.to_le_bytes(),
        &new_ramdisk,
        &(new_ramdisk.len() as u32).to_le_bytes(),
        &0u32.to_le_bytes(),
    ]);
    assert_eq!(reloaded.intermediate().id, id_words(expected_id));
}

fn raw_mtk_header(size: u32, image_type: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&[0x88, 0x16, 0x88, 0x58]);
    out.extend_from_slice(&size.to_le_bytes());

    let mut padded_type = image_type.to_vec();
    padded_type.resize(32, 0);
    out.extend_from_slice(&padded_type);

    out.resize(512, 0);
    out
}

#[test]
fn mtk_kernel_header_round_trip() {
    let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let ramdisk = [0x0a, 0x0b, 0x0c, 0x0d];

    let mtk_hdr = raw_mtk_header(payload.len() as u32, b"KERNEL");
    let mut kernel = mtk_hdr.clone();
    kernel.extend_from_slice(&payload);

    // The vendor header is part of the hashed kernel stream and the hashed
    // size includes it.
    let id = sha1_id(&[
        &kernel,
        &(kernel.len() as u32).to_le_bytes(),
        &ramdisk,
        &(ramdisk.len() as u32).to_le_bytes(),
        &0u32.to_le_bytes(),
    ]);

    let fields = HeaderFields {
        kernel_size: kernel.len() as u32,
        ramdisk_size: ramdisk.len() as u32,
        id,
        ..Default::default()
    };
    let data = raw_image(&fields, &[&kernel, &ramdisk]);

    assert_eq!(BootImage::detect(&data), Some(BootImageType::Mtk));

    let image = BootImage::load(&data).unwrap();
    assert_eq!(image.source_type(), BootImageType::Mtk);
    assert_eq!(&**image.kernel_image(), &payload);
    assert_eq!(image.intermediate().mtk_kernel_hdr.size(), 512);
    assert!(image.intermediate().mtk_ramdisk_hdr.is_empty());
    assert_eq!(image.intermediate().hdr_kernel_size, payload.len() as u32);

    let created = image.create().unwrap();
    assert_eq!(&*created, data.as_slice());
}

#[test]
fn mtk_short_kernel_is_rejected() {
    // Header claims 16 payload bytes but only 8 are present.
    let mut kernel = raw_mtk_header(16, b"KERNEL");
    kernel.extend_from_slice(&[0u8; 8]);

    let fields = HeaderFields {
        kernel_size: kernel.len() as u32,
        ramdisk_size: 4,
        ..Default::default()
    };
    let data = raw_image(&fields, &[&kernel, &[0x0a, 0x0b, 0x0c, 0x0d]]);

    assert_matches!(
        BootImage::load(&data),
        Err(bootimage::Error::MtkSizeMismatch {
            image: "kernel",
            ..
        }));
}

#[test]
fn bump_round_trip() {
    let kernel = [0x01, 0x02, 0x03, 0x04];
    let ramdisk = [0x0a, 0x0b, 0x0c, 0x0d];

    let id = sha1_id(&[
        &kernel,
        &4u32.to_le_bytes(),
        &ramdisk,
        &4u32.to_le_bytes(),
        &0u32.to_le_bytes(),
    ]);

    let fields = HeaderFields {
        kernel_size: 4,
        ramdisk_size: 4,
        id,
        ..Default::default()
    };
    let mut data = raw_image(&fields, &[&kernel, &ramdisk]);
    data.extend_from_slice(&BUMP_MAGIC);

    assert_eq!(BootImage::detect(&data), Some(BootImageType::Bump));

    let image = BootImage::load(&data).unwrap();
    assert_eq!(image.source_type(), BootImageType::Bump);
    assert_eq!(image.target_type(), BootImageType::Bump);

    let created = image.create().unwrap();
    assert_eq!(&*created, data.as_slice());
}

#[test]
fn loki_new_style_decodes_to_android() {
    let kernel = [0xaa, 0xbb, 0xcc, 0xdd];
    let ramdisk = [0x10, 0x20, 0x30, 0x40];
    let ramdisk_addr = 0x8220_0000u32;

    // The header still describes the loki'd layout; the side header at 0x400
    // holds the original sizes.
    let fields = HeaderFields {
        kernel_size: 4,
        ramdisk_size: 4,
        id: sha1_id(&[
            &kernel,
            &4u32.to_le_bytes(),
            &ramdisk,
            &4u32.to_le_bytes(),
            &0u32.to_le_bytes(),
        ]),
        ..Default::default()
    };

    let mut data = raw_header(&fields);
    data.resize(0x400, 0);
    data.extend_from_slice(b"LOKI");
    data.extend_from_slice(&0u32.to_le_bytes()); // recovery
    data.extend_from_slice(&[0u8; 128]); // build
    data.extend_from_slice(&4u32.to_le_bytes()); // orig_kernel_size
    data.extend_from_slice(&4u32.to_le_bytes()); // orig_ramdisk_size
    data.extend_from_slice(&0x1234_5678u32.to_le_bytes()); // ramdisk_addr
    pad_to_page(&mut data, PAGE_SIZE as usize);

    data.extend_from_slice(&kernel);
    pad_to_page(&mut data, PAGE_SIZE as usize);
    data.extend_from_slice(&ramdisk);
    pad_to_page(&mut data, PAGE_SIZE as usize);

    // Somewhere after the payloads sits the patched shellcode carrying the
    // original ramdisk address.
    let mut shellcode = SHELLCODE;
    shellcode[60..64].copy_from_slice(&ramdisk_addr.to_le_bytes());
    data.extend_from_slice(&shellcode);

    assert_eq!(BootImage::detect(&data), Some(BootImageType::Loki));

    let image = BootImage::load(&data).unwrap();
    assert_eq!(image.source_type(), BootImageType::Loki);
    // Loki repack needs the aboot partition, so the target downgrades.
    assert_eq!(image.target_type(), BootImageType::Android);
    assert_eq!(&**image.kernel_image(), &kernel);
    assert_eq!(&**image.ramdisk_image(), &ramdisk);
    assert_eq!(image.intermediate().ramdisk_addr, ramdisk_addr);

    let created = image.create().unwrap();
    assert_eq!(BootImage::detect(&created), Some(BootImageType::Android));

    // The unwrapped image and its Android re-encoding are the same image.
    let reloaded = BootImage::load(&created).unwrap();
    assert_eq!(reloaded.source_type(), BootImageType::Android);
    assert_eq!(reloaded, image);
}

#[test]
fn sony_elf_round_trip() {
    let mut image = BootImage::default();
    image.set_target_type(BootImageType::SonyElf);
    image.set_kernel_image(BinBuf::from_slice(b"sony kernel"));
    image.set_ramdisk_image(BinBuf::from_slice(b"sony ramdisk"));
    image.set_kernel_cmdline("androidboot.hardware=qcom".to_owned());

    {
        let ir = image.intermediate_mut();
        ir.kernel_addr = 0x80208000;
        ir.ramdisk_addr = 0x81900000;
        ir.entrypoint_addr = 0x80208000;
    }

    let data = image.create().unwrap();

    assert_eq!(&data[..4], b"\x7fELF");
    assert_eq!(BootImage::detect(&data), Some(BootImageType::SonyElf));

    let loaded = BootImage::load(&data).unwrap();
    assert_eq!(loaded.source_type(), BootImageType::SonyElf);
    assert_eq!(loaded, image);

    // Encoding what we just decoded must reproduce the bytes.
    let created = loaded.create().unwrap();
    assert_eq!(&*created, &*data);
}

#[test]
fn detection_rejects_garbage() {
    assert_eq!(BootImage::detect(b""), None);
    assert_eq!(BootImage::detect(&[0u8; 4096]), None);
    assert_matches!(
        BootImage::load(&[0u8; 4096]),
        Err(bootimage::Error::UnknownFormat));
}

#[test]
fn detection_rejects_invalid_page_size() {
    let fields = HeaderFields {
        kernel_size: 4,
        ramdisk_size: 4,
        page_size: 1234,
        ..Default::default()
    };
    let mut data = raw_header(&fields);
    data.resize(8192, 0);

    assert_eq!(BootImage::detect(&data), None);
    assert_matches!(
        BootImage::load(&data),
        Err(bootimage::Error::UnknownFormat));
}

#[test]
fn detection_rejects_truncated_payloads() {
    let fields = HeaderFields {
        kernel_size: 0x10000,
        ramdisk_size: 4,
        ..Default::default()
    };
    // Much smaller than the declared kernel.
    let data = raw_image(&fields, &[&[0u8; 16]]);

    assert_eq!(BootImage::detect(&data), None);
}
