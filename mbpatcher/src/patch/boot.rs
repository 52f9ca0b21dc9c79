// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::atomic::AtomicBool;

use tracing::trace;

use crate::{
    binbuf::BinBuf,
    device::Device,
    format::{bootimage::BootImage, cpio::CpioArchive},
    patch::archive::{check_cancel, Error, TransformRegistry},
};

type Result<T> = std::result::Result<T, Error>;

/// Rewrite a raw cpio ramdisk using the transform registered for `device`.
/// The device-specific transform wins over the global default and exactly one
/// transform runs.
pub fn patch_ramdisk(
    data: &[u8],
    registry: &TransformRegistry,
    device: &Device,
    rom_id: &str,
    cancel_signal: &AtomicBool,
) -> Result<BinBuf> {
    let mut cpio = CpioArchive::load(data)?;

    trace!("Loaded ramdisk with {} entries", cpio.enumerate().count());

    check_cancel(cancel_signal)?;

    let transform = registry
        .resolve_for_device(&device.id)
        .ok_or_else(|| Error::NoRamdiskTransform(device.id.clone()))?;

    transform
        .transform_ramdisk(&mut cpio, device, rom_id)
        .map_err(Error::RamdiskTransform)?;

    check_cancel(cancel_signal)?;

    Ok(cpio.serialize()?)
}

/// Decode a boot image, rewrite its ramdisk, and re-encode it in the image's
/// target format.
pub fn patch_boot_image(
    data: &[u8],
    registry: &TransformRegistry,
    device: &Device,
    rom_id: &str,
    cancel_signal: &AtomicBool,
) -> Result<BinBuf> {
    check_cancel(cancel_signal)?;

    let mut boot_image = BootImage::load(data)?;

    check_cancel(cancel_signal)?;

    let new_ramdisk = patch_ramdisk(
        boot_image.ramdisk_image(),
        registry,
        device,
        rom_id,
        cancel_signal,
    )?;
    boot_image.set_ramdisk_image(new_ramdisk);

    let patched = boot_image.create()?;

    check_cancel(cancel_signal)?;

    Ok(patched)
}
