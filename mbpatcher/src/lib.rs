/*
 * SPDX-FileCopyrightText: 2024 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Core library for patching Android flashable zips so that a ROM installs
//! under a multiboot manager instead of overwriting the primary partitions.
//!
//! The "library"-style modules aim to be generic over readers and writers
//! where practical; [`patch::archive`] is the high level entry point that
//! drives a whole zip through the boot image codec.

pub mod binbuf;
pub mod device;
pub mod format;
pub mod patch;
pub mod stream;
pub mod util;
