// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::BTreeSet,
    fmt::Write as _,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Cursor, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tracing::{debug, warn};
use zip::{
    result::ZipError, write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter,
};

use crate::{
    device::Device,
    format::{bootimage, bootimage::BootImage, cpio, cpio::CpioArchive},
    patch::boot,
    stream,
};

pub const PATH_UPDATE_BINARY: &str = "META-INF/com/google/android/update-binary";
pub const PATH_UPDATE_BINARY_ORIG: &str = "META-INF/com/google/android/update-binary.orig";
pub const PATH_BB_WRAPPER: &str = "multiboot/bb-wrapper.sh";
pub const PATH_INFO_PROP: &str = "multiboot/info.prop";

/// Boot images are at most a few dozen MiB. Entries above this limit are
/// copied through so a multi-gigabyte system image is never pulled into RAM.
const MAX_BOOT_IMAGE_SIZE: u64 = 30 * 1024 * 1024;

/// Compute the output name for the updater chain: `update-binary` and every
/// `update-binary(.orig)*` link get another `.orig` appended so repatching an
/// already-patched zip never produces duplicate entry names.
fn updater_chain_rename(name: &str) -> Option<String> {
    let suffix = name.strip_prefix(PATH_UPDATE_BINARY)?;

    let chained = suffix.len() % 5 == 0
        && suffix.as_bytes().chunks(5).all(|link| link == b".orig");
    if !chained {
        return None;
    }

    Some(format!("{name}.orig"))
}

/// Errors reported by transform implementations. Transforms live outside the
/// core, so their failure modes are opaque here.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Only zip files are supported: {0:?}")]
    OnlyZipSupported(PathBuf),
    #[error("Failed to open archive for reading: {0:?}")]
    ArchiveReadOpen(PathBuf, #[source] io::Error),
    #[error("Failed to read archive entry header")]
    ArchiveReadHeader(#[source] ZipError),
    #[error("Failed to read data for archive entry: {0:?}")]
    ArchiveReadData(String, #[source] io::Error),
    #[error("Failed to open archive for writing: {0:?}")]
    ArchiveWriteOpen(PathBuf, #[source] io::Error),
    #[error("Failed to write data for archive entry: {0:?}")]
    ArchiveWriteData(String, #[source] ZipError),
    #[error("Archive entry path escapes the extraction directory: {0:?}")]
    UnsafeEntryPath(String),
    #[error("No ramdisk transform is registered for device {0:?}")]
    NoRamdiskTransform(String),
    #[error("Ramdisk transform failed")]
    RamdiskTransform(#[source] TransformError),
    #[error("Boot image error")]
    BootImage(#[from] bootimage::Error),
    #[error("CPIO error")]
    Cpio(#[from] cpio::Error),
    #[error("Failed to create temporary directory in {0:?}")]
    TempDirCreate(PathBuf, #[source] io::Error),
    #[error("Failed to open file: {0:?}")]
    FileOpen(PathBuf, #[source] io::Error),
    #[error("Failed to read file: {0:?}")]
    FileRead(PathBuf, #[source] io::Error),
    #[error("Failed to write file: {0:?}")]
    FileWrite(PathBuf, #[source] io::Error),
    #[error("Patching was cancelled")]
    Cancelled,
    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Returns [`Error::Cancelled`] if the cancel flag has been raised. Polled at
/// every entry boundary and around every boot image decode and transform.
#[inline]
pub(crate) fn check_cancel(cancel_signal: &AtomicBool) -> Result<()> {
    if cancel_signal.load(Ordering::SeqCst) {
        return Err(Error::Cancelled);
    }

    Ok(())
}

/// A collaborator that adjusts a ROM's installation files for multiboot.
///
/// One implementation is resolved per boot image to rewrite the ramdisk.
/// Implementations may also claim text files out of the source zip: anything
/// listed by [`Self::existing_files`] is extracted during pass 1 and handed to
/// [`Self::patch_files`] in pass 2 instead of being copied through.
pub trait RamdiskTransform {
    /// Names of zip entries this transform will edit during pass 2.
    fn existing_files(&self) -> Vec<String> {
        vec![]
    }

    /// Edit previously extracted files in place under `temp_dir`.
    fn patch_files(&self, temp_dir: &Path) -> std::result::Result<(), TransformError> {
        let _ = temp_dir;
        Ok(())
    }

    /// Rewrite a boot image ramdisk in place.
    fn transform_ramdisk(
        &self,
        cpio: &mut CpioArchive,
        device: &Device,
        rom_id: &str,
    ) -> std::result::Result<(), TransformError> {
        let _ = (cpio, device, rom_id);
        Ok(())
    }
}

/// Registry of [`RamdiskTransform`] collaborators, keyed by name. Ramdisk
/// rewriting resolves `"<device-id>/default"` first and falls back to the
/// global `"default"` entry.
#[derive(Default)]
pub struct TransformRegistry {
    entries: Vec<(String, Box<dyn RamdiskTransform>)>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, transform: Box<dyn RamdiskTransform>) {
        self.entries.push((key.into(), transform));
    }

    pub fn get(&self, key: &str) -> Option<&dyn RamdiskTransform> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| t.as_ref())
    }

    pub fn resolve_for_device(&self, device_id: &str) -> Option<&dyn RamdiskTransform> {
        self.get(&format!("{device_id}/default"))
            .or_else(|| self.get("default"))
    }

    /// All registered transforms in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn RamdiskTransform)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t.as_ref()))
    }

    /// Union of the entry names every registered transform wants extracted
    /// out of pass 1.
    pub fn existing_files(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|(_, t)| t.existing_files())
            .collect()
    }
}

/// Global patching environment shared between jobs.
#[derive(Clone, Debug)]
pub struct PatcherConfig {
    /// Directory holding the helper binaries and scripts added to the output.
    pub data_dir: PathBuf,
    /// Directory to create per-job scratch directories in.
    pub temp_dir: PathBuf,
    /// Version string written to the generated `info.prop`.
    pub version: String,
    /// Every supported device, for the commented table in `info.prop`.
    pub devices: Vec<Device>,
}

/// A single file to be patched.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub device: Device,
    pub rom_id: String,
}

/// Progress callbacks, invoked synchronously on the thread doing the work.
/// Implementations must not perform long I/O here.
#[derive(Default)]
pub struct ProgressCallbacks<'a> {
    /// Invoked with (bytes, max_bytes) as entry data is written.
    pub bytes: Option<Box<dyn FnMut(u64, u64) + 'a>>,
    /// Invoked with (files, max_files) when starting each entry.
    pub files: Option<Box<dyn FnMut(u64, u64) + 'a>>,
    /// Invoked with the name of the entry being processed.
    pub details: Option<Box<dyn FnMut(&str) + 'a>>,
}

struct ProgressState<'a, 'cb> {
    bytes: u64,
    max_bytes: u64,
    files: u64,
    max_files: u64,
    callbacks: &'a mut ProgressCallbacks<'cb>,
}

impl<'a, 'cb> ProgressState<'a, 'cb> {
    fn new(callbacks: &'a mut ProgressCallbacks<'cb>) -> Self {
        Self {
            bytes: 0,
            max_bytes: 0,
            files: 0,
            max_files: 0,
            callbacks,
        }
    }

    fn update_bytes(&mut self) {
        if let Some(cb) = &mut self.callbacks.bytes {
            cb(self.bytes, self.max_bytes);
        }
    }

    fn add_bytes(&mut self, n: u64) {
        self.bytes += n;
        self.update_bytes();
    }

    fn update_files(&mut self) {
        if let Some(cb) = &mut self.callbacks.files {
            cb(self.files, self.max_files);
        }
    }

    fn add_file(&mut self) {
        self.files += 1;
        self.update_files();
    }

    fn details(&mut self, name: &str) {
        if let Some(cb) = &mut self.callbacks.details {
            cb(name);
        }
    }
}

/// Rewrites a flashable zip so its ROM installs under the multiboot manager.
///
/// The rewrite streams the source zip in two passes. Pass 1 copies entries to
/// the output, patching boot images inline and diverting entries claimed by
/// the registered transforms into a scratch directory. Pass 2 runs the
/// transforms over the extracted files and appends the results, followed by
/// the multiboot installer entries.
pub struct ArchivePatcher<'a> {
    config: &'a PatcherConfig,
    registry: &'a TransformRegistry,
    info: &'a FileInfo,
}

impl<'a> ArchivePatcher<'a> {
    pub fn new(
        config: &'a PatcherConfig,
        registry: &'a TransformRegistry,
        info: &'a FileInfo,
    ) -> Self {
        Self {
            config,
            registry,
            info,
        }
    }

    /// Path of the zip this job will produce: the source path with the ROM ID
    /// inserted before the extension.
    pub fn output_path(&self) -> Result<PathBuf> {
        let file_name = self
            .info
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let is_zip = file_name.len() >= 4
            && file_name.as_bytes()[file_name.len() - 4..].eq_ignore_ascii_case(b".zip");
        if !is_zip {
            return Err(Error::OnlyZipSupported(self.info.path.clone()));
        }

        let (stem, ext) = file_name.split_at(file_name.len() - 4);
        let new_name = format!("{stem}_{}{ext}", self.info.rom_id);

        Ok(self.info.path.with_file_name(new_name))
    }

    /// Run the full patch job. On cancellation, [`Error::Cancelled`] is
    /// reported even if some other error fired first; the output file must be
    /// considered invalid unless this returns success.
    pub fn patch_file(
        &self,
        callbacks: &mut ProgressCallbacks,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let mut progress = ProgressState::new(callbacks);

        let ret = self.patch_zip(&mut progress, cancel_signal);

        if cancel_signal.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        ret
    }

    fn patch_zip(
        &self,
        progress: &mut ProgressState,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let output_path = self.output_path()?;

        let exclude = self.registry.existing_files();

        debug!("Patching {:?} -> {output_path:?}", self.info.path);

        let raw_writer = File::create(&output_path)
            .map_err(|e| Error::ArchiveWriteOpen(output_path.clone(), e))?;
        let mut zip_writer = ZipWriter::new(BufWriter::new(raw_writer));

        check_cancel(cancel_signal)?;

        let raw_reader = File::open(&self.info.path)
            .map_err(|e| Error::ArchiveReadOpen(self.info.path.clone(), e))?;
        let mut zip_reader = ZipArchive::new(BufReader::new(raw_reader))
            .map_err(Error::ArchiveReadHeader)?;

        // Totals come from the central directory so nothing is decompressed
        // up front.
        let mut total_bytes = 0;
        for index in 0..zip_reader.len() {
            let entry = zip_reader
                .by_index_raw(index)
                .map_err(Error::ArchiveReadHeader)?;
            total_bytes += entry.size();
        }
        progress.max_bytes = total_bytes;

        check_cancel(cancel_signal)?;

        // +1 each for the installer, bb-wrapper.sh, and info.prop.
        progress.max_files = zip_reader.len() as u64 + 3;
        progress.update_files();

        let temp_dir = tempfile::TempDir::new_in(&self.config.temp_dir)
            .map_err(|e| Error::TempDirCreate(self.config.temp_dir.clone(), e))?;

        self.pass1(
            &mut zip_reader,
            &mut zip_writer,
            temp_dir.path(),
            &exclude,
            progress,
            cancel_signal,
        )?;

        check_cancel(cancel_signal)?;

        self.pass2(&mut zip_writer, temp_dir.path(), &exclude, cancel_signal)?;

        check_cancel(cancel_signal)?;

        // The new installer takes the updater's place.
        progress.add_file();
        progress.details(PATH_UPDATE_BINARY);
        let installer = self
            .config
            .data_dir
            .join("binaries/android")
            .join(&self.info.device.architecture)
            .join("mbtool_recovery");
        self.add_file_from_path(&mut zip_writer, PATH_UPDATE_BINARY, &installer, cancel_signal)?;

        check_cancel(cancel_signal)?;

        progress.add_file();
        progress.details(PATH_BB_WRAPPER);
        let wrapper = self.config.data_dir.join("scripts/bb-wrapper.sh");
        self.add_file_from_path(&mut zip_writer, PATH_BB_WRAPPER, &wrapper, cancel_signal)?;

        check_cancel(cancel_signal)?;

        progress.add_file();
        progress.details(PATH_INFO_PROP);
        let info_prop = self.create_info_prop();
        self.add_file_from_reader(
            &mut zip_writer,
            PATH_INFO_PROP,
            Cursor::new(info_prop.into_bytes()),
            cancel_signal,
        )?;

        let mut raw_writer = zip_writer
            .finish()
            .map_err(|e| Error::ArchiveWriteData(output_path.display().to_string(), e))?;
        raw_writer
            .flush()
            .map_err(|e| Error::FileWrite(output_path.clone(), e))?;

        Ok(())
    }

    /// First pass: stream every source entry. Boot images are patched and
    /// recompressed, transform-claimed files are extracted for pass 2, and
    /// everything else has its compressed stream copied byte-for-byte.
    fn pass1(
        &self,
        zip_reader: &mut ZipArchive<BufReader<File>>,
        zip_writer: &mut ZipWriter<BufWriter<File>>,
        temp_dir: &Path,
        exclude: &BTreeSet<String>,
        progress: &mut ProgressState,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        for index in 0..zip_reader.len() {
            check_cancel(cancel_signal)?;

            let (name, size) = {
                let entry = zip_reader
                    .by_index_raw(index)
                    .map_err(Error::ArchiveReadHeader)?;
                (entry.name().to_owned(), entry.size())
            };

            progress.add_file();
            progress.details(&name);

            // Entries a transform will edit are added in pass 2 instead.
            if exclude.contains(&name) {
                self.extract_entry(zip_reader, index, temp_dir, cancel_signal)?;
                continue;
            }

            // Stale copies from a previous patching run are dropped since
            // these entries are regenerated during finalization.
            if name == PATH_BB_WRAPPER || name == PATH_INFO_PROP {
                debug!("Skipping entry regenerated during finalization: {name:?}");
                continue;
            }

            let is_boot_ext = name.ends_with(".img") || name.ends_with(".lok");
            let is_gz = name.ends_with(".gz");

            if (is_boot_ext || is_gz) && size <= MAX_BOOT_IMAGE_SIZE {
                let mut data = self.read_entry(zip_reader, index, &name, cancel_signal)?;

                if is_gz {
                    // Some zips assemble the boot image at install time and
                    // ship the ramdisk as a separate entry.
                    match boot::patch_ramdisk(
                        &data,
                        self.registry,
                        &self.info.device,
                        &self.info.rom_id,
                        cancel_signal,
                    ) {
                        Ok(patched) => data = patched.into_vec(),
                        Err(e) => {
                            // The entry may genuinely be a gzip of something
                            // other than a ramdisk.
                            debug!("Passing {name:?} through unchanged: {e}");
                        }
                    }
                } else if BootImage::is_valid(&data) {
                    data = boot::patch_boot_image(
                        &data,
                        self.registry,
                        &self.info.device,
                        &self.info.rom_id,
                        cancel_signal,
                    )?
                    .into_vec();
                }

                // Re-encoding may have grown or shrunk the entry.
                let new_size = data.len() as u64;
                if new_size >= size {
                    progress.max_bytes += new_size - size;
                } else {
                    progress.max_bytes -= size - new_size;
                }

                zip_writer
                    .start_file(name.as_str(), deflated())
                    .map_err(|e| Error::ArchiveWriteData(name.clone(), e))?;
                zip_writer
                    .write_all(&data)
                    .map_err(|e| Error::ArchiveWriteData(name.clone(), ZipError::Io(e)))?;

                progress.add_bytes(new_size);
            } else {
                let entry = zip_reader
                    .by_index_raw(index)
                    .map_err(Error::ArchiveReadHeader)?;

                // mbtool's installer takes the updater's place; the original
                // is kept for the ROM's own installation logic.
                let copied = match updater_chain_rename(&name) {
                    Some(renamed) => zip_writer.raw_copy_file_rename(entry, renamed),
                    None => zip_writer.raw_copy_file(entry),
                };
                copied.map_err(|e| Error::ArchiveWriteData(name.clone(), e))?;

                progress.add_bytes(size);
            }
        }

        check_cancel(cancel_signal)
    }

    /// Second pass: run every registered transform over the scratch
    /// directory, then append the (possibly edited) files to the output.
    fn pass2(
        &self,
        zip_writer: &mut ZipWriter<BufWriter<File>>,
        temp_dir: &Path,
        exclude: &BTreeSet<String>,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        for (key, transform) in self.registry.iter() {
            check_cancel(cancel_signal)?;

            debug!("Running file transform {key:?}");
            transform
                .patch_files(temp_dir)
                .map_err(Error::RamdiskTransform)?;
        }

        for name in exclude {
            check_cancel(cancel_signal)?;

            let path = temp_dir.join(name);
            let target = match updater_chain_rename(name) {
                Some(renamed) => renamed,
                None => name.clone(),
            };

            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("File does not exist in temporary directory: {name:?}");
                    continue;
                }
                Err(e) => return Err(Error::FileOpen(path, e)),
            };

            self.add_file_from_reader(zip_writer, &target, file, cancel_signal)?;
        }

        check_cancel(cancel_signal)
    }

    fn extract_entry(
        &self,
        zip_reader: &mut ZipArchive<BufReader<File>>,
        index: usize,
        temp_dir: &Path,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let mut entry = zip_reader.by_index(index).map_err(Error::ArchiveReadHeader)?;
        let name = entry.name().to_owned();

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| Error::UnsafeEntryPath(name.clone()))?;
        let path = temp_dir.join(relative);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::FileWrite(parent.to_owned(), e))?;
        }

        let mut file = File::create(&path).map_err(|e| Error::FileWrite(path.clone(), e))?;
        stream::copy(&mut entry, &mut file, cancel_signal)
            .map_err(|e| Error::ArchiveReadData(name, e))?;

        Ok(())
    }

    fn read_entry(
        &self,
        zip_reader: &mut ZipArchive<BufReader<File>>,
        index: usize,
        name: &str,
        cancel_signal: &AtomicBool,
    ) -> Result<Vec<u8>> {
        let mut entry = zip_reader.by_index(index).map_err(Error::ArchiveReadHeader)?;
        let mut writer = Cursor::new(Vec::with_capacity(entry.size() as usize));

        stream::copy(&mut entry, &mut writer, cancel_signal)
            .map_err(|e| Error::ArchiveReadData(name.to_owned(), e))?;

        Ok(writer.into_inner())
    }

    fn add_file_from_path(
        &self,
        zip_writer: &mut ZipWriter<BufWriter<File>>,
        name: &str,
        path: &Path,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        let file = File::open(path).map_err(|e| Error::FileOpen(path.to_owned(), e))?;

        self.add_file_from_reader(zip_writer, name, file, cancel_signal)
    }

    fn add_file_from_reader(
        &self,
        zip_writer: &mut ZipWriter<BufWriter<File>>,
        name: &str,
        mut reader: impl Read,
        cancel_signal: &AtomicBool,
    ) -> Result<()> {
        zip_writer
            .start_file(name, deflated())
            .map_err(|e| Error::ArchiveWriteData(name.to_owned(), e))?;
        stream::copy(&mut reader, zip_writer, cancel_signal)
            .map_err(|e| Error::ArchiveWriteData(name.to_owned(), ZipError::Io(e)))?;

        Ok(())
    }

    fn device_table(&self) -> String {
        let codenames: Vec<String> = self
            .config
            .devices
            .iter()
            .map(|d| d.codenames.join(", "))
            .collect();

        let mut id_width = "Device".len();
        let mut codenames_width = "Codenames".len();
        let mut name_width = "Name".len();

        for (device, joined) in self.config.devices.iter().zip(&codenames) {
            id_width = id_width.max(device.id.len());
            codenames_width = codenames_width.max(joined.len());
            name_width = name_width.max(device.name.len());
        }

        let mut out = String::new();

        let _ = writeln!(
            out,
            "# | {:<id_width$} | {:<codenames_width$} | {:<name_width$} |",
            "Device", "Codenames", "Name",
        );
        let _ = writeln!(
            out,
            "# |{}|{}|{}|",
            "-".repeat(id_width + 2),
            "-".repeat(codenames_width + 2),
            "-".repeat(name_width + 2),
        );

        for (device, joined) in self.config.devices.iter().zip(&codenames) {
            let _ = writeln!(
                out,
                "# | {:<id_width$} | {:<codenames_width$} | {:<name_width$} |",
                device.id, joined, device.name,
            );
        }

        out
    }

    fn create_info_prop(&self) -> String {
        let mut out = String::new();

        out.push_str(
            "# [Autogenerated by mbpatcher]\n\
             #\n\
             # Blank lines are ignored. Lines beginning with '#' are comments and are also\n\
             # ignored. Before changing any fields, please read its description. Invalid\n\
             # values may lead to unexpected behavior when this zip file is installed.\n\
             \n\
             \n\
             # mbtool.installer.version\n\
             # ------------------------\n\
             # This field is the version of mbpatcher and mbtool used to patch and install\n\
             # this file, respectively.\n\
             #\n",
        );
        let _ = writeln!(out, "mbtool.installer.version={}", self.config.version);

        out.push_str(
            "\n\
             \n\
             # mbtool.installer.device\n\
             # -----------------------\n\
             # This field specifies the target device for this zip file. Based on the value,\n\
             # mbtool will determine the appropriate partitions to use as well as other\n\
             # device-specific operations (eg. Loki for locked Galaxy S4 and LG G2\n\
             # bootloaders). The devices supported by mbtool are specified below.\n\
             #\n\
             # WARNING: Except for debugging purposes, this value should NEVER be changed.\n\
             # An incorrect value can hard-brick the device due to differences in the\n\
             # partition table.\n\
             #\n\
             # Supported devices:\n\
             #\n",
        );
        out.push_str(&self.device_table());
        out.push_str("#\n");
        let _ = writeln!(out, "mbtool.installer.device={}", self.info.device.id);

        out.push_str(
            "\n\
             \n\
             # mbtool.installer.ignore-codename\n\
             # --------------------------------\n\
             # The installer checks the device by comparing the devices codenames to the\n\
             # valid codenames in the table above. This value is useful when the device is\n\
             # a variant of a supported device (or very similar to one).\n\
             #\n\
             # For example, if 'mbtool.installer.device' is set to 'trlte' and this field is\n\
             # set to true, then mbtool would not check to see if the device's codename is\n\
             # 'trltetmo' or 'trltexx'.\n\
             #\n\
             mbtool.installer.ignore-codename=false\n\
             \n\
             \n\
             # mbtool.installer.install-location\n\
             # ---------------------------------\n\
             # This field should be set to the desired installation location for the ROM.\n\
             # It is okay to change this value after the file has already been patched.\n\
             #\n\
             # Valid values: primary, dual, multi-slot-[1-3], data-slot-<id>, extsd-slot-<id>\n\
             #\n",
        );
        let _ = writeln!(
            out,
            "mbtool.installer.install-location={}\n",
            self.info.rom_id,
        );

        out
    }
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}
