// SPDX-FileCopyrightText: 2024 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

/// Description of a supported device. The catalog itself lives outside the
/// core; callers pass in the target device and the list of known devices for
/// the generated metadata.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Device {
    /// Stable identifier, eg. `hammerhead`.
    pub id: String,
    /// Build codenames this device reports, eg. `hammerhead`, `hammerheadcaf`.
    pub codenames: Vec<String>,
    /// Human readable name, eg. `Google Nexus 5`.
    pub name: String,
    /// ABI of the installer binaries to embed, eg. `armeabi-v7a`.
    pub architecture: String,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        codenames: Vec<String>,
        name: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            codenames,
            name: name.into(),
            architecture: architecture.into(),
        }
    }
}
