// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time kernel configuration.
//!
//! Generated by `build.rs` from the RON document in the `KERN_CONFIG`
//! environment variable, for example:
//!
//! ```text
//! KERN_CONFIG='(low_memory: 0x40400000, high_memory: 0x48000000)'
//! ```
//!
//! Fields left out keep their defaults.

include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));
