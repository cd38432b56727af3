// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

/// Page size assumed when validating the configured memory region. Must match
/// `abi::PAGE_SIZE`; the generated code re-checks this at compile time.
const PAGE_SIZE: u64 = 4096;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    generate_kconfig()?;
    Ok(())
}

fn generate_kconfig() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=KERN_CONFIG");
    let kconfig: KernelConfig = match env::var("KERN_CONFIG") {
        Ok(text) => ron::de::from_str(&text)?,
        Err(env::VarError::NotPresent) => KernelConfig::default(),
        Err(e) => return Err(e.into()),
    };
    kconfig.validate()?;

    let out = &PathBuf::from(
        env::var_os("OUT_DIR").ok_or("OUT_DIR not set by cargo")?,
    );
    let mut file = File::create(out.join("kconfig.rs"))?;

    writeln!(file, "// See build.rs for details")?;
    writeln!(
        file,
        "pub const LOW_MEMORY: usize = {:#x};",
        kconfig.low_memory
    )?;
    writeln!(
        file,
        "pub const HIGH_MEMORY: usize = {:#x};",
        kconfig.high_memory
    )?;
    writeln!(
        file,
        "pub const PAGE_COUNT: usize = (HIGH_MEMORY - LOW_MEMORY) / abi::PAGE_SIZE;"
    )?;
    writeln!(
        file,
        "pub const TASK_CAPACITY: usize = {};",
        kconfig.task_capacity
    )?;
    writeln!(
        file,
        "pub const TICK_INTERVAL: u32 = {};",
        kconfig.tick_interval
    )?;
    writeln!(
        file,
        "pub const INIT_PRIORITY: u8 = {};",
        kconfig.init_priority
    )?;
    writeln!(
        file,
        "static_assertions::const_assert_eq!(abi::PAGE_SIZE, {PAGE_SIZE});"
    )?;

    Ok(())
}

#[derive(Deserialize)]
#[serde(default)]
struct KernelConfig {
    /// First byte of the region handed out by the page allocator.
    low_memory: u64,
    /// One past the last byte of that region.
    high_memory: u64,
    task_capacity: usize,
    /// Timer comparator cycles between ticks.
    tick_interval: u32,
    init_priority: u8,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            low_memory: 0x0040_0000,
            high_memory: 0x3f00_0000,
            task_capacity: 64,
            tick_interval: 200_000,
            init_priority: 1,
        }
    }
}

impl KernelConfig {
    fn validate(&self) -> Result<(), String> {
        if self.low_memory % PAGE_SIZE != 0 || self.high_memory % PAGE_SIZE != 0
        {
            return Err(format!(
                "memory bounds {:#x}..{:#x} are not page aligned",
                self.low_memory, self.high_memory
            ));
        }
        if self.low_memory == 0 || self.low_memory >= self.high_memory {
            return Err(format!(
                "empty or null memory region {:#x}..{:#x}",
                self.low_memory, self.high_memory
            ));
        }
        // Slot 0 is the boot task, so anything smaller can't run a program.
        if self.task_capacity < 2 || self.task_capacity > usize::from(u16::MAX)
        {
            return Err(format!(
                "task_capacity {} out of range",
                self.task_capacity
            ));
        }
        if self.tick_interval == 0 {
            return Err("tick_interval must be nonzero".to_string());
        }
        if self.init_priority == 0 {
            return Err("init_priority must be nonzero".to_string());
        }
        Ok(())
    }
}
