// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same set
//! of names:
//!
//! - `uassert!` and `uassert_eq!`
//! - `SavedState`, implementing `task::ArchState`
//! - `TrapFrame`, implementing `task::UserFrame`
//! - `switch_context`, `fork_trampoline`
//! - `enable_irq`, `disable_irq`, `irqs_enabled`
//!
//! Anything that isn't bare-metal AArch64 gets the `fake` architecture, which
//! is what the host test suite runs against.

cfg_if::cfg_if! {
    // Note: cfg_if! is slightly touchy about ordering and expression
    // complexity; this chain seems to be the best compromise.

    if #[cfg(all(target_arch = "aarch64", target_os = "none"))] {
        #[macro_use]
        pub mod aarch64;
        pub use aarch64::*;
    } else if #[cfg(target_pointer_width = "64")] {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    } else {
        compile_error!("the kernel assumes 64-bit registers, even when faked");
    }
}
