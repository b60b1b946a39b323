//! Top-level facade crate for parley.
//!
//! Re-exports the protocol core and the runtime so agents can depend on a single crate.

pub mod core {
    pub use parley_core::*;
}

pub mod runtime {
    pub use parley_runtime::*;
}
