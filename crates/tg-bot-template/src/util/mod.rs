//! Assorted utility functions (missing batteries).
mod std_ext;

pub use std_ext::ErrorExt;
pub(crate) use std_ext::panic_message;

pub(crate) mod prelude {
    pub(crate) use super::std_ext::prelude::*;
}
