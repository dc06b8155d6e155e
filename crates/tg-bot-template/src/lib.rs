mod app;
mod config;
mod ctx;
mod error;
mod observability;
mod tg;

pub mod util;

pub use crate::app::*;
pub use crate::ctx::*;
pub use crate::error::*;
pub use config::*;
pub use observability::*;
pub use tg::{Config as TgConfig, Telegram};

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}
