#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

#[macro_use]
pub(crate) mod util;

mod arena;
mod behind;
pub mod config;
pub mod cursor;
mod error;
pub mod item;
pub mod link;
pub mod list;
pub mod prioritized;
pub mod snapshot;
mod subcursor;
pub mod unprioritized;

#[doc(inline)]
pub use self::{
    config::{Builder, Config},
    cursor::PrioritizedCursor,
    error::{Error, Result},
    item::{ItemLink, LockId, NO_LOCK_ID},
    link::{Link, LinkState},
    list::LinkedList,
    prioritized::PrioritizedList,
    unprioritized::UnprioritizedNonlockingCursor,
};

#[cfg(test)]
pub(crate) mod test_util {
    pub(crate) fn trace_init() -> impl Drop {
        use tracing_subscriber::{prelude::*, EnvFilter};
        let filter = EnvFilter::from_env("RUST_LOG");
        tracing_subscriber::fmt()
            .with_test_writer()
            .without_time()
            .with_env_filter(filter)
            .with_thread_names(true)
            .set_default()
    }
}
