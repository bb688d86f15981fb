//! Filesystem utilities for buslock.
//!
//! The queue file is only ever replaced as a whole, never edited in place;
//! this module provides the write-sibling-then-rename primitive for that.

pub mod atomic;

pub use atomic::{atomic_write_via, sibling_path};
