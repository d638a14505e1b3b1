//! shmarray - zero-copy shared memory arrays across processes
//!
//! This library lets unrelated OS processes share a named block of memory
//! and view it as a typed, fixed-stride array, without ever copying the
//! payload between them.
//!
//! # Architecture
//!
//! - **[`ShmContext`]**: process-scoped lifecycle manager: creates,
//!   attaches, closes and unlinks segments, and tracks who owes what
//!   (created-here segments get unlinked here; attached segments only get
//!   their local mapping closed)
//! - **[`ShmArray`]**: a fixed-stride view over a segment's bytes: raw
//!   single-byte elements or packed records described by a format string
//! - **[`ArrayHandle`]**: the serializable identity `{name, element_count,
//!   element_layout}` that crosses process boundaries instead of the bytes
//!
//! # Lifetime discipline
//!
//! A view borrows its context; `close`/`unlink`/`cleanup_all` need
//! `&mut` access, so releasing a mapping with views still outstanding is
//! a compile error rather than a runtime fault. Cleanup also runs on
//! drop, at process exit and on termination signals, so owned segments
//! do not outlive a crashed owner.
//!
//! # Sharing
//!
//! Writes land directly in the shared mapping, visible immediately to
//! every attached process. No locks or atomics are layered on top:
//! concurrent writers are expected to partition the index space
//! (e.g. disjoint ranges per process).

pub mod context;
pub mod error;
pub mod grid;
pub mod handle;
mod hooks;
pub mod layout;
pub mod name;
pub mod registry;
pub mod segment;
pub mod view;

pub use context::ShmContext;
pub use error::{Result, ShmError};
pub use grid::{GridHandle, ShmGrid};
pub use handle::ArrayHandle;
pub use layout::{ByteOrder, Element, ElementLayout, FieldKind, RecordLayout, Scalar};
pub use name::MAX_NAME_LENGTH;
pub use view::{Elements, ShmArray};
