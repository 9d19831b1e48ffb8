//! Ember Garbage Collector
//!
//! An incremental tri-color mark-and-sweep garbage collector for a
//! single-threaded managed runtime.
//!
//! # Architecture
//!
//! Every managed object carries a small header holding its color, its
//! position in one of two intrusive lists, and a visitor that enumerates its
//! outgoing references:
//!
//! - **From-space**: white candidates awaiting discovery (and, late in a
//!   cycle, the survivors).
//! - **To-space**: objects discovered by marking (and, late in a cycle, the
//!   condemned).
//!
//! A collection cycle runs IDLE → MARK → SWEEP → IDLE in bounded steps, one
//! object per step, interleaved with allocation. When marking drains, the
//! two spaces swap roles and the meaning of "white" flips, so survivors
//! become the next cycle's candidates without another heap walk.
//!
//! # Write Barriers
//!
//! The mutator calls [`Collector::link`] after storing one managed reference
//! into another. If the store made a scanned (black) object point at an
//! undiscovered (white) one, the parent is shaded gray and rescanned. This
//! is the classic insertion barrier: it maintains the invariant that no
//! black object points directly at a white one.
//!
//! # Usage
//!
//! ```ignore
//! use ember_gc::{Collector, GcRef, RootSet, Trace, Tracer};
//!
//! struct Pair {
//!     left: Option<GcRef<Pair>>,
//!     right: Option<GcRef<Pair>>,
//! }
//!
//! unsafe impl Trace for Pair {
//!     fn trace(&self, tracer: &mut dyn Tracer) {
//!         if let Some(l) = self.left {
//!             tracer.trace_ptr(l.as_payload_ptr());
//!         }
//!         if let Some(r) = self.right {
//!             tracer.trace_ptr(r.as_payload_ptr());
//!         }
//!     }
//! }
//!
//! let mut gc = Collector::with_defaults();
//! let roots = RootSet::new();
//!
//! let mut pair = gc.alloc(Pair { left: None, right: None }, &roots);
//! roots.register(pair);
//!
//! let leaf = gc.alloc(Pair { left: None, right: None }, &roots);
//! pair.left = Some(leaf);
//! gc.link(pair.as_payload_ptr(), leaf.as_payload_ptr());
//!
//! gc.collect(&roots);
//! ```
//!
//! # Safety
//!
//! The collector requires that:
//! - every managed reference held by an object is reported by its visitor;
//! - [`Collector::link`] runs after every store of a managed reference into
//!   a managed object;
//! - objects are rooted (or reachable from a root) across any operation that
//!   advances the collector;
//! - visitors call only the tracer they are handed, never `allocate`,
//!   `link`, or `collect`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;
pub mod config;
pub mod header;
pub mod heap;
pub mod roots;
pub mod trace;

mod alloc;
mod space;
mod stats;
mod verify;

// Re-exports for convenient access
pub use alloc::GcRef;
pub use collector::{Collector, GcState};
pub use config::{ConfigError, GcConfig};
pub use header::ObjectHeader;
pub use heap::{RawAllocator, SystemAllocator};
pub use roots::{RawHandle, RootProvider, RootSet};
pub use stats::{GcStats, GcTimer};
pub use trace::{visit_fn_of, CountingTracer, NullTracer, Trace, Tracer, VisitFn};
