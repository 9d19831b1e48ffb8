//! Root enumeration.
//!
//! Roots are the managed references the runtime holds outside the managed
//! heap: stack slots, globals, register spills. The collector consumes them
//! through the [`RootProvider`] seam, calling it once at the start of a
//! marking pass and once more when the gray set drains.
//!
//! [`RootSet`] is a concrete registry for runtimes (and tests) that want
//! explicit handle registration rather than their own stack walker.

use crate::alloc::GcRef;
use crate::trace::{Trace, Tracer};
use smallvec::SmallVec;
use std::cell::RefCell;

/// Source of root references for a marking pass.
///
/// Implementations call `tracer.trace_ptr` once per live root. Null entries
/// need not be filtered; the collector ignores them.
pub trait RootProvider {
    /// Report every root reference to the tracer.
    fn trace_roots(&self, tracer: &mut dyn Tracer);
}

/// Raw handle to a managed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawHandle {
    /// The payload reference, or null.
    pub ptr: *const u8,
}

impl RawHandle {
    /// Create a handle from a payload reference.
    pub fn new(ptr: *const u8) -> Self {
        Self { ptr }
    }

    /// Create a null handle.
    pub fn null() -> Self {
        Self {
            ptr: std::ptr::null(),
        }
    }

    /// Check if the handle is null.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }
}

/// Most runtimes hold only a handful of explicit roots at a time.
type Handles = SmallVec<[RawHandle; 8]>;

/// Explicit root registry.
///
/// Objects registered here (and everything reachable from them) survive
/// collection; unregistering makes them candidates again.
pub struct RootSet {
    handles: RefCell<Handles>,
}

impl RootSet {
    /// Create an empty root set.
    pub fn new() -> Self {
        Self {
            handles: RefCell::new(SmallVec::new()),
        }
    }

    /// Register a handle as a root.
    pub fn register_handle(&self, handle: RawHandle) {
        self.handles.borrow_mut().push(handle);
    }

    /// Unregister every handle with this handle's address.
    pub fn unregister_handle(&self, handle: RawHandle) {
        self.handles.borrow_mut().retain(|h| h.ptr != handle.ptr);
    }

    /// Register a typed reference as a root. Returns the handle for later
    /// unregistration.
    pub fn register<T: Trace>(&self, r: GcRef<T>) -> RawHandle {
        let handle = RawHandle::new(r.as_payload_ptr());
        self.register_handle(handle);
        handle
    }

    /// Remove all roots.
    pub fn clear(&self) {
        self.handles.borrow_mut().clear();
    }

    /// Number of registered handles.
    pub fn handle_count(&self) -> usize {
        self.handles.borrow().len()
    }
}

impl Default for RootSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RootProvider for RootSet {
    fn trace_roots(&self, tracer: &mut dyn Tracer) {
        for handle in self.handles.borrow().iter() {
            tracer.trace_ptr(handle.ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CountingTracer;

    #[test]
    fn test_empty_root_set() {
        let roots = RootSet::new();
        assert_eq!(roots.handle_count(), 0);

        let mut tracer = CountingTracer::new();
        roots.trace_roots(&mut tracer);
        assert_eq!(tracer.count, 0);
    }

    #[test]
    fn test_register_and_trace() {
        let roots = RootSet::new();
        roots.register_handle(RawHandle::new(0x1000 as *const u8));
        roots.register_handle(RawHandle::new(0x2000 as *const u8));
        assert_eq!(roots.handle_count(), 2);

        let mut tracer = CountingTracer::new();
        roots.trace_roots(&mut tracer);
        assert_eq!(tracer.count, 2);
    }

    #[test]
    fn test_unregister_removes_by_address() {
        let roots = RootSet::new();
        let a = RawHandle::new(0x1000 as *const u8);
        let b = RawHandle::new(0x2000 as *const u8);

        roots.register_handle(a);
        roots.register_handle(b);
        roots.unregister_handle(a);

        assert_eq!(roots.handle_count(), 1);

        let mut tracer = CountingTracer::new();
        roots.trace_roots(&mut tracer);
        assert_eq!(tracer.count, 1);
    }

    #[test]
    fn test_null_handles_pass_through() {
        let roots = RootSet::new();
        roots.register_handle(RawHandle::null());

        // Null roots are legal; the collector's tracer ignores them.
        let mut tracer = CountingTracer::new();
        roots.trace_roots(&mut tracer);
        assert_eq!(tracer.count, 0);
    }

    #[test]
    fn test_clear() {
        let roots = RootSet::new();
        roots.register_handle(RawHandle::new(0x1000 as *const u8));
        roots.clear();
        assert_eq!(roots.handle_count(), 0);
    }
}
