//! The incremental collector state machine.
//!
//! A full collection cycle is split into bounded steps interleaved with
//! mutator allocation, so the mutator never pays for tracing the whole heap
//! in one pause:
//!
//! ```text
//!            ┌──────┐  first step   ┌──────┐
//!            │ Init │──────────────▶│ Idle │◀───────────────┐
//!            └──────┘               └──┬───┘                │
//!                                      │ shade roots        │ to-space
//!                                      ▼                    │ drained
//!                                   ┌──────┐   swap+flip ┌──┴────┐
//!                                   │ Mark │────────────▶│ Sweep │
//!                                   └──────┘             └───────┘
//! ```
//!
//! During marking, the from-space holds white candidates and the to-space
//! holds discovered objects: gray ones after the cursor, black ones behind
//! it. When the cursor drains the to-space (and a final root re-enumeration
//! finds nothing new), the spaces swap roles and the white bit flips:
//! everything the pass blackened is re-labeled white for the next cycle
//! without touching a single header, and everything still carrying the old
//! white bit sits in the new to-space awaiting the sweep.
//!
//! # Scheduling
//!
//! Every allocation performs one collector step before it returns, so
//! collection progress is proportional to allocation rate. `collect` drives
//! the machine until the cycle completes.
//!
//! # Write barrier
//!
//! The mutator must call [`Collector::link`] after storing a managed
//! reference into a managed object. If the store made a black object point
//! at a white one, the barrier shades the *parent* gray again (insertion
//! barrier), so the parent's children are rescanned before the cycle ends.

use crate::alloc::GcRef;
use crate::config::GcConfig;
use crate::header::{ObjectHeader, GRAY};
use crate::heap::{RawAllocator, SystemAllocator};
use crate::roots::RootProvider;
use crate::space::Space;
use crate::stats::{GcStats, GcTimer};
use crate::trace::{visit_fn_of, Trace, Tracer, VisitFn};
use crate::verify::verify_spaces;
use std::mem;
use std::ptr::NonNull;

/// Collector states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// Sentinel storage not yet acquired; resolved by the first step.
    Init,
    /// No cycle in progress.
    Idle,
    /// Scanning discovered objects, one per step.
    Mark,
    /// Releasing condemned objects, one per step.
    Sweep,
}

/// The incremental tri-color mark-and-sweep collector.
///
/// Strictly single-threaded and cooperative: the collector makes progress
/// only inside [`allocate`](Collector::allocate) and
/// [`collect`](Collector::collect) calls. Visitors invoked during scanning
/// may call [`mark`](Collector::mark) (via the [`Tracer`] they are handed)
/// but must not re-enter any other collector operation.
///
/// # Example
///
/// ```ignore
/// use ember_gc::{Collector, GcConfig, RootSet, Trace, Tracer};
///
/// let mut gc = Collector::with_defaults();
/// let roots = RootSet::new();
///
/// let node = gc.alloc(Node { next: None }, &roots);
/// let handle = roots.register(node);
///
/// gc.collect(&roots); // node survives: it is rooted
/// roots.unregister_handle(handle);
/// gc.collect(&roots); // node is reclaimed
/// ```
pub struct Collector<A: RawAllocator = SystemAllocator> {
    /// Space holding white candidates (and, after the swap, survivors).
    from: Space,
    /// Space holding discovered objects (and, after the swap, condemned).
    to: Space,
    /// Mark/sweep cursor. Parked on the to-space sentinel while idle.
    iter: *mut ObjectHeader,
    /// Current white tag value, 0 or 1. The other value is black.
    white: u8,
    state: GcState,
    alloc: A,
    config: GcConfig,
    stats: GcStats,
}

impl Collector<SystemAllocator> {
    /// Create a collector backed by the system allocator.
    pub fn new(config: GcConfig) -> Self {
        Self::with_allocator(config, SystemAllocator)
    }

    /// Create a collector with the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(GcConfig::default())
    }
}

impl<A: RawAllocator> Collector<A> {
    /// Create a collector over a caller-supplied raw allocator.
    ///
    /// Sentinel storage is acquired lazily on the first step, so the
    /// allocator does not need to be usable until the first allocation.
    pub fn with_allocator(config: GcConfig, alloc: A) -> Self {
        config.validate().expect("invalid GC configuration");
        Self {
            from: Space::unattached(),
            to: Space::unattached(),
            iter: std::ptr::null_mut(),
            white: 0,
            state: GcState::Init,
            alloc,
            config,
            stats: GcStats::new(),
        }
    }

    /// Current collector state.
    pub fn state(&self) -> GcState {
        self.state
    }

    /// Collector statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// The active configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    // =========================================================================
    // Public interface
    // =========================================================================

    /// Allocate a managed payload of `size` bytes with the given visitor.
    ///
    /// Performs the configured number of collector steps first, then returns
    /// the payload reference. The payload is uninitialized; the caller must
    /// initialize it (and root or link it) before the collector runs again.
    ///
    /// The new object is colored with the current white: an object that is
    /// neither rooted nor linked by the time the current cycle finishes is
    /// reclaimed by it.
    pub fn allocate(&mut self, size: usize, visit: VisitFn, roots: &dyn RootProvider) -> *mut u8 {
        if self.config.stress {
            self.collect(roots);
        } else {
            for _ in 0..self.config.steps_per_allocation {
                self.step(roots);
            }
        }

        let layout = ObjectHeader::layout_for(size);
        let raw = self.alloc.allocate(layout);
        let header = raw.as_ptr() as *mut ObjectHeader;
        unsafe {
            header.write(ObjectHeader::new(size, visit, self.white));
            self.from.push(header);
            self.stats.record_allocation((*header).total_size());
            (*header).payload()
        }
    }

    /// Allocate and initialize a typed managed object.
    ///
    /// The payload's visitor is derived from its [`Trace`] impl. Managed
    /// objects are reclaimed without running destructors, so `T` must not
    /// need `Drop`.
    pub fn alloc<T: Trace>(&mut self, value: T, roots: &dyn RootProvider) -> GcRef<T> {
        debug_assert!(
            !mem::needs_drop::<T>(),
            "managed objects are reclaimed without running destructors"
        );
        debug_assert!(mem::align_of::<T>() <= ObjectHeader::ALIGN);

        let payload = self.allocate(mem::size_of::<T>(), visit_fn_of::<T>(), roots);
        unsafe {
            (payload as *mut T).write(value);
            GcRef::from_payload(payload)
        }
    }

    /// Write barrier. Call immediately after storing `child` into a field of
    /// `parent`.
    ///
    /// If `parent` has already been scanned this cycle (black) and `child`
    /// has not been discovered (white), the store would hide `child` from
    /// the current marking pass; the barrier shades `parent` gray so its
    /// children are scanned again. In every other combination the store is
    /// already covered and the barrier does nothing.
    ///
    /// Never changes the color of any object other than `parent`.
    pub fn link(&mut self, parent: *const u8, child: *const u8) {
        if parent.is_null() || child.is_null() {
            return;
        }
        unsafe {
            let parent = ObjectHeader::from_payload(parent);
            let child = ObjectHeader::from_payload(child);
            if (*parent).color() == self.white ^ 1 && (*child).color() == self.white {
                self.make_gray(parent);
            }
        }
    }

    /// Shade a white object gray.
    ///
    /// Safe on null. Intended for root enumeration and object visitors;
    /// already-discovered (gray or black) objects are left alone.
    pub fn mark(&mut self, payload: *const u8) {
        if payload.is_null() {
            return;
        }
        unsafe {
            let header = ObjectHeader::from_payload(payload);
            if (*header).color() == self.white {
                self.make_gray(header);
            }
        }
    }

    /// Drive the state machine until the current cycle completes.
    ///
    /// If no cycle is in progress, starts one. On return the state is
    /// [`GcState::Idle`] and every object unreachable at the start of the
    /// pass has been reclaimed.
    pub fn collect(&mut self, roots: &dyn RootProvider) {
        let timer = GcTimer::start("collect");

        if matches!(self.state, GcState::Init | GcState::Idle) {
            self.step(roots);
        }
        while self.state != GcState::Idle {
            self.step(roots);
        }

        self.stats.record_collection(timer.stop());
    }

    /// Perform one bounded unit of collector work.
    ///
    /// Idle steps shade the roots and start a marking pass; mark steps scan
    /// one object; sweep steps release one object.
    pub fn step(&mut self, roots: &dyn RootProvider) {
        if self.config.verify_heap && self.state != GcState::Init {
            verify_spaces(&self.from, &self.to, self.white, self.state);
        }
        self.stats.record_step();

        match self.state {
            GcState::Init => {
                let layout = ObjectHeader::layout_for(0);
                let from_sentinel = self.alloc.allocate(layout).as_ptr() as *mut ObjectHeader;
                let to_sentinel = self.alloc.allocate(layout).as_ptr() as *mut ObjectHeader;
                unsafe {
                    self.from.attach(from_sentinel);
                    self.to.attach(to_sentinel);
                }
                self.iter = self.to.sentinel();
                self.state = GcState::Idle;
                // Same step continues into the idle work.
                self.begin_cycle(roots);
            }
            GcState::Idle => self.begin_cycle(roots),
            GcState::Mark => self.mark_step(roots),
            GcState::Sweep => self.sweep_step(),
        }
    }

    /// Check whether `payload` is a live object in one of the spaces.
    ///
    /// Linear walk; debugging and tests only. During sweeping only the
    /// from-space is searched, since the to-space links run through memory
    /// already returned to the allocator.
    pub fn contains(&self, payload: *const u8) -> bool {
        if self.state == GcState::Init || payload.is_null() {
            return false;
        }
        unsafe {
            let header = ObjectHeader::from_payload(payload);
            if self.from.headers().any(|h| h == header) {
                return true;
            }
            self.state != GcState::Sweep && self.to.headers().any(|h| h == header)
        }
    }

    // =========================================================================
    // State machine internals
    // =========================================================================

    /// Start a marking pass: shade every root, then hand off to mark steps.
    fn begin_cycle(&mut self, roots: &dyn RootProvider) {
        debug_assert_eq!(self.iter, self.to.sentinel());
        #[cfg(feature = "trace")]
        eprintln!("[gc] cycle start (white = {})", self.white);

        roots.trace_roots(self);
        self.state = GcState::Mark;
    }

    /// Scan one discovered object, or finish the pass if none remain.
    fn mark_step(&mut self, roots: &dyn RootProvider) {
        unsafe {
            let obj = (*self.iter).next();
            if obj != self.to.sentinel() {
                self.iter = obj;
                (*obj).set_color(self.white ^ 1);
                let visit = (*obj).visit();
                visit((*obj).payload(), self);
            } else {
                // The gray set drained. Re-shade the roots: anything the
                // mutator installed since the pass began shows up behind the
                // cursor and marking continues.
                roots.trace_roots(self);
                if (*self.iter).next() == self.to.sentinel() {
                    self.finish_mark();
                }
            }
        }
    }

    /// Swap the spaces and flip white: survivors become next cycle's
    /// candidates, everything still old-white is condemned.
    fn finish_mark(&mut self) {
        mem::swap(&mut self.from, &mut self.to);
        self.white ^= 1;
        unsafe {
            self.iter = (*self.to.sentinel()).next();
        }
        self.state = GcState::Sweep;

        #[cfg(feature = "trace")]
        eprintln!("[gc] mark finished, sweeping (white = {})", self.white);
    }

    /// Release one condemned object, or close out the cycle.
    fn sweep_step(&mut self) {
        unsafe {
            let obj = self.iter;
            if obj != self.to.sentinel() {
                self.iter = (*obj).next();
                let layout = ObjectHeader::layout_for((*obj).size());
                self.stats.record_free((*obj).total_size());
                self.alloc.free(NonNull::new_unchecked(obj as *mut u8), layout);
            } else {
                self.to.clear();
                self.state = GcState::Idle;
                self.stats.record_cycle();

                if self.config.trace {
                    eprintln!(
                        "[gc] cycle {} done: {} objects live, {} freed total",
                        self.stats.cycles_completed,
                        self.stats.live_objects(),
                        self.stats.objects_freed,
                    );
                }
            }
        }
    }

    /// Move an object into the to-space and tag it gray.
    ///
    /// If the object is exactly the one under the cursor (a black object
    /// re-shaded by the barrier), the cursor backs up one position so the
    /// relocation does not strand it.
    fn make_gray(&mut self, obj: *mut ObjectHeader) {
        unsafe {
            if obj == self.iter {
                self.iter = (*obj).prev();
            }
            Space::unlink(obj);
            self.to.push(obj);
            (*obj).set_color(GRAY);
        }
    }
}

/// The collector is its own marking tracer: visitors and root providers
/// report references straight into [`Collector::mark`].
impl<A: RawAllocator> Tracer for Collector<A> {
    fn trace_ptr(&mut self, payload: *const u8) {
        self.mark(payload);
    }
}

impl<A: RawAllocator> Drop for Collector<A> {
    fn drop(&mut self) {
        if self.state == GcState::Init {
            return;
        }
        unsafe {
            // Finish an in-flight sweep so the to-space is walkable again.
            while self.state == GcState::Sweep {
                self.sweep_step();
            }
            for sentinel in [self.from.sentinel(), self.to.sentinel()] {
                let mut cur = (*sentinel).next();
                while cur != sentinel {
                    let next = (*cur).next();
                    let layout = ObjectHeader::layout_for((*cur).size());
                    self.alloc.free(NonNull::new_unchecked(cur as *mut u8), layout);
                    cur = next;
                }
                self.alloc
                    .free(NonNull::new_unchecked(sentinel as *mut u8), ObjectHeader::layout_for(0));
            }
        }
    }
}
