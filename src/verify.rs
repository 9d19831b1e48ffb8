//! Debug-time heap verification.
//!
//! When `GcConfig::verify_heap` is set, the collector calls [`verify_spaces`]
//! at every step boundary. A violation means the heap is corrupt (a missed
//! write barrier, a visitor reporting a stale reference, or a collector bug)
//! and is not recoverable, so the verifier panics with a diagnostic.

use crate::collector::GcState;
use crate::header::ObjectHeader;
use crate::space::Space;
use rustc_hash::FxHashSet;

/// Check the structural and color invariants of both spaces.
///
/// Checks performed:
/// - each space is a well-formed circular list (`h.next.prev == h` and
///   `h.prev.next == h` for every header, terminating at the sentinel);
/// - no object appears in both spaces;
/// - no object in the from-space is gray;
/// - outside of sweeping, no object in the to-space is white (idle
///   to-space members are legal: `mark` may pre-shade objects before a
///   cycle begins).
///
/// The to-space is skipped during sweeping: its links run through memory
/// that has already been returned to the allocator.
pub(crate) fn verify_spaces(from: &Space, to: &Space, white: u8, state: GcState) {
    let from_members = walk_checked(from, "from");

    if state == GcState::Sweep {
        return;
    }

    let to_members = walk_checked(to, "to");

    if let Some(addr) = from_members.intersection(&to_members).next() {
        panic!("gc verify: object {:#x} linked into both spaces", addr);
    }

    unsafe {
        for header in from.headers() {
            if (*header).is_gray() {
                panic!("gc verify: gray object {:p} in from-space", header);
            }
        }

        if matches!(state, GcState::Idle | GcState::Mark) {
            for header in to.headers() {
                if (*header).color() == white {
                    panic!("gc verify: white object {:p} in to-space", header);
                }
            }
        }
    }
}

/// Walk one space checking list integrity; returns the member addresses.
fn walk_checked(space: &Space, name: &str) -> FxHashSet<usize> {
    let mut seen = FxHashSet::default();
    unsafe {
        let sentinel = space.sentinel();

        let mut cur = (*sentinel).next();
        while cur != sentinel {
            if !seen.insert(cur as usize) {
                panic!("gc verify: {}-space list cycles without reaching the sentinel", name);
            }
            check_neighbors(cur, name);
            cur = (*cur).next();
        }
        check_neighbors(sentinel, name);
    }
    seen
}

unsafe fn check_neighbors(header: *mut ObjectHeader, name: &str) {
    if (*(*header).next()).prev() != header {
        panic!("gc verify: {}-space forward link broken at {:p}", name, header);
    }
    if (*(*header).prev()).next() != header {
        panic!("gc verify: {}-space backward link broken at {:p}", name, header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::GRAY;
    use crate::trace::Tracer;

    unsafe fn noop_visit(_payload: *mut u8, _tracer: &mut dyn Tracer) {}

    fn attached_space(storage: &mut ObjectHeader) -> Space {
        let mut space = Space::unattached();
        unsafe { space.attach(storage) };
        space
    }

    #[test]
    fn test_empty_spaces_pass() {
        let mut from_storage = ObjectHeader::new(0, noop_visit, 0);
        let mut to_storage = ObjectHeader::new(0, noop_visit, 0);
        let from = attached_space(&mut from_storage);
        let to = attached_space(&mut to_storage);

        verify_spaces(&from, &to, 0, GcState::Idle);
    }

    #[test]
    fn test_well_formed_members_pass() {
        let mut from_storage = ObjectHeader::new(0, noop_visit, 0);
        let mut to_storage = ObjectHeader::new(0, noop_visit, 0);
        let from = attached_space(&mut from_storage);
        let to = attached_space(&mut to_storage);

        let mut white_obj = Box::new(ObjectHeader::new(0, noop_visit, 0));
        let mut gray_obj = Box::new(ObjectHeader::new(0, noop_visit, GRAY));

        unsafe {
            from.push(white_obj.as_mut());
            to.push(gray_obj.as_mut());
        }

        verify_spaces(&from, &to, 0, GcState::Mark);
    }

    #[test]
    #[should_panic(expected = "gray object")]
    fn test_detects_gray_in_from_space() {
        let mut from_storage = ObjectHeader::new(0, noop_visit, 0);
        let mut to_storage = ObjectHeader::new(0, noop_visit, 0);
        let from = attached_space(&mut from_storage);
        let to = attached_space(&mut to_storage);

        let mut gray_obj = Box::new(ObjectHeader::new(0, noop_visit, GRAY));
        unsafe { from.push(gray_obj.as_mut()) };

        verify_spaces(&from, &to, 0, GcState::Idle);
    }

    #[test]
    #[should_panic(expected = "white object")]
    fn test_detects_white_in_to_space_during_mark() {
        let mut from_storage = ObjectHeader::new(0, noop_visit, 0);
        let mut to_storage = ObjectHeader::new(0, noop_visit, 0);
        let from = attached_space(&mut from_storage);
        let to = attached_space(&mut to_storage);

        let mut white_obj = Box::new(ObjectHeader::new(0, noop_visit, 0));
        unsafe { to.push(white_obj.as_mut()) };

        verify_spaces(&from, &to, 0, GcState::Mark);
    }

    #[test]
    #[should_panic(expected = "link broken")]
    fn test_detects_broken_link() {
        let mut from_storage = ObjectHeader::new(0, noop_visit, 0);
        let mut to_storage = ObjectHeader::new(0, noop_visit, 0);
        let from = attached_space(&mut from_storage);
        let to = attached_space(&mut to_storage);

        let mut a = Box::new(ObjectHeader::new(0, noop_visit, 0));
        let mut b = Box::new(ObjectHeader::new(0, noop_visit, 0));
        unsafe {
            from.push(a.as_mut());
            from.push(b.as_mut());
            // Corrupt: a's prev no longer agrees with its neighbors.
            a.set_prev(b.as_mut());
        }

        verify_spaces(&from, &to, 0, GcState::Idle);
    }
}
