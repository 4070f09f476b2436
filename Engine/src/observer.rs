/// Exposes the edge histogram to an in-process LibAFL fuzzer.
use libafl::observers::StdMapObserver;

use crate::coverage::{CoverageMap, MAP_SIZE};

/// Map observer over the histogram, named `edges`.
///
/// # Safety
/// The observer aliases the map's memory. `map` must outlive the observer and
/// must not be moved or dropped while the observer is in use.
pub unsafe fn edges_observer(map: &mut CoverageMap) -> StdMapObserver<'static, u8, false> {
    unsafe { StdMapObserver::from_mut_ptr("edges", map.as_mut_ptr(), MAP_SIZE) }
}

#[cfg(test)]
mod tests {
    use libafl::observers::MapObserver;

    use super::*;
    use crate::coverage::EdgeId;

    #[test]
    fn observer_sees_hit_edges() {
        let mut map = CoverageMap::local();
        map.increment(EdgeId::from_transition(0x10, 0));
        map.increment(EdgeId::from_transition(0x30, 0x10));
        map.increment(EdgeId::from_transition(0x30, 0x10));

        let observer = unsafe { edges_observer(&mut map) };
        assert_eq!(observer.usable_count(), MAP_SIZE);
        assert_eq!(observer.count_bytes(), 2);
        assert_eq!(observer.get(0x20), 2);
    }
}
