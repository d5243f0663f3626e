use crate::state::{HostState, Status};

/// A status change decided by the debounce logic, emitted at most once per
/// probe per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Online,
    Offline { failure_count: u32 },
}

/// Folds one probe outcome into a host's state and decides whether a
/// transition fires.
///
/// The debounce is asymmetric: going Down takes `offline_threshold`
/// consecutive failures, going Up takes a single success. A success always
/// resets the failure count, and a host that is already Down stays silent
/// while failures keep accumulating.
pub fn observe(
    state: &mut HostState,
    reachable: bool,
    offline_threshold: u32,
) -> Option<Transition> {
    if reachable {
        let was_down = state.status == Status::Down;
        state.failure_count = 0;
        if was_down {
            state.status = Status::Up;
            return Some(Transition::Online);
        }
        return None;
    }

    state.failure_count += 1;
    if state.status == Status::Up && state.failure_count >= offline_threshold {
        state.status = Status::Down;
        return Some(Transition::Offline {
            failure_count: state.failure_count,
        });
    }
    None
}
