//! Step budget arithmetic shared by the run loop and its callers.

/// Step count at which a loop invocation must stop.
///
/// A fresh run gets `max_steps`; a resumed run gets `max_steps` more on top of
/// the steps it already completed.
pub fn max_steps_allowed(max_steps: u32, steps_at_start: u32) -> u32 {
    steps_at_start.saturating_add(max_steps)
}

/// True once `steps` has used up the allowance.
pub fn exhausted(steps: u32, allowed: u32) -> bool {
    steps >= allowed
}
