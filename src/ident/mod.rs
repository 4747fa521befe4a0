//! Global event-identifier resolution.
//!
//! Event ids are recorded process-locally by the instrumentation
//! framework (shape `rank:io_step:local_index`) and are only unique
//! within one process. Prefixing the owning process number makes them
//! unique across the whole run. The raw id is treated as an opaque
//! string; nothing here parses it.

/// Literal stored by the instrumentation framework when a GPU event's
/// parent could not be correlated. Stored verbatim, never resolved.
pub const ERR_NO_CORRELATION: &str = "ERR_NO_CORRELATION";

/// Derives the globally unique form of a process-local event id.
///
/// Pure and total: for a fixed `pid` the mapping is injective over
/// distinct raw ids, and distinct pids can never collide because the
/// prefix differs.
pub fn global_id(raw_id: &str, pid: u32) -> String {
    format!("{pid}:{raw_id}")
}

/// Resolves a parent-reference field, which may alternatively hold the
/// [`ERR_NO_CORRELATION`] sentinel instead of a real identifier.
pub fn global_parent_ref(raw_ref: &str, pid: u32) -> String {
    if raw_ref == ERR_NO_CORRELATION {
        raw_ref.to_string()
    } else {
        global_id(raw_ref, pid)
    }
}
