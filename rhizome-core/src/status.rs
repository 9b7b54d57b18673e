//! Statuses returned by mutating substrate operations.

/// Outcome of an idempotent mutating operation.
///
/// There are no fatal error paths behind these: a repeated `add` hands back
/// the existing object, a repeated `del` reports there was nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation took effect.
    Ok,
    /// An `add` found the entry already there; the existing one is returned.
    AlreadyPresent,
    /// A `del` found nothing to remove.
    AlreadyAbsent,
    /// A `pause` found the entry paused.
    AlreadyPaused,
    /// A `resume` found the entry active.
    AlreadyResumed,
    /// A lookup or flag flip addressed an entry that does not exist.
    Absent,
}

impl Status {
    /// True when the operation changed state.
    #[must_use]
    pub const fn took_effect(&self) -> bool {
        matches!(self, Self::Ok)
    }
}
