/// Item state definitions for tracking harvest progress
///
/// Every candidate identifier moves through these states exactly once per
/// run: `Pending -> Fetching -> {Valid | Rejected | Failed}`.
///
/// Only terminal states are ever recorded. `Pending` and `Fetching` name
/// the lifecycle of an item that is unclaimed or held by a worker; neither
/// is persisted, so a crash mid-fetch leaves the item unprocessed.

/// Represents the current state of a candidate in the harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    // ===== Active States =====
    /// Claimed by no worker yet
    Pending,

    /// A worker is fetching the detail document
    Fetching,

    // ===== Terminal States =====
    /// Passed classification and was written to the games stream
    Valid,

    /// Fetched and classified as not a game (or unavailable)
    Rejected,

    /// Could not be fetched after all retries and rotations
    Failed,
}

impl ItemState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Rejected | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!ItemState::Pending.is_terminal());
        assert!(!ItemState::Fetching.is_terminal());

        assert!(ItemState::Valid.is_terminal());
        assert!(ItemState::Rejected.is_terminal());
        assert!(ItemState::Failed.is_terminal());
    }
}
