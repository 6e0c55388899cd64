//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Jobs and workers are entities: their state changes over time, their id
/// never does.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
