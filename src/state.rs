//! Hover/multiselect/selection state and the table filter/sort contract.
//!
//! One instance per session. The map reports set-valued hover (overlapping
//! paths can all be under the cursor); the table reports at most one
//! hovered row at a time and replaces the whole set. An ambiguous
//! multi-hit click enters multiselect mode, which forces the visible set to
//! exactly the clicked tracks, bypassing table filters, until a background
//! click collapses it.

use std::collections::BTreeSet;

use crate::track::Track;
use crate::{GeoBounds, TrackId};

/// Which aspects of the state a transition changed. The caller maps these
/// onto compositor dirty flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChanges {
    pub hover: bool,
    pub selection: bool,
    pub visibility: bool,
}

impl StateChanges {
    pub fn any(&self) -> bool {
        self.hover || self.selection || self.visibility
    }

    fn merged(self, other: StateChanges) -> StateChanges {
        StateChanges {
            hover: self.hover || other.hover,
            selection: self.selection || other.selection,
            visibility: self.visibility || other.visibility,
        }
    }
}

/// What a click did, for triggering camera/scroll side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Nothing relevant changed
    None,
    /// The selection was cleared (toggle or background click)
    Deselected,
    /// A track became the selection
    Selected(TrackId),
    /// Multiselect mode was cleared by a background click
    MultiselectCleared,
    /// An ambiguous multi-hit click entered multiselect mode
    Multiselected,
}

/// Sort order the table supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    StartDate,
    Name,
    Distance,
    MovingTime,
    ElevationGain,
}

/// Filter predicate + sort order, owned by the table, consumed here.
pub struct TableQuery {
    pub filter: Option<Box<dyn Fn(&Track) -> bool + Send>>,
    pub sort: SortKey,
    pub descending: bool,
}

impl Default for TableQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort: SortKey::StartDate,
            descending: true,
        }
    }
}

impl TableQuery {
    /// Filtered, sorted ids over the given tracks.
    pub fn apply<'a, I>(&self, tracks: I) -> Vec<TrackId>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        let mut rows: Vec<&Track> = tracks
            .into_iter()
            .filter(|t| self.filter.as_ref().map(|f| f(*t)).unwrap_or(true))
            .collect();
        self.sort_rows(&mut rows);
        rows.into_iter().map(|t| t.id).collect()
    }

    /// Sorted ids ignoring the filter (multiselect mode).
    pub fn apply_unfiltered<'a, I>(&self, tracks: I) -> Vec<TrackId>
    where
        I: IntoIterator<Item = &'a Track>,
    {
        let mut rows: Vec<&Track> = tracks.into_iter().collect();
        self.sort_rows(&mut rows);
        rows.into_iter().map(|t| t.id).collect()
    }

    fn sort_rows(&self, rows: &mut [&Track]) {
        rows.sort_by(|a, b| {
            let ord = match self.sort {
                SortKey::StartDate => a.data.start_date.cmp(&b.data.start_date),
                SortKey::Name => a.data.name.cmp(&b.data.name),
                SortKey::Distance => a
                    .data
                    .distance
                    .partial_cmp(&b.data.distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SortKey::MovingTime => a.data.moving_time.cmp(&b.data.moving_time),
                SortKey::ElevationGain => a
                    .data
                    .total_elevation_gain
                    .partial_cmp(&b.data.total_elevation_gain)
                    .unwrap_or(std::cmp::Ordering::Equal),
            };
            let ord = ord.then(a.id.cmp(&b.id));
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

/// Derive the visible id list.
///
/// With a non-empty multiselect the visible set is exactly the multiselected
/// tracks (table filters are suppressed while the disambiguation is
/// active); otherwise it is the filtered set.
pub fn derive_visible<'a, I>(
    tracks: I,
    query: &TableQuery,
    multiselected: &BTreeSet<TrackId>,
) -> Vec<TrackId>
where
    I: IntoIterator<Item = &'a Track>,
{
    if multiselected.is_empty() {
        query.apply(tracks)
    } else {
        query
            .apply_unfiltered(tracks)
            .into_iter()
            .filter(|id| multiselected.contains(id))
            .collect()
    }
}

/// Map viewport collaborator: frames a selected track's bounds.
pub trait MapCamera {
    fn fit_bounds(&mut self, bounds: &GeoBounds);
}

/// Table viewport collaborator: brings a selected row into view, but only
/// when it is not already fully visible.
pub trait TableScroll {
    fn row_fully_visible(&self, id: TrackId) -> bool;
    fn scroll_to_row(&mut self, id: TrackId);
}

/// Hover/multiselect/selection state, one instance per page session.
#[derive(Debug, Default)]
pub struct SelectionState {
    hovered: BTreeSet<TrackId>,
    multiselected: BTreeSet<TrackId>,
    selected: Option<TrackId>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hovered(&self) -> &BTreeSet<TrackId> {
        &self.hovered
    }

    pub fn multiselected(&self) -> &BTreeSet<TrackId> {
        &self.multiselected
    }

    pub fn selected(&self) -> Option<TrackId> {
        self.selected
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Replace the hover set from a map pointer-move hit list.
    pub fn set_map_hover(&mut self, hits: &[TrackId]) -> StateChanges {
        let next: BTreeSet<TrackId> = hits.iter().copied().collect();
        if next == self.hovered {
            return StateChanges::default();
        }
        self.hovered = next;
        StateChanges {
            hover: true,
            ..Default::default()
        }
    }

    /// Table row hover: replaces the entire hover set with at most one id.
    pub fn set_table_hover(&mut self, id: Option<TrackId>) -> StateChanges {
        let next: BTreeSet<TrackId> = id.into_iter().collect();
        if next == self.hovered {
            return StateChanges::default();
        }
        self.hovered = next;
        StateChanges {
            hover: true,
            ..Default::default()
        }
    }

    /// A map click over the given hit list.
    ///
    /// - zero hits: a background click collapses multiselect first; only a
    ///   second background click clears the selection
    /// - one hit: toggle the selection
    /// - several hits: enter multiselect mode with exactly those tracks
    pub fn click(&mut self, hits: &[TrackId]) -> (ClickOutcome, StateChanges) {
        match hits.len() {
            0 => {
                if !self.multiselected.is_empty() {
                    self.multiselected.clear();
                    (
                        ClickOutcome::MultiselectCleared,
                        StateChanges {
                            visibility: true,
                            ..Default::default()
                        },
                    )
                } else if self.selected.is_some() {
                    self.selected = None;
                    (
                        ClickOutcome::Deselected,
                        StateChanges {
                            selection: true,
                            ..Default::default()
                        },
                    )
                } else {
                    (ClickOutcome::None, StateChanges::default())
                }
            }
            1 => self.toggle_selected(hits[0]),
            _ => {
                self.multiselected = hits.iter().copied().collect();
                (
                    ClickOutcome::Multiselected,
                    StateChanges {
                        visibility: true,
                        ..Default::default()
                    },
                )
            }
        }
    }

    /// Toggle the selection (map single-hit click and table row click).
    pub fn toggle_selected(&mut self, id: TrackId) -> (ClickOutcome, StateChanges) {
        let changes = StateChanges {
            selection: true,
            ..Default::default()
        };
        if self.selected == Some(id) {
            self.selected = None;
            (ClickOutcome::Deselected, changes)
        } else {
            self.selected = Some(id);
            (ClickOutcome::Selected(id), changes)
        }
    }

    /// Drop hovered/selected ids that fell out of the visible set.
    ///
    /// A track that scrolls out of relevance cannot remain selected.
    pub fn prune_to_visible(&mut self, visible: &BTreeSet<TrackId>) -> StateChanges {
        let mut changes = StateChanges::default();

        let pruned: BTreeSet<TrackId> = self
            .hovered
            .iter()
            .copied()
            .filter(|id| visible.contains(id))
            .collect();
        if pruned.len() != self.hovered.len() {
            self.hovered = pruned;
            changes = changes.merged(StateChanges {
                hover: true,
                ..Default::default()
            });
        }

        if let Some(id) = self.selected {
            if !visible.contains(&id) {
                self.selected = None;
                changes = changes.merged(StateChanges {
                    selection: true,
                    ..Default::default()
                });
            }
        }

        changes
    }
}
