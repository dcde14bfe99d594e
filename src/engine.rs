//! # Track Atlas Engine
//!
//! Stateful viewer engine that keeps the whole session's state in one
//! place: the track set, hover/multiselect/selection, the table's
//! filter/sort contract, the projection cache and the compositor.
//!
//! ## Architecture
//!
//! The engine is the single in-memory source of truth per page session.
//! Event handlers (pointer move, click, table hover, filter edits,
//! viewport changes) mutate state and set dirty flags; the host calls
//! [`TrackAtlas::render_frame`] once per animation frame, which coalesces
//! any number of changes into at most one redraw.
//!
//! Execution is single-threaded and cooperative: there is exactly one
//! logical owner of all mutable state, so no per-field locking is needed.
//! The singleton is wrapped in a `Mutex` only to make the `ATLAS` handle
//! safe to touch from tests and host glue.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rstar::{RTree, RTreeObject, AABB};

use crate::compositor::{Compositor, Viewport};
use crate::hit_test::hits_at;
use crate::projection::{Projection, WebMercator};
use crate::state::{ClickOutcome, MapCamera, SelectionState, StateChanges, TableQuery, TableScroll};
use crate::track::{ActivitySummary, Track};
use crate::{GeoBounds, PixelPoint, TrackId};

/// Hit tolerance around the cursor, screen pixels.
const HIT_TOLERANCE_PX: f64 = 7.0;

/// Geographic bounds wrapper for R-tree viewport queries.
#[derive(Debug, Clone)]
pub struct TrackBoundsEntry {
    pub track_id: TrackId,
    pub bounds: GeoBounds,
}

impl RTreeObject for TrackBoundsEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

/// Generation handle of one sync run. A newer generation supersedes all
/// older ones: stale partial or final results are simply discarded, so no
/// cancellation token is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncGeneration(u64);

/// Engine summary counters (introspection endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasStats {
    pub track_count: usize,
    pub with_geometry: usize,
    pub visible_count: usize,
    pub hovered_count: usize,
    pub has_selection: bool,
    pub redraw_count: u64,
}

/// The stateful atlas engine.
pub struct TrackAtlas {
    tracks: HashMap<TrackId, Track>,
    /// Load order, so iteration and rendering stay deterministic
    order: Vec<TrackId>,

    state: SelectionState,
    query: TableQuery,
    projection: WebMercator,
    compositor: Compositor,
    viewport: Viewport,

    // Derived visible set + spatial index, recomputed on demand
    visible: Vec<TrackId>,
    visible_dirty: bool,
    spatial_index: RTree<TrackBoundsEntry>,
    spatial_dirty: bool,
    projections_dirty: bool,

    /// Pointer moves are ignored while a pan/zoom gesture is in progress
    view_gesture_in_progress: bool,

    // Sync supersession state
    next_sync_generation: u64,
    active_sync: Option<u64>,
    sync_progress: Vec<ActivitySummary>,
}

impl TrackAtlas {
    /// Create an engine rendering into a `width` x `height` viewport.
    pub fn new(width: u32, height: u32) -> Self {
        let projection = WebMercator::default();
        Self {
            tracks: HashMap::new(),
            order: Vec::new(),
            state: SelectionState::new(),
            query: TableQuery::default(),
            projection,
            compositor: Compositor::new(width, height),
            viewport: Viewport::new(width, height, PixelPoint::new(0.0, 0.0), 0.0),
            visible: Vec::new(),
            visible_dirty: true,
            spatial_index: RTree::new(),
            spatial_dirty: true,
            projections_dirty: true,
            view_gesture_in_progress: false,
            next_sync_generation: 0,
            active_sync: None,
            sync_progress: Vec::new(),
        }
    }

    // ========================================================================
    // Track Management
    // ========================================================================

    /// Replace the track set from a full activity list.
    ///
    /// Decoding and simplification happen here, once per record; decode
    /// failures degrade locally to tracks without geometry.
    pub fn load_activities(&mut self, records: Vec<ActivitySummary>) {
        self.tracks.clear();
        self.order.clear();
        for record in records {
            let track = Track::from_summary(record);
            self.order.push(track.id);
            self.tracks.insert(track.id, track);
        }
        info!(
            "[TrackAtlas] Loaded {} activities ({} with geometry)",
            self.order.len(),
            self.tracks.values().filter(|t| t.has_map()).count()
        );

        self.visible_dirty = true;
        self.spatial_dirty = true;
        self.projections_dirty = true;
        self.compositor.mark_tracks_dirty();
        self.apply_visibility_change();
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// Tracks in load order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.order.iter().filter_map(|id| self.tracks.get(id))
    }

    /// Geographic bounds covering every track (initial camera framing).
    pub fn fit_all_bounds(&self) -> Option<GeoBounds> {
        let mut all: Option<GeoBounds> = None;
        for track in self.tracks.values() {
            if let Some(bounds) = track.geo_bounds {
                match &mut all {
                    Some(acc) => acc.extend(&bounds),
                    None => all = Some(bounds),
                }
            }
        }
        all
    }

    // ========================================================================
    // View
    // ========================================================================

    /// Reset the projection's reference zoom (map view reset).
    ///
    /// This is the one event that invalidates every projected cache;
    /// ordinary pans never reproject.
    pub fn reset_view(&mut self, reference_zoom: f64) {
        self.projection = WebMercator::new(reference_zoom);
        for track in self.tracks.values_mut() {
            track.invalidate_projection();
        }
        self.projections_dirty = true;
        self.compositor.mark_zoom_dirty();
    }

    /// Update the viewport (pan, zoom or resize).
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if viewport == self.viewport {
            return;
        }
        let zoom_changed = viewport.zoom != self.viewport.zoom;
        let panned = viewport.origin != self.viewport.origin;

        if viewport.width != self.viewport.width || viewport.height != self.viewport.height {
            self.compositor.resize(viewport.width, viewport.height);
        }
        self.viewport = viewport;

        if zoom_changed {
            // Stroke widths are screen-pixel constants: everything restrokes
            self.compositor.mark_zoom_dirty();
        } else if panned {
            // Translation shifts every layer's content on screen
            self.compositor.mark_tracks_dirty();
            self.compositor.mark_hover_dirty();
            self.compositor.mark_selection_dirty();
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Gesture guard: pointer moves during a pan/zoom are ignored, exactly
    /// like hover handling in the source viewer.
    pub fn begin_view_gesture(&mut self) {
        self.view_gesture_in_progress = true;
    }

    pub fn end_view_gesture(&mut self) {
        self.view_gesture_in_progress = false;
    }

    // ========================================================================
    // Pointer / Table Events
    // ========================================================================

    /// Pointer moved to `screen` (viewport-relative pixels). Recomputes the
    /// hovered set from a hit-test over the visible tracks and returns it.
    pub fn pointer_move(&mut self, screen: PixelPoint) -> Vec<TrackId> {
        if self.view_gesture_in_progress {
            return self.state.hovered().iter().copied().collect();
        }
        self.ensure_projections();
        self.ensure_visible();

        let query = PixelPoint::new(
            screen.x + self.viewport.origin.x,
            screen.y + self.viewport.origin.y,
        );
        let visible_tracks: Vec<&Track> = self
            .visible
            .iter()
            .filter_map(|id| self.tracks.get(id))
            .collect();
        let hits = hits_at(
            visible_tracks,
            query,
            HIT_TOLERANCE_PX,
            self.viewport.zoom,
            &self.projection,
        );

        let changes = self.state.set_map_hover(&hits);
        self.apply_state_changes(changes);
        hits
    }

    /// Map click over whatever is currently hovered.
    pub fn click(
        &mut self,
        camera: &mut dyn MapCamera,
        scroll: &mut dyn TableScroll,
    ) -> ClickOutcome {
        let hits: Vec<TrackId> = self.state.hovered().iter().copied().collect();
        let (outcome, changes) = self.state.click(&hits);
        self.apply_state_changes(changes);
        self.fire_selection_side_effects(outcome, camera, scroll);
        outcome
    }

    /// Table row hover replaces the whole hover set.
    pub fn table_hover(&mut self, id: Option<TrackId>) {
        let changes = self.state.set_table_hover(id);
        self.apply_state_changes(changes);
    }

    /// Table row click toggles the selection.
    pub fn table_click(
        &mut self,
        id: TrackId,
        camera: &mut dyn MapCamera,
        scroll: &mut dyn TableScroll,
    ) -> ClickOutcome {
        let (outcome, changes) = self.state.toggle_selected(id);
        self.apply_state_changes(changes);
        self.fire_selection_side_effects(outcome, camera, scroll);
        outcome
    }

    /// Install a new table filter/sort contract.
    pub fn set_table_query(&mut self, query: TableQuery) {
        self.query = query;
        self.apply_visibility_change();
    }

    // ========================================================================
    // State Accessors
    // ========================================================================

    pub fn hovered(&self) -> &BTreeSet<TrackId> {
        self.state.hovered()
    }

    pub fn multiselected(&self) -> &BTreeSet<TrackId> {
        self.state.multiselected()
    }

    pub fn selected(&self) -> Option<TrackId> {
        self.state.selected()
    }

    /// Current visible ids, already filtered/sorted (or pinned to the
    /// multiselect set).
    pub fn visible_ids(&mut self) -> Vec<TrackId> {
        self.ensure_visible();
        self.visible.clone()
    }

    pub fn stats(&self) -> AtlasStats {
        AtlasStats {
            track_count: self.tracks.len(),
            with_geometry: self.tracks.values().filter(|t| t.has_map()).count(),
            visible_count: self.visible.len(),
            hovered_count: self.state.hovered().len(),
            has_selection: self.state.selected().is_some(),
            redraw_count: self.compositor.redraw_count(),
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Animation-frame entry point: redraw dirty layers at most once.
    pub fn render_frame(&mut self) -> bool {
        self.ensure_projections();
        self.ensure_visible();
        let visible_tracks: Vec<&Track> = self
            .visible
            .iter()
            .filter_map(|id| self.tracks.get(id))
            .collect();
        self.compositor.render_frame(
            &visible_tracks,
            &self.state,
            &self.viewport,
            &self.projection,
        )
    }

    /// Composed RGBA output frame.
    pub fn frame(&self) -> &[[u8; 4]] {
        self.compositor.frame()
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    // ========================================================================
    // Viewport Queries
    // ========================================================================

    /// Ids of tracks whose geographic bounds intersect the current view.
    pub fn tracks_in_view(&mut self) -> Vec<TrackId> {
        self.ensure_spatial_index();

        let scale = self.projection.scale(self.viewport.zoom);
        let top_left = self.projection.unproject(&PixelPoint::new(
            self.viewport.origin.x / scale,
            self.viewport.origin.y / scale,
        ));
        let bottom_right = self.projection.unproject(&PixelPoint::new(
            (self.viewport.origin.x + self.viewport.width as f64) / scale,
            (self.viewport.origin.y + self.viewport.height as f64) / scale,
        ));

        // y grows southward in pixel space
        let search = AABB::from_corners(
            [top_left.longitude, bottom_right.latitude],
            [bottom_right.longitude, top_left.latitude],
        );
        self.spatial_index
            .locate_in_envelope_intersecting(&search)
            .map(|entry| entry.track_id)
            .collect()
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Start a sync run. Any in-flight run is superseded: its accumulated
    /// partial state is discarded and its future callbacks ignored.
    pub fn begin_sync(&mut self) -> SyncGeneration {
        self.next_sync_generation += 1;
        let generation = self.next_sync_generation;
        if self.active_sync.is_some() {
            info!(
                "[TrackAtlas] Sync #{} supersedes in-flight sync",
                generation
            );
        }
        self.active_sync = Some(generation);
        self.sync_progress.clear();
        SyncGeneration(generation)
    }

    /// Per-page progress callback. Returns `false` when the generation is
    /// stale and the update was discarded.
    pub fn sync_progress(
        &mut self,
        generation: SyncGeneration,
        accumulated: Vec<ActivitySummary>,
    ) -> bool {
        if self.active_sync != Some(generation.0) {
            debug!("[TrackAtlas] Discarding stale sync progress");
            return false;
        }
        self.sync_progress = accumulated;
        true
    }

    /// Number of records the in-flight sync has reported so far.
    pub fn sync_progress_count(&self) -> Option<usize> {
        self.active_sync.map(|_| self.sync_progress.len())
    }

    /// Commit a finished sync. Stale generations are discarded.
    pub fn finish_sync(
        &mut self,
        generation: SyncGeneration,
        records: Vec<ActivitySummary>,
    ) -> bool {
        if self.active_sync != Some(generation.0) {
            warn!("[TrackAtlas] Discarding stale sync result");
            return false;
        }
        self.active_sync = None;
        self.sync_progress.clear();
        self.load_activities(records);
        true
    }

    /// Abandon an in-flight sync after a fetch failure. Data already
    /// committed by earlier generations stays untouched.
    pub fn abort_sync(&mut self, generation: SyncGeneration) {
        if self.active_sync == Some(generation.0) {
            self.active_sync = None;
            self.sync_progress.clear();
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn apply_state_changes(&mut self, changes: StateChanges) {
        if changes.hover {
            self.compositor.mark_hover_dirty();
        }
        if changes.selection {
            self.compositor.mark_selection_dirty();
        }
        if changes.visibility {
            self.apply_visibility_change();
        }
    }

    /// Recompute the visible set and prune hover/selection to it.
    fn apply_visibility_change(&mut self) {
        self.visible_dirty = true;
        self.ensure_visible();
        self.compositor.mark_tracks_dirty();

        let visible: BTreeSet<TrackId> = self.visible.iter().copied().collect();
        let pruned = self.state.prune_to_visible(&visible);
        if pruned.hover {
            self.compositor.mark_hover_dirty();
        }
        if pruned.selection {
            self.compositor.mark_selection_dirty();
        }
    }

    fn ensure_visible(&mut self) {
        if !self.visible_dirty {
            return;
        }
        let tracks: Vec<&Track> = self.order.iter().filter_map(|id| self.tracks.get(id)).collect();
        self.visible =
            crate::state::derive_visible(tracks, &self.query, self.state.multiselected());
        self.visible_dirty = false;
    }

    fn ensure_projections(&mut self) {
        if !self.projections_dirty {
            return;
        }
        let projection = self.projection;
        for track in self.tracks.values_mut() {
            track.apply_projection(&projection);
        }
        self.projections_dirty = false;
    }

    fn ensure_spatial_index(&mut self) {
        if !self.spatial_dirty {
            return;
        }
        let entries: Vec<TrackBoundsEntry> = self
            .tracks
            .values()
            .filter_map(|t| {
                t.geo_bounds.map(|bounds| TrackBoundsEntry {
                    track_id: t.id,
                    bounds,
                })
            })
            .collect();
        self.spatial_index = RTree::bulk_load(entries);
        self.spatial_dirty = false;
    }

    fn fire_selection_side_effects(
        &mut self,
        outcome: ClickOutcome,
        camera: &mut dyn MapCamera,
        scroll: &mut dyn TableScroll,
    ) {
        if let ClickOutcome::Selected(id) = outcome {
            if let Some(bounds) = self.tracks.get(&id).and_then(|t| t.geo_bounds) {
                camera.fit_bounds(&bounds);
            }
            if !scroll.row_fully_visible(id) {
                scroll.scroll_to_row(id);
            }
        }
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global engine instance.
///
/// One page session has exactly one source of truth; host glue reaches it
/// through this handle instead of threading the engine everywhere.
pub static ATLAS: Lazy<Mutex<TrackAtlas>> = Lazy::new(|| Mutex::new(TrackAtlas::new(1024, 768)));

/// Get a lock on the global engine.
pub fn with_atlas<F, R>(f: F) -> R
where
    F: FnOnce(&mut TrackAtlas) -> R,
{
    let mut atlas = ATLAS.lock().unwrap();
    f(&mut atlas)
}

// ============================================================================
// Tests
// ============================================================================
