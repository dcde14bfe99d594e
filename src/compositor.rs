//! Layered track compositor with coalesced, dirty-flag-scheduled redraws.
//!
//! Three layers, bottom to top:
//! 1. density: every visible track stroked at a low per-track alpha, with
//!    the accumulated overlap pushed through a colormap so well-trodden
//!    paths read as hot colors and rare paths as cool ones
//! 2. hover highlight: dark outer + bright inner stroke per hovered track
//! 3. selection highlight: the same two-stroke style for the selected
//!    track, at higher opacity than hover
//!
//! State changes set independent dirty flags; any number of changes within
//! one frame coalesce into a single redraw, and only the layers whose flags
//! are set get recleared. A zoom change invalidates all layers because
//! stroke widths are defined in screen pixels and must be recomputed from
//! the scale factor.

use log::debug;

use crate::projection::Projection;
use crate::state::SelectionState;
use crate::track::Track;
use crate::PixelPoint;

/// RGBA pixel, straight (non-premultiplied) alpha.
pub type Rgba = [u8; 4];

/// Rendering configuration. Stroke widths are screen pixels at any zoom.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Number of overlapping tracks at which the density colormap saturates
    pub saturation_track_count: u32,
    /// Width of one track's density stroke
    pub track_width_px: f64,
    /// Outer (dark) stroke width of hover/selection outlines
    pub outline_outer_width_px: f64,
    /// Inner (bright) stroke width of hover/selection outlines
    pub outline_inner_width_px: f64,
    /// Outline colors, 0xRRGGBB
    pub outline_dark_color: u32,
    pub hover_inner_color: u32,
    pub selected_inner_color: u32,
    /// Hover outline opacity; selection renders fully opaque above it
    pub hover_alpha: f32,
    /// Density-layer opacity while a track is selected (background dimming)
    pub dimmed_density_alpha: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            saturation_track_count: 5,
            track_width_px: 4.0,
            outline_outer_width_px: 9.0,
            outline_inner_width_px: 4.0,
            outline_dark_color: 0x000000,
            hover_inner_color: 0xEEEE00,
            selected_inner_color: 0x00EE00,
            hover_alpha: 0.8,
            dimmed_density_alpha: 0.5,
        }
    }
}

/// Current view of the map: viewport size in screen pixels, the world-pixel
/// coordinate (at the display zoom) of the top-left corner, and the display
/// zoom itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub origin: PixelPoint,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(width: u32, height: u32, origin: PixelPoint, zoom: f64) -> Self {
        Self {
            width,
            height,
            origin,
            zoom,
        }
    }

    /// Screen position of a reference-zoom point under `scale`.
    fn to_screen(&self, reference: &PixelPoint, scale: f64) -> PixelPoint {
        PixelPoint::new(
            reference.x * scale - self.origin.x,
            reference.y * scale - self.origin.y,
        )
    }

    /// Reference-zoom position of a screen pixel center under `scale`.
    fn to_reference(&self, px: u32, py: u32, scale: f64) -> PixelPoint {
        PixelPoint::new(
            (px as f64 + 0.5 + self.origin.x) / scale,
            (py as f64 + 0.5 + self.origin.y) / scale,
        )
    }
}

/// Independent per-layer invalidation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub tracks: bool,
    pub hover: bool,
    pub selection: bool,
    pub zoom: bool,
}

impl DirtyFlags {
    pub fn any(&self) -> bool {
        self.tracks || self.hover || self.selection || self.zoom
    }
}

/// The layered compositor.
///
/// Owns one RGBA buffer per layer plus a composed output frame. Redraws
/// happen only inside [`Compositor::render_frame`], which the host calls
/// once per animation frame; marking flags in between is cheap and
/// idempotent.
pub struct Compositor {
    config: RenderConfig,
    width: u32,
    height: u32,

    density: Vec<Rgba>,
    hover: Vec<Rgba>,
    selection: Vec<Rgba>,
    frame: Vec<Rgba>,

    // Per-track coverage scratch and per-pixel overlap counts
    coverage_scratch: Vec<bool>,
    overlap_counts: Vec<u16>,

    dirty: DirtyFlags,
    /// Flags as observed at the start of the most recent redraw
    last_draw_flags: DirtyFlags,
    redraw_count: u64,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_config(width, height, RenderConfig::default())
    }

    pub fn with_config(width: u32, height: u32, config: RenderConfig) -> Self {
        let len = (width as usize) * (height as usize);
        Self {
            config,
            width,
            height,
            density: vec![[0; 4]; len],
            hover: vec![[0; 4]; len],
            selection: vec![[0; 4]; len],
            frame: vec![[0; 4]; len],
            coverage_scratch: vec![false; len],
            overlap_counts: vec![0; len],
            dirty: DirtyFlags {
                tracks: true,
                hover: true,
                selection: true,
                zoom: true,
            },
            last_draw_flags: DirtyFlags::default(),
            redraw_count: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Composed output frame, row-major RGBA.
    pub fn frame(&self) -> &[Rgba] {
        &self.frame
    }

    /// Number of redraws performed since construction.
    pub fn redraw_count(&self) -> u64 {
        self.redraw_count
    }

    /// Flags observed at the start of the most recent redraw.
    pub fn last_draw_flags(&self) -> DirtyFlags {
        self.last_draw_flags
    }

    pub fn needs_redraw(&self) -> bool {
        self.dirty.any()
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    pub fn mark_tracks_dirty(&mut self) {
        self.dirty.tracks = true;
    }

    pub fn mark_hover_dirty(&mut self) {
        self.dirty.hover = true;
    }

    pub fn mark_selection_dirty(&mut self) {
        self.dirty.selection = true;
    }

    /// Zoom changed: stroke widths are screen-pixel constants, so every
    /// layer must be restroked from the new scale factor.
    pub fn mark_zoom_dirty(&mut self) {
        self.dirty.zoom = true;
    }

    /// Resize the output buffers, invalidating everything.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        let len = (width as usize) * (height as usize);
        self.width = width;
        self.height = height;
        self.density = vec![[0; 4]; len];
        self.hover = vec![[0; 4]; len];
        self.selection = vec![[0; 4]; len];
        self.frame = vec![[0; 4]; len];
        self.coverage_scratch = vec![false; len];
        self.overlap_counts = vec![0; len];
        self.mark_tracks_dirty();
        self.mark_hover_dirty();
        self.mark_selection_dirty();
        self.mark_zoom_dirty();
    }

    // ========================================================================
    // Redraw
    // ========================================================================

    /// Redraw dirty layers and recompose, at most once per call.
    ///
    /// Returns `false` without touching any buffer when no flag is set.
    /// `visible` must already be restricted to the visible set; hover and
    /// selection ids are read from `state`.
    pub fn render_frame<P: Projection + ?Sized>(
        &mut self,
        visible: &[&Track],
        state: &SelectionState,
        viewport: &Viewport,
        projection: &P,
    ) -> bool {
        if !self.dirty.any() {
            return false;
        }
        let flags = self.dirty;
        self.last_draw_flags = flags;
        self.dirty = DirtyFlags::default();

        let scale = projection.scale(viewport.zoom);
        let zoom_changed = flags.zoom;

        if flags.tracks || zoom_changed {
            self.draw_density(visible, state, viewport, scale);
        }
        if flags.hover || zoom_changed {
            self.draw_hover(visible, state, viewport, scale);
        }
        if flags.selection || zoom_changed {
            self.draw_selection(visible, state, viewport, scale);
            // Selection also controls density dimming
            if !flags.tracks && !zoom_changed {
                self.draw_density(visible, state, viewport, scale);
            }
        }

        self.compose();
        self.redraw_count += 1;
        debug!(
            "[Compositor] redraw #{} (tracks={} hover={} selection={} zoom={})",
            self.redraw_count, flags.tracks, flags.hover, flags.selection, flags.zoom
        );
        true
    }

    /// Stroke every visible track at the per-track alpha, count overlaps,
    /// then map accumulated opacity through the density colormap.
    fn draw_density(
        &mut self,
        visible: &[&Track],
        state: &SelectionState,
        viewport: &Viewport,
        scale: f64,
    ) {
        self.overlap_counts.iter_mut().for_each(|c| *c = 0);
        let half_width_ref = self.config.track_width_px / 2.0 / scale;

        for track in visible {
            let Some(projected) = track.projected.as_ref() else {
                continue;
            };
            // One coverage bit per track so self-overlapping segments of a
            // single track count once, as alpha compositing would.
            self.coverage_scratch.iter_mut().for_each(|c| *c = false);
            let mut touched = false;
            for w in projected.points.windows(2) {
                touched |= stroke_segment(
                    &mut self.coverage_scratch,
                    self.width,
                    self.height,
                    &w[0],
                    &w[1],
                    half_width_ref,
                    viewport,
                    scale,
                );
            }
            if touched {
                for (count, covered) in
                    self.overlap_counts.iter_mut().zip(&self.coverage_scratch)
                {
                    if *covered {
                        *count = count.saturating_add(1);
                    }
                }
            }
        }

        let each_alpha = 1.0 / self.config.saturation_track_count as f32;
        let layer_alpha = if state.selected().is_some() {
            self.config.dimmed_density_alpha
        } else {
            1.0
        };

        for (pixel, &count) in self.density.iter_mut().zip(&self.overlap_counts) {
            if count == 0 {
                *pixel = [0; 4];
                continue;
            }
            // Accumulated alpha of `count` strokes at each_alpha
            let acc = 1.0 - (1.0 - each_alpha).powi(count as i32);
            let val = if each_alpha < 1.0 {
                (acc - each_alpha) / (1.0 - each_alpha)
            } else {
                acc
            };
            let [r, g, b] = density_colormap(0.75 * val.clamp(0.0, 1.0));
            let alpha = (acc / each_alpha).clamp(0.0, 1.0) * layer_alpha;
            *pixel = [r, g, b, (alpha * 255.0).round() as u8];
        }
    }

    fn draw_hover(
        &mut self,
        visible: &[&Track],
        state: &SelectionState,
        viewport: &Viewport,
        scale: f64,
    ) {
        let hovered: Vec<&Track> = visible
            .iter()
            .copied()
            .filter(|t| state.hovered().contains(&t.id))
            .collect();
        let dark = self.config.outline_dark_color;
        let bright = self.config.hover_inner_color;
        let alpha = self.config.hover_alpha;
        self.draw_outline_layer(Layer::Hover, &hovered, dark, bright, alpha, viewport, scale);
    }

    fn draw_selection(
        &mut self,
        visible: &[&Track],
        state: &SelectionState,
        viewport: &Viewport,
        scale: f64,
    ) {
        let selected: Vec<&Track> = visible
            .iter()
            .copied()
            .filter(|t| Some(t.id) == state.selected())
            .collect();
        let dark = self.config.outline_dark_color;
        let bright = self.config.selected_inner_color;
        self.draw_outline_layer(Layer::Selection, &selected, dark, bright, 1.0, viewport, scale);
    }

    /// Two-stroke outline: wide dark pass under a narrow bright pass.
    fn draw_outline_layer(
        &mut self,
        layer: Layer,
        tracks: &[&Track],
        dark_color: u32,
        bright_color: u32,
        alpha: f32,
        viewport: &Viewport,
        scale: f64,
    ) {
        let outer_half = self.config.outline_outer_width_px / 2.0 / scale;
        let inner_half = self.config.outline_inner_width_px / 2.0 / scale;
        let width = self.width;
        let height = self.height;
        let alpha_byte = (alpha * 255.0).round() as u8;
        let dark = unpack_rgb(dark_color);
        let bright = unpack_rgb(bright_color);

        // Collect strokes first; painting borrows the layer buffer mutably.
        let mut passes: Vec<(Vec<bool>, [u8; 3])> = Vec::new();
        for track in tracks {
            let Some(projected) = track.projected.as_ref() else {
                continue;
            };
            for (half, color) in [(outer_half, dark), (inner_half, bright)] {
                let mut mask = vec![false; (width as usize) * (height as usize)];
                for w in projected.points.windows(2) {
                    stroke_segment(&mut mask, width, height, &w[0], &w[1], half, viewport, scale);
                }
                passes.push((mask, color));
            }
        }

        let pixels = self.frame_pixels_mut(layer);
        pixels.iter_mut().for_each(|p| *p = [0; 4]);
        for (mask, [r, g, b]) in passes {
            for (pixel, covered) in pixels.iter_mut().zip(&mask) {
                if *covered {
                    *pixel = [r, g, b, alpha_byte];
                }
            }
        }
    }

    fn frame_pixels_mut(&mut self, layer: Layer) -> &mut Vec<Rgba> {
        match layer {
            Layer::Density => &mut self.density,
            Layer::Hover => &mut self.hover,
            Layer::Selection => &mut self.selection,
        }
    }

    /// Source-over composite density -> hover -> selection into the frame.
    fn compose(&mut self) {
        for i in 0..self.frame.len() {
            let mut out = [0u8, 0, 0, 0];
            for layer in [&self.density, &self.hover, &self.selection] {
                out = blend_over(out, layer[i]);
            }
            self.frame[i] = out;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Layer {
    Density,
    Hover,
    Selection,
}

/// Stroke one reference-space segment into a coverage mask.
///
/// Returns whether any pixel was touched. The distance test runs in
/// reference space with the pre-divided half width, matching the hit-test
/// arithmetic exactly.
fn stroke_segment(
    mask: &mut [bool],
    width: u32,
    height: u32,
    a: &PixelPoint,
    b: &PixelPoint,
    half_width_ref: f64,
    viewport: &Viewport,
    scale: f64,
) -> bool {
    let sa = viewport.to_screen(a, scale);
    let sb = viewport.to_screen(b, scale);
    let pad = half_width_ref * scale + 1.0;

    let min_x = (sa.x.min(sb.x) - pad).floor().max(0.0) as i64;
    let max_x = (sa.x.max(sb.x) + pad).ceil().min(width as f64 - 1.0) as i64;
    let min_y = (sa.y.min(sb.y) - pad).floor().max(0.0) as i64;
    let max_y = (sa.y.max(sb.y) + pad).ceil().min(height as f64 - 1.0) as i64;
    if min_x > max_x || min_y > max_y {
        return false;
    }

    let mut touched = false;
    for py in min_y..=max_y {
        for px in min_x..=max_x {
            let reference = viewport.to_reference(px as u32, py as u32, scale);
            let dist = crate::hit_test::point_segment_distance(&reference, a, b);
            if dist <= half_width_ref {
                mask[(py as usize) * (width as usize) + (px as usize)] = true;
                touched = true;
            }
        }
    }
    touched
}

/// Density colormap: cool blue at low accumulation through green to hot
/// red/white as overlap saturates.
fn density_colormap(x: f32) -> [u8; 3] {
    let r = (8.0 / 3.0 * x).clamp(0.0, 1.0);
    let g = (8.0 / 3.0 * x - 1.0).clamp(0.0, 1.0);
    let b = (4.0 * x - 3.0).max(1.0 - 4.0 / 3.0 * x).clamp(0.0, 1.0);
    [
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ]
}

fn unpack_rgb(hex: u32) -> [u8; 3] {
    [
        ((hex >> 16) & 0xFF) as u8,
        ((hex >> 8) & 0xFF) as u8,
        (hex & 0xFF) as u8,
    ]
}

/// Straight-alpha source-over blend of `src` on top of `dst`.
fn blend_over(dst: Rgba, src: Rgba) -> Rgba {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return dst;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return [0; 4];
    }
    let blend = |s: u8, d: u8| -> u8 {
        let s = s as f32 / 255.0;
        let d = d as f32 / 255.0;
        (((s * sa + d * da * (1.0 - sa)) / out_a) * 255.0).round() as u8
    };
    [
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{ProjectedTrack, WebMercator};
    use crate::track::ActivitySummary;
    use crate::{PixelBounds, TrackId};

    fn projected_track(id: TrackId, points: Vec<PixelPoint>) -> Track {
        let mut track = Track::from_summary(ActivitySummary {
            id,
            name: format!("t{}", id),
            sport_type: "Ride".to_string(),
            start_date: 0,
            distance: 0.0,
            moving_time: 0,
            elapsed_time: 0,
            total_elevation_gain: 0.0,
            start_latlng: None,
            end_latlng: None,
            summary_polyline: None,
        });
        let bounds = PixelBounds::from_points(&points).unwrap();
        track.projected = Some(ProjectedTrack { points, bounds });
        track
    }

    fn viewport() -> Viewport {
        Viewport::new(64, 64, PixelPoint::new(0.0, 0.0), 0.0)
    }

    fn pixel_at(compositor: &Compositor, x: u32, y: u32) -> Rgba {
        compositor.frame()[(y as usize) * (compositor.width() as usize) + (x as usize)]
    }

    #[test]
    fn test_colormap_endpoints() {
        // x = 0 is pure blue, mid range turns green-ish, high x runs hot
        assert_eq!(density_colormap(0.0), [0, 0, 255]);
        let hot = density_colormap(0.75);
        assert_eq!(hot[0], 255);
        assert!(hot[1] > 200);
        let mid = density_colormap(0.4);
        assert!(mid[2] > 0 && mid[0] > 0);
    }

    #[test]
    fn test_redraw_coalescing() {
        let mut compositor = Compositor::new(64, 64);
        let state = SelectionState::new();
        let proj = WebMercator::new(0.0);

        // Flush the initial full-dirty state
        assert!(compositor.render_frame(&[], &state, &viewport(), &proj));
        let base = compositor.redraw_count();

        // Three state changes within one frame...
        compositor.mark_tracks_dirty();
        compositor.mark_hover_dirty();
        compositor.mark_zoom_dirty();
        assert!(compositor.needs_redraw());

        // ...coalesce into exactly one redraw, with all three flags
        // observed at draw time.
        assert!(compositor.render_frame(&[], &state, &viewport(), &proj));
        assert_eq!(compositor.redraw_count(), base + 1);
        let flags = compositor.last_draw_flags();
        assert!(flags.tracks && flags.hover && flags.zoom);

        // Nothing pending: the next frame is a no-op
        assert!(!compositor.render_frame(&[], &state, &viewport(), &proj));
        assert_eq!(compositor.redraw_count(), base + 1);
    }

    #[test]
    fn test_density_overlap_runs_hotter() {
        let mut compositor = Compositor::new(64, 64);
        let state = SelectionState::new();
        let proj = WebMercator::new(0.0);

        // Three tracks on one path, one lone track elsewhere
        let shared: Vec<Track> = (1..=3)
            .map(|id| {
                projected_track(
                    id,
                    vec![PixelPoint::new(4.0, 10.0), PixelPoint::new(60.0, 10.0)],
                )
            })
            .collect();
        let lone = projected_track(
            9,
            vec![PixelPoint::new(4.0, 40.0), PixelPoint::new(60.0, 40.0)],
        );
        let mut visible: Vec<&Track> = shared.iter().collect();
        visible.push(&lone);

        assert!(compositor.render_frame(&visible, &state, &viewport(), &proj));

        let busy = pixel_at(&compositor, 32, 10);
        let quiet = pixel_at(&compositor, 32, 40);
        assert!(busy[3] > 0 && quiet[3] > 0);
        // Single coverage maps to the cool (blue) end, triple coverage has
        // moved toward red.
        assert_eq!(quiet[2], 255);
        assert!(busy[0] > quiet[0]);

        // Off-path pixels stay transparent
        assert_eq!(pixel_at(&compositor, 32, 25)[3], 0);
    }

    #[test]
    fn test_hover_outline_drawn_only_when_hovered() {
        let mut compositor = Compositor::new(64, 64);
        let mut state = SelectionState::new();
        let proj = WebMercator::new(0.0);
        let track = projected_track(
            1,
            vec![PixelPoint::new(4.0, 20.0), PixelPoint::new(60.0, 20.0)],
        );
        let visible = [&track];

        compositor.render_frame(&visible, &state, &viewport(), &proj);
        let plain = pixel_at(&compositor, 32, 20);

        state.set_map_hover(&[1]);
        compositor.mark_hover_dirty();
        compositor.render_frame(&visible, &state, &viewport(), &proj);
        let hovered = pixel_at(&compositor, 32, 20);

        assert_ne!(plain, hovered);
        // The bright inner stroke is yellow: strong red+green, low blue
        assert!(hovered[0] > 150 && hovered[1] > 150 && hovered[2] < 100);
    }

    #[test]
    fn test_selection_dims_density() {
        let mut compositor = Compositor::new(64, 64);
        let mut state = SelectionState::new();
        let proj = WebMercator::new(0.0);
        let a = projected_track(
            1,
            vec![PixelPoint::new(4.0, 10.0), PixelPoint::new(60.0, 10.0)],
        );
        let b = projected_track(
            2,
            vec![PixelPoint::new(4.0, 40.0), PixelPoint::new(60.0, 40.0)],
        );
        let visible = [&a, &b];

        compositor.render_frame(&visible, &state, &viewport(), &proj);
        let before = pixel_at(&compositor, 32, 40);

        state.set_map_hover(&[1]);
        state.click(&[1]);
        compositor.mark_selection_dirty();
        compositor.render_frame(&visible, &state, &viewport(), &proj);
        let after = pixel_at(&compositor, 32, 40);

        // The unselected track's density pixel faded
        assert!(after[3] < before[3]);
    }

    #[test]
    fn test_zoom_invalidates_all_layers() {
        let mut compositor = Compositor::new(64, 64);
        let state = SelectionState::new();
        let proj = WebMercator::new(0.0);
        compositor.render_frame(&[], &state, &viewport(), &proj);

        compositor.mark_zoom_dirty();
        compositor.render_frame(&[], &state, &viewport(), &proj);
        let flags = compositor.last_draw_flags();
        assert!(flags.zoom);
        assert!(!flags.tracks && !flags.hover && !flags.selection);
    }
}
