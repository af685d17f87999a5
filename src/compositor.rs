//! Text compositing and artifact simulation
//!
//! Renders translated text with the matched style onto the reconstructed
//! background, then deliberately degrades the result so it blends into a
//! lossily-compressed source: a sub-pixel blur removes vector-crisp glyph
//! edges, seeded luminance noise reproduces sensor/compression texture, and
//! an optional lossy re-encode at the source's estimated quality restores
//! block-ringing artifacts. Only mask-covered pixels are ever written back.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{imageops, Rgba, RgbaImage, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::CompositeConfig;
use crate::error::EditError;
use crate::mask::EditMask;
use crate::style::{FontWeight, StyleProfile};
use crate::types::{content_seed, BBox, EditStatus};

/// System font fallback hierarchy; most chart text is sans-serif.
const REGULAR_FALLBACKS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/ubuntu/Ubuntu-R.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

const BOLD_FALLBACKS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/truetype/ubuntu/Ubuntu-B.ttf",
];

/// Font assets loaded once at process start; read-only afterwards, safe for
/// unsynchronized concurrent use.
pub struct FontStore {
    regular: FontVec,
    bold: Option<FontVec>,
}

impl FontStore {
    /// Load fonts from the system fallback hierarchy.
    pub fn load() -> Result<Self> {
        let regular = Self::first_available(REGULAR_FALLBACKS)
            .ok_or_else(|| anyhow!("no usable font found in fallback hierarchy"))?;
        let bold = Self::first_available(BOLD_FALLBACKS);
        debug!(bold = bold.is_some(), "font store loaded");
        Ok(Self { regular, bold })
    }

    /// Build from raw TTF bytes (embedded or caller-supplied fonts).
    pub fn from_bytes(regular: Vec<u8>, bold: Option<Vec<u8>>) -> Result<Self> {
        let regular = FontVec::try_from_vec(regular).context("invalid regular font data")?;
        let bold = match bold {
            Some(bytes) => Some(FontVec::try_from_vec(bytes).context("invalid bold font data")?),
            None => None,
        };
        Ok(Self { regular, bold })
    }

    fn first_available(paths: &[&str]) -> Option<FontVec> {
        for path in paths {
            if let Ok(bytes) = std::fs::read(path) {
                if let Ok(font) = FontVec::try_from_vec(bytes) {
                    return Some(font);
                }
            }
        }
        None
    }

    /// Face for the requested weight, falling back to regular.
    pub fn select(&self, weight: FontWeight) -> &FontVec {
        match weight {
            FontWeight::Bold => self.bold.as_ref().unwrap_or(&self.regular),
            FontWeight::Normal => &self.regular,
        }
    }
}

/// Overlapping dilated regions merged into one composite pass, so artifact
/// injection happens exactly once per connected area.
#[derive(Debug, Clone)]
pub struct CompositeGroup {
    /// Union rectangle of the member boxes.
    pub bounds: BBox,
    /// Indices into the caller's region list.
    pub members: Vec<usize>,
}

/// Group dilated boxes by overlap (connected components of the overlap
/// graph).
pub fn merge_overlapping(dilated: &[BBox]) -> Vec<CompositeGroup> {
    let mut groups: Vec<CompositeGroup> = Vec::new();

    for (index, bbox) in dilated.iter().enumerate() {
        let mut bbox = *bbox;
        let mut members = vec![index];

        // Absorb every group this box touches; repeat until stable since the
        // union rectangle can grow into further groups.
        loop {
            let Some(pos) = groups.iter().position(|g| g.bounds.overlaps(&bbox)) else {
                break;
            };
            let g = groups.remove(pos);
            bbox = bbox.union_rect(&g.bounds);
            members.extend(g.members);
        }

        members.sort_unstable();
        groups.push(CompositeGroup { bounds: bbox, members });
    }

    groups.sort_by_key(|g| (g.bounds.y1, g.bounds.x1));
    groups
}

/// One region's inputs for compositing.
#[derive(Debug, Clone)]
pub struct RegionRender {
    /// Index into the caller's extraction list (for status reporting).
    pub extraction_index: usize,
    /// Undilated text box; the render origin.
    pub bbox: BBox,
    pub style: StyleProfile,
    pub text: String,
}

/// Composite all members of one group onto the reconstructed background.
///
/// Returns (extraction_index, status) per member. Never fails: text that
/// cannot fit is truncated with an explicit ellipsis and reported as such.
pub fn composite_group(
    image: &mut RgbImage,
    mask: &EditMask,
    group: &CompositeGroup,
    renders: &[RegionRender],
    fonts: &FontStore,
    quality: f32,
    config: &CompositeConfig,
) -> Vec<(usize, EditStatus)> {
    let bounds = group.bounds;
    let mut patch = imageops::crop_imm(image, bounds.x1, bounds.y1, bounds.width(), bounds.height())
        .to_image();
    let mut overlay = RgbaImage::new(patch.width(), patch.height());
    let mut statuses = Vec::with_capacity(group.members.len());

    // Seed from image content plus everything rendered here, so identical
    // inputs reproduce identical noise.
    let mut salt = format!("{},{},{},{}", bounds.x1, bounds.y1, bounds.x2, bounds.y2).into_bytes();
    for &m in &group.members {
        salt.extend_from_slice(renders[m].text.as_bytes());
    }
    let seed = content_seed(image, &salt);

    for &m in &group.members {
        let render = &renders[m];
        let font = fonts.select(render.style.weight);
        let max_width = render.bbox.width();

        let (text, px, truncated) = match shrink_to_fit(
            &render.text,
            max_width,
            render.style.font_px,
            config.min_font_px,
            font,
        ) {
            Ok(px) => (render.text.clone(), px, false),
            // Only TextOverflow comes back from shrink_to_fit.
            Err(_) => {
                let (text, px) = truncate_with_ellipsis(&render.text, max_width, config.min_font_px, font);
                warn!(
                    original = %render.text,
                    rendered = %text,
                    "text too wide at minimum size, truncated"
                );
                (text, px, true)
            }
        };

        let scale = PxScale::from(px);
        let (_, th) = text_size(scale, font, &text);
        let x_rel = (render.bbox.x1 - bounds.x1) as i32;
        let region_h = render.bbox.height();
        let y_rel = (render.bbox.y1 - bounds.y1) as i32 + (region_h.saturating_sub(th) / 2) as i32;

        let c = render.style.color.0;
        draw_text_mut(
            &mut overlay,
            Rgba([c[0], c[1], c[2], 255]),
            x_rel,
            y_rel,
            scale,
            font,
            &text,
        );

        statuses.push((
            render.extraction_index,
            if truncated {
                EditStatus::Truncated
            } else {
                EditStatus::Applied
            },
        ));
    }

    // Soften vector-crisp glyph edges before blending.
    if config.blur_sigma > 0.0 {
        overlay = gaussian_blur_f32(&overlay, config.blur_sigma);
    }
    alpha_composite(&mut patch, &overlay);

    inject_luminance_noise(&mut patch, mask, &bounds, image, seed, config.noise_opacity);

    if config.simulate_compression {
        match jpeg_roundtrip(&patch, quality) {
            Ok(rehearsed) => patch = rehearsed,
            Err(e) => warn!(error = %e, "lossy re-encode failed, compositing without it"),
        }
    }

    // Only mask-covered pixels are written back: grid protection bands and
    // anything outside the dilated union stay byte-identical.
    for y in 0..patch.height() {
        for x in 0..patch.width() {
            let (ax, ay) = (bounds.x1 + x, bounds.y1 + y);
            if mask.is_set(ax, ay) {
                image.put_pixel(ax, ay, *patch.get_pixel(x, y));
            }
        }
    }

    statuses
}

/// Find the largest size at or below `start_px` where the text fits.
fn shrink_to_fit(
    text: &str,
    max_width: u32,
    start_px: f32,
    min_px: f32,
    font: &FontVec,
) -> Result<f32, EditError> {
    let mut px = start_px.max(min_px);
    loop {
        let (w, _) = text_size(PxScale::from(px), font, text);
        if w <= max_width {
            return Ok(px);
        }
        if px <= min_px {
            return Err(EditError::TextOverflow);
        }
        px = (px - 1.0).max(min_px);
    }
}

/// Drop trailing characters and append an explicit ellipsis until the text
/// fits at the minimum size. Content is never dropped silently.
fn truncate_with_ellipsis(text: &str, max_width: u32, min_px: f32, font: &FontVec) -> (String, f32) {
    let mut chars: Vec<char> = text.chars().collect();
    while !chars.is_empty() {
        chars.pop();
        let candidate: String = chars.iter().collect::<String>() + "…";
        if shrink_to_fit(&candidate, max_width, min_px, min_px, font).is_ok() {
            return (candidate, min_px);
        }
    }
    // Nothing fits; render a clipped ellipsis rather than nothing.
    ("…".to_string(), min_px)
}

fn alpha_composite(patch: &mut RgbImage, overlay: &RgbaImage) {
    for y in 0..patch.height() {
        for x in 0..patch.width() {
            let fg = overlay.get_pixel(x, y).0;
            if fg[3] == 0 {
                continue;
            }
            let a = fg[3] as f32 / 255.0;
            let bg = patch.get_pixel_mut(x, y);
            for c in 0..3 {
                bg.0[c] = (fg[c] as f32 * a + bg.0[c] as f32 * (1.0 - a)).round() as u8;
            }
        }
    }
}

/// Add low-opacity luminance noise to editable patch pixels, with amplitude
/// scaled by the texture of an adjacent background strip. A flat background
/// contributes no texture, so it receives no noise.
fn inject_luminance_noise(
    patch: &mut RgbImage,
    mask: &EditMask,
    bounds: &BBox,
    image: &RgbImage,
    seed: u64,
    opacity: f32,
) {
    let sigma = adjacent_background_sigma(image, bounds);
    let amplitude = opacity * 2.0 * sigma;
    if amplitude < 0.05 {
        return;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for y in 0..patch.height() {
        for x in 0..patch.width() {
            if !mask.is_set(bounds.x1 + x, bounds.y1 + y) {
                continue;
            }
            let delta = rng.gen_range(-amplitude..=amplitude);
            let p = patch.get_pixel_mut(x, y);
            for c in 0..3 {
                p.0[c] = (p.0[c] as f32 + delta).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Luminance standard deviation of a strip just outside the group bounds.
fn adjacent_background_sigma(image: &RgbImage, bounds: &BBox) -> f32 {
    const STRIP: u32 = 6;
    let (width, height) = image.dimensions();

    let strip = if bounds.y1 >= STRIP {
        BBox::new(bounds.x1, bounds.y1 - STRIP, bounds.x2, bounds.y1)
    } else if bounds.y2 + STRIP <= height {
        BBox::new(bounds.x1, bounds.y2, bounds.x2, bounds.y2 + STRIP)
    } else if bounds.x1 >= STRIP {
        BBox::new(bounds.x1 - STRIP, bounds.y1, bounds.x1, bounds.y2)
    } else if bounds.x2 + STRIP <= width {
        BBox::new(bounds.x2, bounds.y1, bounds.x2 + STRIP, bounds.y2)
    } else {
        return 0.0;
    };

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0u64;
    for y in strip.y1..strip.y2 {
        for x in strip.x1..strip.x2 {
            let p = image.get_pixel(x, y).0;
            let l = 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64;
            sum += l;
            sum_sq += l * l;
            n += 1;
        }
    }
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    ((sum_sq / n as f64 - mean * mean).max(0.0)).sqrt() as f32
}

/// Re-encode the patch at the source's estimated quality to reproduce its
/// block-ringing artifacts.
fn jpeg_roundtrip(patch: &RgbImage, quality: f32) -> Result<RgbImage> {
    let q = quality.round().clamp(30.0, 95.0) as u8;
    let mut bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, q);
    encoder.encode_image(patch).context("jpeg encode failed")?;
    let decoded = image::load_from_memory(&bytes)
        .context("jpeg decode failed")?
        .to_rgb8();
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaskConfig;
    use crate::grid::GridModel;
    use crate::mask::build_edit_mask;
    use image::Rgb;

    fn test_fonts() -> Option<FontStore> {
        match FontStore::load() {
            Ok(fonts) => Some(fonts),
            Err(_) => {
                eprintln!("no system fonts installed, skipping rendering test");
                None
            }
        }
    }

    #[test]
    fn test_jpeg_roundtrip_reencodes() {
        let patch = RgbImage::from_fn(48, 32, |x, y| Rgb([(x * 5) as u8, (y * 7) as u8, 90]));
        let out = jpeg_roundtrip(&patch, 80.0).unwrap();
        assert_eq!(out.dimensions(), patch.dimensions());

        // Lossy but close on a smooth gradient.
        let p = patch.get_pixel(10, 10).0;
        let q = out.get_pixel(10, 10).0;
        for c in 0..3 {
            assert!(p[c].abs_diff(q[c]) < 40, "channel {c}: {p:?} vs {q:?}");
        }

        // Out-of-range quality estimates are clamped, not rejected.
        assert!(jpeg_roundtrip(&patch, 5.0).is_ok());
        assert!(jpeg_roundtrip(&patch, 400.0).is_ok());
    }

    #[test]
    fn test_merge_overlapping_groups() {
        let boxes = vec![
            BBox::new(10, 10, 50, 30),
            BBox::new(40, 15, 90, 35),
            BBox::new(200, 200, 240, 220),
        ];
        let groups = merge_overlapping(&boxes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec![0, 1]);
        assert_eq!(groups[0].bounds, BBox::new(10, 10, 90, 35));
        assert_eq!(groups[1].members, vec![2]);
    }

    #[test]
    fn test_chained_overlap_merges_transitively() {
        let boxes = vec![
            BBox::new(0, 0, 30, 20),
            BBox::new(50, 0, 80, 20),
            BBox::new(25, 0, 55, 20),
        ];
        let groups = merge_overlapping(&boxes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec![0, 1, 2]);
    }

    #[test]
    fn test_shrink_to_fit_and_truncate() {
        let Some(fonts) = test_fonts() else { return };
        let font = fonts.select(FontWeight::Normal);

        // Plenty of room: keeps the starting size.
        let px = shrink_to_fit("LONG", 500, 24.0, 4.0, font).unwrap();
        assert!((px - 24.0).abs() < 1e-3);

        // Tight: shrinks below the start.
        let px = shrink_to_fit("Take Profit 3", 60, 24.0, 4.0, font).unwrap();
        assert!(px < 24.0);

        // Impossible: overflows, then truncates with an ellipsis.
        let text = "Entry zone confirmed, leverage 20x isolated";
        assert!(matches!(
            shrink_to_fit(text, 18, 24.0, 4.0, font),
            Err(EditError::TextOverflow)
        ));
        let (truncated, px) = truncate_with_ellipsis(text, 18, 4.0, font);
        assert!(truncated.ends_with('…'));
        assert!(truncated.chars().count() < text.chars().count());
        assert!((px - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_composite_writes_only_masked_pixels() {
        let Some(fonts) = test_fonts() else { return };

        let bg = Rgb([18, 22, 30]);
        let mut image = RgbImage::from_pixel(300, 200, bg);
        let region = BBox::new(40, 40, 160, 80);
        let mask = build_edit_mask(300, 200, &[region], &GridModel::default(), &MaskConfig::default());
        let groups = merge_overlapping(&mask.dilated);
        assert_eq!(groups.len(), 1);

        let renders = vec![RegionRender {
            extraction_index: 0,
            bbox: region,
            style: StyleProfile {
                color: Rgb([230, 230, 230]),
                font_px: 24.0,
                weight: FontWeight::Normal,
            },
            text: "LONG".into(),
        }];

        let statuses = composite_group(
            &mut image,
            &mask,
            &groups[0],
            &renders,
            &fonts,
            90.0,
            &CompositeConfig::default(),
        );
        assert_eq!(statuses, vec![(0, EditStatus::Applied)]);

        let mut changed_inside = false;
        for y in 0..200 {
            for x in 0..300 {
                if *image.get_pixel(x, y) != bg {
                    changed_inside = true;
                    assert!(
                        mask.is_set(x, y),
                        "changed pixel ({x},{y}) outside the edit mask"
                    );
                }
            }
        }
        assert!(changed_inside, "compositing should have rendered glyphs");
    }

    #[test]
    fn test_composite_is_deterministic() {
        let Some(fonts) = test_fonts() else { return };

        let run = || {
            let mut image = RgbImage::from_fn(300, 200, |x, y| {
                Rgb([(x % 32) as u8 + 10, (y % 32) as u8 + 14, 30])
            });
            let region = BBox::new(40, 40, 160, 80);
            let mask =
                build_edit_mask(300, 200, &[region], &GridModel::default(), &MaskConfig::default());
            let groups = merge_overlapping(&mask.dilated);
            let renders = vec![RegionRender {
                extraction_index: 0,
                bbox: region,
                style: StyleProfile {
                    color: Rgb([230, 230, 230]),
                    font_px: 24.0,
                    weight: FontWeight::Normal,
                },
                text: "Entry".into(),
            }];
            composite_group(
                &mut image,
                &mask,
                &groups[0],
                &renders,
                &fonts,
                80.0,
                &CompositeConfig::default(),
            );
            image
        };

        assert_eq!(run().as_raw(), run().as_raw());
    }

    #[test]
    fn test_truncation_reports_status() {
        let Some(fonts) = test_fonts() else { return };

        let mut image = RgbImage::from_pixel(300, 200, Rgb([18, 22, 30]));
        // Scenario B geometry: 80px wide, 30px tall.
        let region = BBox::new(40, 40, 120, 70);
        let mask = build_edit_mask(300, 200, &[region], &GridModel::default(), &MaskConfig::default());
        let groups = merge_overlapping(&mask.dilated);

        let renders = vec![RegionRender {
            extraction_index: 0,
            bbox: region,
            style: StyleProfile {
                color: Rgb([230, 230, 230]),
                font_px: 24.0,
                weight: FontWeight::Normal,
            },
            // Far wider than 80px even at the 4px floor.
            text: "Signal active, entry confirmed at breakout retest level".into(),
        }];

        let statuses = composite_group(
            &mut image,
            &mask,
            &groups[0],
            &renders,
            &fonts,
            90.0,
            &CompositeConfig::default(),
        );
        assert_eq!(statuses, vec![(0, EditStatus::Truncated)]);
    }
}
