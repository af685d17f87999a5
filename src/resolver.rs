//! Text region resolution
//!
//! Reconciles each extraction's possibly missing or imprecise location with a
//! precise local bounding-box detector. Unresolvable extractions are a soft
//! failure: the item is skipped, its siblings proceed.

use anyhow::Result;
use image::RgbImage;
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::types::{BBox, DetectedBox, TextExtraction};

/// A local detector that returns precise text bounding boxes, optionally
/// scoped to a hint region.
pub trait BoxDetector: Send + Sync {
    fn detect_boxes(&self, image: &RgbImage, hint: Option<BBox>) -> Result<Vec<DetectedBox>>;
}

/// An extraction paired with its resolved precise bounding box.
#[derive(Debug, Clone)]
pub struct ResolvedRegion {
    /// Index into the caller's extraction list.
    pub extraction_index: usize,
    pub bbox: BBox,
    pub extraction: TextExtraction,
}

/// Outcome of resolving one call's extractions.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub regions: Vec<ResolvedRegion>,
    /// Extraction indices that could not be matched to a precise box.
    pub unresolved: Vec<usize>,
}

/// Resolve every extraction to a precise bounding box.
///
/// High-confidence extractions keep their own bbox. The rest consult the
/// detector: scoped to the approximate region when one exists (matched by
/// best IoU, tie-broken on detector confidence), otherwise assigned from the
/// full-image detection in descending confidence order, one box each.
pub fn resolve_regions(
    image: &RgbImage,
    extractions: &[TextExtraction],
    detector: &dyn BoxDetector,
    config: &ResolverConfig,
) -> ResolveOutcome {
    let (width, height) = image.dimensions();
    let mut outcome = ResolveOutcome::default();
    let mut deferred: Vec<usize> = Vec::new();

    for (index, extraction) in extractions.iter().enumerate() {
        let approx = extraction
            .bbox
            .and_then(|b| b.clamp_to(width, height));

        // Trusted locations bypass the detector entirely.
        if extraction.confidence >= config.trusted_confidence {
            if let Some(bbox) = approx {
                if bbox.is_valid(width, height, config.min_region_area) {
                    debug!(index, ?bbox, "using trusted provider bbox");
                    outcome.regions.push(ResolvedRegion {
                        extraction_index: index,
                        bbox,
                        extraction: extraction.clone(),
                    });
                    continue;
                }
            }
        }

        let Some(approx) = approx else {
            deferred.push(index);
            continue;
        };

        let hint = approx.dilate(config.hint_margin, width, height);
        let boxes = match detector.detect_boxes(image, Some(hint)) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!(index, error = %e, "box detector failed, extraction unresolved");
                outcome.unresolved.push(index);
                continue;
            }
        };

        match best_iou_match(&boxes, &approx, config.iou_threshold) {
            Some(matched) => {
                let Some(bbox) = matched.bbox.clamp_to(width, height) else {
                    outcome.unresolved.push(index);
                    continue;
                };
                if !bbox.is_valid(width, height, config.min_region_area) {
                    debug!(index, ?bbox, "matched box below minimum area");
                    outcome.unresolved.push(index);
                    continue;
                }
                outcome.regions.push(ResolvedRegion {
                    extraction_index: index,
                    bbox,
                    extraction: extraction.clone(),
                });
            }
            None => {
                debug!(index, "no detector box reached the IoU threshold");
                outcome.unresolved.push(index);
            }
        }
    }

    if !deferred.is_empty() {
        assign_deferred(image, extractions, detector, config, deferred, &mut outcome);
    }

    outcome
}

/// Assign extractions without any approximate location to unclaimed detector
/// boxes from a full-image pass, best detector confidence first.
fn assign_deferred(
    image: &RgbImage,
    extractions: &[TextExtraction],
    detector: &dyn BoxDetector,
    config: &ResolverConfig,
    deferred: Vec<usize>,
    outcome: &mut ResolveOutcome,
) {
    let (width, height) = image.dimensions();

    let mut boxes = match detector.detect_boxes(image, None) {
        Ok(boxes) => boxes,
        Err(e) => {
            warn!(error = %e, "full-image detection failed, deferred extractions unresolved");
            outcome.unresolved.extend(deferred);
            return;
        }
    };
    boxes.retain(|b| b.bbox.is_valid(width, height, config.min_region_area));
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    // Boxes overlapping an already-resolved region are considered claimed.
    let mut claimed: Vec<BBox> = outcome.regions.iter().map(|r| r.bbox).collect();

    for index in deferred {
        let next = boxes
            .iter()
            .position(|b| !claimed.iter().any(|c| c.overlaps(&b.bbox)));
        match next {
            Some(pos) => {
                let chosen = boxes.remove(pos);
                claimed.push(chosen.bbox);
                outcome.regions.push(ResolvedRegion {
                    extraction_index: index,
                    bbox: chosen.bbox,
                    extraction: extractions[index].clone(),
                });
            }
            None => {
                debug!(index, "no unclaimed detector box left");
                outcome.unresolved.push(index);
            }
        }
    }
}

/// Best IoU match at or above the threshold, tie-broken on confidence.
fn best_iou_match(boxes: &[DetectedBox], approx: &BBox, threshold: f32) -> Option<DetectedBox> {
    boxes
        .iter()
        .map(|b| (b, b.bbox.iou(approx)))
        .filter(|(_, iou)| *iou >= threshold)
        .max_by(|(a, ia), (b, ib)| {
            ia.total_cmp(ib)
                .then_with(|| a.confidence.total_cmp(&b.confidence))
        })
        .map(|(b, _)| *b)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector {
        boxes: Vec<DetectedBox>,
    }

    impl BoxDetector for FixedDetector {
        fn detect_boxes(&self, _image: &RgbImage, _hint: Option<BBox>) -> Result<Vec<DetectedBox>> {
            Ok(self.boxes.clone())
        }
    }

    fn extraction(confidence: f32, bbox: Option<BBox>) -> TextExtraction {
        TextExtraction {
            original: "Вход".into(),
            translated: "Entry".into(),
            confidence,
            bbox,
        }
    }

    fn blank_image() -> RgbImage {
        RgbImage::new(200, 200)
    }

    #[test]
    fn test_trusted_bbox_bypasses_detector() {
        let detector = FixedDetector { boxes: vec![] };
        let extractions = vec![extraction(0.95, Some(BBox::new(10, 10, 60, 30)))];

        let outcome = resolve_regions(
            &blank_image(),
            &extractions,
            &detector,
            &ResolverConfig::default(),
        );
        assert_eq!(outcome.regions.len(), 1);
        assert_eq!(outcome.regions[0].bbox, BBox::new(10, 10, 60, 30));
        assert!(outcome.unresolved.is_empty());
    }

    #[test]
    fn test_best_iou_wins() {
        let detector = FixedDetector {
            boxes: vec![
                DetectedBox {
                    bbox: BBox::new(100, 100, 140, 120),
                    confidence: 0.99,
                },
                DetectedBox {
                    bbox: BBox::new(12, 11, 58, 32),
                    confidence: 0.7,
                },
            ],
        };
        let extractions = vec![extraction(0.5, Some(BBox::new(10, 10, 60, 30)))];

        let outcome = resolve_regions(
            &blank_image(),
            &extractions,
            &detector,
            &ResolverConfig::default(),
        );
        assert_eq!(outcome.regions.len(), 1);
        assert_eq!(outcome.regions[0].bbox, BBox::new(12, 11, 58, 32));
    }

    #[test]
    fn test_below_iou_threshold_is_unresolved() {
        let detector = FixedDetector {
            boxes: vec![DetectedBox {
                bbox: BBox::new(150, 150, 190, 170),
                confidence: 0.99,
            }],
        };
        let extractions = vec![extraction(0.5, Some(BBox::new(10, 10, 60, 30)))];

        let outcome = resolve_regions(
            &blank_image(),
            &extractions,
            &detector,
            &ResolverConfig::default(),
        );
        assert!(outcome.regions.is_empty());
        assert_eq!(outcome.unresolved, vec![0]);
    }

    #[test]
    fn test_missing_bbox_assigned_by_confidence() {
        let detector = FixedDetector {
            boxes: vec![
                DetectedBox {
                    bbox: BBox::new(10, 10, 60, 30),
                    confidence: 0.6,
                },
                DetectedBox {
                    bbox: BBox::new(10, 60, 60, 80),
                    confidence: 0.9,
                },
            ],
        };
        let extractions = vec![extraction(0.5, None), extraction(0.5, None)];

        let outcome = resolve_regions(
            &blank_image(),
            &extractions,
            &detector,
            &ResolverConfig::default(),
        );
        assert_eq!(outcome.regions.len(), 2);
        // First deferred extraction takes the higher-confidence box.
        assert_eq!(outcome.regions[0].extraction_index, 0);
        assert_eq!(outcome.regions[0].bbox, BBox::new(10, 60, 60, 80));
        assert_eq!(outcome.regions[1].bbox, BBox::new(10, 10, 60, 30));
    }

    #[test]
    fn test_more_extractions_than_boxes() {
        let detector = FixedDetector {
            boxes: vec![DetectedBox {
                bbox: BBox::new(10, 10, 60, 30),
                confidence: 0.9,
            }],
        };
        let extractions = vec![extraction(0.5, None), extraction(0.5, None)];

        let outcome = resolve_regions(
            &blank_image(),
            &extractions,
            &detector,
            &ResolverConfig::default(),
        );
        assert_eq!(outcome.regions.len(), 1);
        assert_eq!(outcome.unresolved, vec![1]);
    }
}
