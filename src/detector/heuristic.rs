use super::{DetectionError, Detector, PlateCandidate};
use crate::config::HeuristicSettings;
use crate::model::BoundingBox;
use image::{imageops, GrayImage};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::path::Path;

const NAME: &str = "contour_heuristic";
const FULL_SCORE_AREA: f32 = 5000.0;
const PREFERRED_ASPECT: (f32, f32) = (2.0, 6.0);

/// Last-resort plate locator based on edge geometry alone.
///
/// Finds connected regions of strong gradient and keeps those whose bounding box
/// has a plate-like area and aspect ratio. It locates plates but cannot read
/// them, so every candidate carries unknown plate text.
#[derive(Debug, Clone)]
pub struct HeuristicDetector {
    settings: HeuristicSettings,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    pixels: usize,
}

impl HeuristicDetector {
    pub fn new(settings: HeuristicSettings) -> Self {
        Self { settings }
    }

    pub fn locate(&self, gray: &GrayImage) -> Vec<PlateCandidate> {
        let (width, height) = gray.dimensions();
        if width < 3 || height < 3 {
            return Vec::new();
        }
        let blurred = if self.settings.blur_sigma > 0.0 {
            imageops::blur(gray, self.settings.blur_sigma)
        } else {
            gray.clone()
        };

        let edges = edge_map(&blurred, self.settings.edge_threshold);
        let mut candidates: Vec<PlateCandidate> =
            regions(&edges, width as usize, height as usize)
                .into_iter()
                .filter(|r| r.pixels >= self.settings.min_edge_pixels)
                .filter_map(|r| self.score(&r))
                .collect();

        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.settings.max_candidates);
        candidates
    }

    fn score(&self, region: &Region) -> Option<PlateCandidate> {
        let w = (region.max_x - region.min_x + 1) as f32;
        let h = (region.max_y - region.min_y + 1) as f32;
        let area = w * h;
        if area <= self.settings.min_area as f32 {
            return None;
        }
        let aspect = w / h;
        if aspect <= self.settings.min_aspect || aspect >= self.settings.max_aspect {
            return None;
        }

        let area_score = (area / FULL_SCORE_AREA).min(1.0);
        let aspect_score = if aspect > PREFERRED_ASPECT.0 && aspect < PREFERRED_ASPECT.1 {
            1.0
        } else {
            0.5
        };
        let confidence = ((area_score + aspect_score) / 2.0 * 100.0).round() / 100.0;

        Some(PlateCandidate {
            plate: None,
            confidence,
            bbox: BoundingBox::new(region.min_x as f32, region.min_y as f32, w, h),
        })
    }
}

impl Detector for HeuristicDetector {
    fn name(&self) -> &str {
        NAME
    }

    fn detect(&self, image: &Path) -> Result<Vec<PlateCandidate>, DetectionError> {
        let gray = image::open(image)?.to_luma8();
        Ok(self.locate(&gray))
    }
}

/// Sobel magnitude (|gx| + |gy|) thresholded into a boolean edge map.
fn edge_map(img: &GrayImage, threshold: u16) -> Vec<bool> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let raw = img.as_raw();
    let mut edges = vec![false; width * height];

    edges
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            if y == 0 || y + 1 >= height {
                return;
            }
            let px = |x: usize, y: usize| raw[y * width + x] as i32;
            for x in 1..width - 1 {
                let gx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
                let gy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                    - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));
                row[x] = (gx.abs() + gy.abs()) >= threshold as i32;
            }
        });

    edges
}

/// 8-connected components of edge pixels.
fn regions(edges: &[bool], width: usize, height: usize) -> Vec<Region> {
    let mut seen = vec![false; edges.len()];
    let mut found = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..edges.len() {
        if !edges[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut region = Region {
            min_x: start % width,
            min_y: start / width,
            max_x: start % width,
            max_y: start / width,
            pixels: 0,
        };

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % width, idx / width);
            region.pixels += 1;
            region.min_x = region.min_x.min(x);
            region.max_x = region.max_x.max(x);
            region.min_y = region.min_y.min(y);
            region.max_y = region.max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let n = ny * width + nx;
                    if edges[n] && !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }
        found.push(region);
    }

    found
}
