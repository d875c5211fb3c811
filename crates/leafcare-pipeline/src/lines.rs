//! Progressive probabilistic Hough transform for straight vein segments.
//!
//! Edge pixels vote one at a time into a (θ, ρ) accumulator. When a
//! cell reaches the vote threshold the detector walks the edge map in
//! both directions along that line, bridging gaps up to
//! `max_line_gap`. A long enough walk becomes a segment: its pixels are
//! removed from the edge set and their votes withdrawn, so a pixel
//! belongs to at most one segment.
//!
//! Voting order matters to the result. Pixels are visited in an order
//! fixed by a keyed hash of their coordinates, so the same edge map
//! always yields the same segments.

use std::f64::consts::PI;
use std::hash::Hasher;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::types::{PipelineError, ensure_range};

/// Fixed-point fraction bits used while walking a line.
const SHIFT: u32 = 16;

/// Hash keys for the pixel visiting order.
const ORDER_KEYS: (u64, u64) = (0x6c65_6166_6361_7265, 0x7665_696e_7365_6773);

/// Hough transform parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    /// Distance resolution of the accumulator in pixels.
    pub rho: f64,
    /// Angle resolution of the accumulator in degrees.
    pub theta_degrees: f64,
    /// Minimum votes for a line candidate.
    pub threshold: u32,
    /// Minimum segment extent along either axis, in pixels.
    pub min_line_length: u32,
    /// Maximum run of non-edge pixels bridged while walking.
    pub max_line_gap: u32,
}

impl HoughConfig {
    /// Check resolutions are positive and usable.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the bad field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        ensure_range("hough.rho", self.rho, 0.1, 100.0)?;
        ensure_range("hough.theta_degrees", self.theta_degrees, 0.05, 90.0)?;
        ensure_range("hough.threshold", f64::from(self.threshold), 1.0, 1e6)
    }
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            theta_degrees: 1.0,
            threshold: 50,
            min_line_length: 30,
            max_line_gap: 10,
        }
    }
}

/// A detected straight segment between two edge pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSegment {
    /// Column of the first endpoint.
    pub x1: u32,
    /// Row of the first endpoint.
    pub y1: u32,
    /// Column of the second endpoint.
    pub x2: u32,
    /// Row of the second endpoint.
    pub y2: u32,
}

impl LineSegment {
    /// Euclidean length in pixels.
    #[must_use]
    pub fn length(&self) -> f64 {
        (f64::from(self.x2) - f64::from(self.x1)).hypot(f64::from(self.y2) - f64::from(self.y1))
    }
}

/// Precomputed accumulator geometry.
struct Accumulator {
    /// `(cos θ / ρ, sin θ / ρ)` per angle bin.
    trig: Vec<(f64, f64)>,
    num_rho: usize,
    votes: Vec<i32>,
}

impl Accumulator {
    fn new(config: &HoughConfig, width: usize, height: usize) -> Self {
        let step = config.theta_degrees.to_radians();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let num_angle = ((PI / step).round() as usize).max(1);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let num_rho = ((((width + height) * 2 + 1) as f64 / config.rho).round() as usize).max(1);
        let inv_rho = 1.0 / config.rho;
        let trig = (0..num_angle)
            .map(|n| {
                #[allow(clippy::cast_precision_loss)]
                let (sin, cos) = (n as f64 * step).sin_cos();
                (cos * inv_rho, sin * inv_rho)
            })
            .collect();
        Self {
            trig,
            num_rho,
            votes: vec![0; num_angle * num_rho],
        }
    }

    /// Accumulator bin of pixel `(x, y)` for angle bin `n`.
    fn bin(&self, n: usize, x: i64, y: i64) -> Option<usize> {
        let (c, s) = self.trig[n];
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap
        )]
        let r = (x as f64).mul_add(c, y as f64 * s).round_ties_even() as i64;
        let r = usize::try_from(r + (self.num_rho as i64 - 1) / 2).ok()?;
        (r < self.num_rho).then_some(n * self.num_rho + r)
    }

    /// Add one vote per angle for `(x, y)`; return the strongest angle
    /// bin and its count.
    fn vote(&mut self, x: i64, y: i64) -> (usize, i32) {
        let mut best = (0, i32::MIN);
        for n in 0..self.trig.len() {
            if let Some(i) = self.bin(n, x, y) {
                self.votes[i] += 1;
                if self.votes[i] > best.1 {
                    best = (n, self.votes[i]);
                }
            }
        }
        best
    }

    fn unvote(&mut self, x: i64, y: i64) {
        for n in 0..self.trig.len() {
            if let Some(i) = self.bin(n, x, y) {
                self.votes[i] -= 1;
            }
        }
    }
}

/// Fixed-point walk setup for one line direction.
struct Walk {
    /// `true` when x advances by whole pixels and y is fixed point.
    x_major: bool,
    x0: i64,
    y0: i64,
    dx: i64,
    dy: i64,
}

impl Walk {
    #[allow(clippy::cast_possible_truncation)]
    fn new(x: i64, y: i64, cos: f64, sin: f64) -> Self {
        // Direction vector along the line whose normal is (cos, sin).
        let a = -sin;
        let b = cos;
        let one = f64::from(1_u32 << SHIFT);
        let half = 1_i64 << (SHIFT - 1);
        if a.abs() > b.abs() {
            Self {
                x_major: true,
                x0: x,
                y0: (y << SHIFT) + half,
                dx: if a > 0.0 { 1 } else { -1 },
                dy: (b * one / a.abs()).round_ties_even() as i64,
            }
        } else {
            Self {
                x_major: false,
                x0: (x << SHIFT) + half,
                y0: y,
                dx: (a * one / b.abs()).round_ties_even() as i64,
                dy: if b > 0.0 { 1 } else { -1 },
            }
        }
    }

    /// Pixel at fixed-point position `(x, y)`.
    const fn pixel(&self, x: i64, y: i64) -> (i64, i64) {
        if self.x_major {
            (x, y >> SHIFT)
        } else {
            (x >> SHIFT, y)
        }
    }

    /// Step for direction `k` (0 forward, 1 backward).
    const fn step(&self, k: usize) -> (i64, i64) {
        if k == 0 {
            (self.dx, self.dy)
        } else {
            (-self.dx, -self.dy)
        }
    }
}

/// Visiting order for edge pixels: ascending keyed hash of `(x, y)`.
fn visiting_order(points: &mut [(u32, u32)]) {
    points.sort_by_cached_key(|&(x, y)| {
        let mut hasher = SipHasher13::new_with_keys(ORDER_KEYS.0, ORDER_KEYS.1);
        hasher.write_u32(x);
        hasher.write_u32(y);
        (hasher.finish(), x, y)
    });
}

/// Detect straight segments on a binary edge map (non-zero = edge).
#[must_use = "returns the detected segments"]
pub fn detect_segments(edges: &GrayImage, config: &HoughConfig) -> Vec<LineSegment> {
    let (width, height) = edges.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let mut mask: Vec<bool> = edges.as_raw().iter().map(|&v| v > 0).collect();
    let mut points: Vec<(u32, u32)> = edges
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] > 0)
        .map(|(x, y, _)| (x, y))
        .collect();
    visiting_order(&mut points);

    let mut acc = Accumulator::new(config, w, h);
    let threshold = i32::try_from(config.threshold).unwrap_or(i32::MAX);
    let gap_limit = i64::from(config.max_line_gap);
    let min_length = i64::from(config.min_line_length);
    let (wi, hi) = (i64::from(width), i64::from(height));
    let index = |x: i64, y: i64| -> Option<usize> {
        (x >= 0 && x < wi && y >= 0 && y < hi).then(|| {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let i = y as usize * w + x as usize;
            i
        })
    };

    let mut segments = Vec::new();
    for (px, py) in points {
        let (x, y) = (i64::from(px), i64::from(py));
        if index(x, y).is_none_or(|i| !mask[i]) {
            continue;
        }
        let (best_angle, best_votes) = acc.vote(x, y);
        if best_votes < threshold {
            continue;
        }

        let (cos, sin) = acc.trig[best_angle];
        let walk = Walk::new(x, y, cos, sin);

        // Find the extent of the line in both directions.
        let mut ends = [(x, y); 2];
        for (k, end) in ends.iter_mut().enumerate() {
            let (dx, dy) = walk.step(k);
            let (mut fx, mut fy) = (walk.x0, walk.y0);
            let mut gap = 0;
            loop {
                let (cx, cy) = walk.pixel(fx, fy);
                let Some(i) = index(cx, cy) else { break };
                if mask[i] {
                    gap = 0;
                    *end = (cx, cy);
                } else {
                    gap += 1;
                    if gap > gap_limit {
                        break;
                    }
                }
                fx += dx;
                fy += dy;
            }
        }

        let good = (ends[1].0 - ends[0].0).abs() >= min_length
            || (ends[1].1 - ends[0].1).abs() >= min_length;

        // Consume the walked pixels; withdraw their votes if the line is kept.
        for (k, &end) in ends.iter().enumerate() {
            let (dx, dy) = walk.step(k);
            let (mut fx, mut fy) = (walk.x0, walk.y0);
            loop {
                let (cx, cy) = walk.pixel(fx, fy);
                let Some(i) = index(cx, cy) else { break };
                if mask[i] {
                    if good {
                        acc.unvote(cx, cy);
                    }
                    mask[i] = false;
                }
                if (cx, cy) == end {
                    break;
                }
                fx += dx;
                fy += dy;
            }
        }

        if good {
            let coord = |v: i64| u32::try_from(v).unwrap_or(0);
            segments.push(LineSegment {
                x1: coord(ends[0].0),
                y1: coord(ends[0].1),
                x2: coord(ends[1].0),
                y2: coord(ends[1].1),
            });
        }
    }

    log::trace!("hough: {} segments from {} px edge map", segments.len(), w * h);
    segments
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    fn blank(w: u32, h: u32) -> GrayImage {
        GrayImage::new(w, h)
    }

    #[test]
    fn empty_map_has_no_segments() {
        assert!(detect_segments(&blank(80, 80), &HoughConfig::default()).is_empty());
        assert!(detect_segments(&blank(0, 0), &HoughConfig::default()).is_empty());
    }

    #[test]
    fn single_horizontal_line_is_one_segment() {
        let mut img = blank(100, 40);
        for x in 10..90 {
            img.put_pixel(x, 20, Luma([255]));
        }
        let segments = detect_segments(&img, &HoughConfig::default());
        assert_eq!(segments.len(), 1, "{segments:?}");
        let s = segments[0];
        assert_eq!(s.y1, 20);
        assert_eq!(s.y2, 20);
        assert!(s.length() >= 70.0, "{s:?}");
    }

    #[test]
    fn diagonal_line_is_detected() {
        let mut img = blank(100, 100);
        for i in 5..95 {
            img.put_pixel(i, i, Luma([255]));
        }
        let segments = detect_segments(&img, &HoughConfig::default());
        assert_eq!(segments.len(), 1, "{segments:?}");
        assert!(segments[0].length() > 80.0);
    }

    #[test]
    fn short_line_is_ignored() {
        let mut img = blank(100, 40);
        for x in 10..30 {
            img.put_pixel(x, 20, Luma([255]));
        }
        assert!(detect_segments(&img, &HoughConfig::default()).is_empty());
    }

    #[test]
    fn small_gap_is_bridged() {
        let mut img = blank(120, 40);
        for x in (10..110).filter(|x| !(50..55).contains(x)) {
            img.put_pixel(x, 20, Luma([255]));
        }
        let segments = detect_segments(&img, &HoughConfig::default());
        assert_eq!(segments.len(), 1, "{segments:?}");
    }

    #[test]
    fn separate_lines_are_counted_separately() {
        // Ends sit more than `max_line_gap` apart so walks never merge.
        let mut img = blank(160, 160);
        for x in 10..150 {
            img.put_pixel(x, 20, Luma([255]));
            img.put_pixel(x, 140, Luma([255]));
        }
        for y in 40..121 {
            img.put_pixel(80, y, Luma([255]));
        }
        assert_eq!(detect_segments(&img, &HoughConfig::default()).len(), 3);
    }

    #[test]
    fn result_is_reproducible() {
        let img = GrayImage::from_fn(80, 80, |x, y| {
            Luma([if (x * 31 + y * 17) % 7 == 0 || x == y { 255 } else { 0 }])
        });
        let config = HoughConfig::default();
        assert_eq!(detect_segments(&img, &config), detect_segments(&img, &config));
    }

    #[test]
    fn validate_rejects_zero_rho() {
        let config = HoughConfig {
            rho: 0.0,
            ..HoughConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
