//! External contours and shape descriptors.
//!
//! Border following (`imageproc::contours::find_contours`) runs on the
//! binary edge map. Only outermost borders are kept: outer borders with
//! no enclosing parent. The largest by enclosed area describes the
//! object's shape.

use geo::{Area, ConvexHull, LineString, MultiPoint, Polygon};
use image::GrayImage;
use imageproc::contours::{BorderType, Contour};
use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Geometry of one closed contour.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    /// Enclosed area (shoelace) in square pixels.
    pub area: f64,
    /// Closed arc length in pixels.
    pub perimeter: f64,
    /// Area of the convex hull of the contour points.
    pub hull_area: f64,
    /// `area / hull_area`, 0 when the hull is degenerate.
    pub solidity: f64,
    /// `4π·area / perimeter²`, 0 when the perimeter is 0.
    pub circularity: f64,
    /// Bounding-box width divided by height (inclusive pixel extents).
    pub aspect_ratio: f64,
    /// Number of border points.
    pub point_count: usize,
}

/// Outermost closed borders in a binary edge map (non-zero = edge).
///
/// Borders with fewer than three points cannot enclose area and are
/// dropped.
#[must_use]
pub fn external_contours(edges: &GrayImage) -> Vec<Vec<Point>> {
    let contours: Vec<Contour<u32>> = imageproc::contours::find_contours(edges);
    contours
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter(|c| c.points.len() >= 3)
        .map(|c| {
            c.points
                .into_iter()
                .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                .collect()
        })
        .collect()
}

fn polygon(points: &[Point]) -> Polygon<f64> {
    let ring: LineString<f64> = points.iter().map(|p| (p.x, p.y)).collect();
    Polygon::new(ring, vec![])
}

/// Enclosed area of a closed point ring (shoelace formula).
#[must_use]
pub fn enclosed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    polygon(points).unsigned_area()
}

/// Length of the closed ring through `points`, including the closing
/// edge.
#[must_use]
pub fn closed_perimeter(points: &[Point]) -> f64 {
    match points {
        [] | [_] => 0.0,
        [first, .., last] => {
            let open: f64 = points.windows(2).map(|w| w[0].distance(w[1])).sum();
            open + last.distance(*first)
        }
    }
}

/// Compute the shape descriptor of one closed contour.
#[must_use]
pub fn describe(points: &[Point]) -> ShapeDescriptor {
    let area = enclosed_area(points);
    let perimeter = closed_perimeter(points);
    let hull: MultiPoint<f64> = points.iter().map(|p| (p.x, p.y)).collect();
    let hull_area = hull.convex_hull().unsigned_area();

    let solidity = if hull_area > 0.0 {
        (area / hull_area).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let circularity = if perimeter > 0.0 {
        4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
    } else {
        0.0
    };

    let (min_x, max_x, min_y, max_y) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(lx, hx, ly, hy), p| (lx.min(p.x), hx.max(p.x), ly.min(p.y), hy.max(p.y)),
    );
    let aspect_ratio = if points.is_empty() {
        0.0
    } else {
        (max_x - min_x + 1.0) / (max_y - min_y + 1.0)
    };

    ShapeDescriptor {
        area,
        perimeter,
        hull_area,
        solidity,
        circularity,
        aspect_ratio,
        point_count: points.len(),
    }
}

/// Descriptor of the external contour with the largest enclosed area.
///
/// Returns `None` when the edge map has no usable contour. On equal
/// areas the first contour in tracing order wins.
#[must_use]
pub fn largest_shape(edges: &GrayImage) -> Option<ShapeDescriptor> {
    external_contours(edges)
        .iter()
        .map(|c| describe(c))
        .fold(None, |best: Option<ShapeDescriptor>, shape| match best {
            Some(b) if b.area >= shape.area => Some(b),
            _ => Some(shape),
        })
}
