//! Pure geometry helpers shared by the estimators and the tracker.

use nalgebra::{Point2, Vector2};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f32::consts::{PI, TAU};

/// Axis-aligned rectangle in floating-point pixel coordinates: [x, y, w, h]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest rectangle containing every point. `None` for an empty iterator.
    pub fn bounding(points: impl IntoIterator<Item = Point2<f32>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in iter {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Corners in the order top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point2<f32>; 4] {
        [
            Point2::new(self.left(), self.top()),
            Point2::new(self.right(), self.top()),
            Point2::new(self.right(), self.bottom()),
            Point2::new(self.left(), self.bottom()),
        ]
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Strict containment: points on an edge are outside.
    pub fn contains(&self, p: &Point2<f32>) -> bool {
        p.x > self.left() && p.y > self.top() && p.x < self.right() && p.y < self.bottom()
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Integer rectangle [x, y, w, h], truncated toward zero.
    pub fn to_pixel_rect(&self) -> [i32; 4] {
        [
            self.x as i32,
            self.y as i32,
            self.width as i32,
            self.height as i32,
        ]
    }
}

/// Rotate `v` by `radians`, then scale it.
pub fn transform(v: &Vector2<f32>, scale: f32, radians: f32) -> Vector2<f32> {
    if radians == 0.0 {
        return v * scale;
    }
    let (s, c) = radians.sin_cos();
    Vector2::new(c * v.x - s * v.y, s * v.x + c * v.y) * scale
}

pub fn transform_all(vs: &[Vector2<f32>], scale: f32, radians: f32) -> Vec<Vector2<f32>> {
    vs.iter().map(|v| transform(v, scale, radians)).collect()
}

/// Wrap an angle difference into (-pi, pi].
pub fn bound_angle(radians: f32) -> f32 {
    let mut a = radians;
    if a > PI {
        a -= TAU;
    }
    if a <= -PI {
        a += TAU;
    }
    a
}

pub fn l2_distance(p1: &Point2<f32>, p2: &Point2<f32>) -> f32 {
    (p2 - p1).norm()
}

/// Angle of the vector from `p1` to `p2`, relative to +X.
pub fn point_angle(p1: &Point2<f32>, p2: &Point2<f32>) -> f32 {
    let d = p2 - p1;
    d.y.atan2(d.x)
}

/// Arithmetic mean of the points.
pub fn centroid(points: &[Point2<f32>]) -> Option<Point2<f32>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector2::zeros(), |acc: Vector2<f32>, p| acc + p.coords);
    Some(Point2::from(sum / points.len() as f32))
}

/// Sorts `values` in place and returns the median; the mean of the two middle
/// values for an even count.
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    } else {
        Some(values[mid])
    }
}
