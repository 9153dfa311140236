// Planar vector math used to widen shapes into parallel tracks and to place
// vehicles between two stations.

use log::warn;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

use crate::error::{Result, TrackerError};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit vector in the same direction, or zero for a zero-length input.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            Vec2::ZERO
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    /// 2D cross product (z component of the 3D cross product).
    pub fn cross(self, other: Vec2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Clockwise perpendicular: to the right of `self` taken as a travel direction.
    pub fn perp_right(self) -> Self {
        Vec2::new(self.y, -self.x)
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (other - self).length()
    }

    /// Compass-style heading in degrees, 0 = +y (north), clockwise.
    pub fn heading_degrees(self) -> f64 {
        let deg = self.x.atan2(self.y).to_degrees();
        if deg < 0.0 { deg + 360.0 } else { deg }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Equirectangular projection around a fixed centre. Longitude is shrunk by
/// cos(centre latitude) so one unit is the same ground distance on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub center_lat: f64,
    pub center_lon: f64,
    pub scale: f64,
}

impl Projection {
    pub fn new(center_lat: f64, center_lon: f64, scale: f64) -> Self {
        Projection { center_lat, center_lon, scale }
    }

    pub fn project(&self, lat: f64, lon: f64) -> Vec2 {
        let k = self.center_lat.to_radians().cos();
        Vec2::new(
            (lon - self.center_lon) * k * self.scale,
            (lat - self.center_lat) * self.scale,
        )
    }
}

/// One output point of [`offset_polyline`], remembering which input point it
/// was derived from (degenerate inputs are dropped, so indices can skip).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetVertex {
    pub source: usize,
    pub pos: Vec2,
}

/// Shift every point of `points` sideways by `width`, always to the right of the
/// direction of travel (negative widths shift left).
///
/// Interior points move along the angle bisector of their two neighbours,
/// endpoints along the perpendicular of their single segment. A point that
/// coincides with a neighbour has no defined direction: it is skipped with a
/// warning rather than failing the whole line.
pub fn offset_polyline(points: &[Vec2], width: f64) -> Result<Vec<OffsetVertex>> {
    if points.len() < 2 {
        return Err(TrackerError::Geometry(format!(
            "cannot offset a polyline of {} point(s)",
            points.len()
        )));
    }

    let last = points.len() - 1;
    let mut out = Vec::with_capacity(points.len());

    for (i, &p) in points.iter().enumerate() {
        let dir = if i == 0 {
            endpoint_direction(p, points[1], false)
        } else if i == last {
            endpoint_direction(p, points[last - 1], true)
        } else {
            bisector_direction(points[i - 1], p, points[i + 1])
        };

        match dir {
            Some(d) => out.push(OffsetVertex { source: i, pos: p + d * width }),
            None => warn!(
                "Overlapping shape points around index {} ({:.6}, {:.6}), point omitted",
                i, p.x, p.y
            ),
        }
    }

    Ok(out)
}

fn endpoint_direction(p: Vec2, neighbour: Vec2, neighbour_is_behind: bool) -> Option<Vec2> {
    let travel = if neighbour_is_behind { p - neighbour } else { neighbour - p };
    if travel.length() == 0.0 {
        return None;
    }
    Some(travel.normalize().perp_right())
}

fn bisector_direction(prev: Vec2, p: Vec2, next: Vec2) -> Option<Vec2> {
    let d1 = prev - p;
    let d2 = next - p;
    let (l1, l2) = (d1.length(), d2.length());
    if l1 == 0.0 || l2 == 0.0 {
        return None;
    }

    let v1 = d1.normalize();
    let v2 = d2.normalize();

    // Equivalent to v1 + v2 once normalized, but keeps precision on sharp turns
    let mut bisector = (d1 * l2 + d2 * l1).normalize();
    if bisector.length() == 0.0 {
        bisector = v1.perp_right();
    }
    if bisector.length() == 0.0 {
        bisector = v2.perp_right();
    }

    let handedness = if v1.cross(v2) > 0.0 { 1.0 } else { -1.0 };
    Some(bisector * handedness)
}

/// Linear interpolation. `r` is not clamped.
pub fn lerp(a: Vec2, b: Vec2, r: f64) -> Vec2 {
    a + (b - a) * r
}
