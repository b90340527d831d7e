use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Integer grid coordinate. Also used for translations between grids.
#[derive(
    serde::Deserialize, serde::Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash,
)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

pub const fn point(x: i32, y: i32) -> Point {
    Point { x, y }
}

impl Point {
    pub const ZERO: Self = point(0, 0);

    /// Component-wise minimum.
    pub fn min(self, other: Self) -> Self {
        point(self.x.min(other.x), self.y.min(other.y))
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        point(self.x.max(other.x), self.y.max(other.y))
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        point(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        point(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Self;

    fn neg(self) -> Self {
        point(-self.x, -self.y)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl SubAssign for Point {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

/// A rectangle of grid cells, used to address pixel-fill regions and
/// clipboard cuts. `x`/`y` may be negative; `width`/`height` are counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top_left(&self) -> Point {
        point(self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_arithmetic() {
        let a = point(3, -2);
        let b = point(-1, 5);
        assert_eq!(a + b, point(2, 3));
        assert_eq!(a - b, point(4, -7));
        assert_eq!(-a, point(-3, 2));
        assert_eq!(a.min(b), point(-1, -2));
        assert_eq!(a.max(b), point(3, 5));
    }

    #[test]
    fn point_assign_ops() {
        let mut p = point(1, 1);
        p += point(2, 3);
        assert_eq!(p, point(3, 4));
        p -= point(3, 4);
        assert_eq!(p, Point::ZERO);
    }
}
