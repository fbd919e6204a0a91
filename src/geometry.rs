//! Plain rectangle and size types in CSS pixels.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle, the equivalent of a client rect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Half-open containment: the top/left edges are inside, bottom/right are not.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.top <= y && self.left <= x && self.bottom() > y && self.right() > x
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.width, self.height)
    }

    pub fn scale(&self, factor: f64) -> Rect {
        Rect::new(
            self.left * factor,
            self.top * factor,
            self.width * factor,
            self.height * factor,
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_half_open() {
        let r = Rect::new(10.0, 10.0, 5.0, 5.0);
        assert!(r.contains(10.0, 10.0));
        assert!(r.contains(14.9, 14.9));
        assert!(!r.contains(15.0, 12.0));
        assert!(!r.contains(12.0, 15.0));
    }

    #[test]
    fn test_intersects() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Rect::new(5.0, 5.0, 10.0, 10.0)));
        assert!(!a.intersects(&Rect::new(10.0, 0.0, 5.0, 5.0)));
    }
}
