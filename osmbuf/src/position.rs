use std::fmt;

/// Number of fixed-point units per degree.
pub const COORD_PRECISION: i32 = 10_000_000;

/// A geographic position stored as fixed-point 32 bit integers.
///
/// This gives an accuracy of about a centimeter, which is what OSM itself
/// uses. The default position is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    x: i32,
    y: i32,
}

impl Default for Position {
    fn default() -> Self {
        Self::undefined()
    }
}

impl Position {
    pub const UNDEFINED_COORD: i32 = i32::MAX;

    pub const fn undefined() -> Self {
        Self {
            x: Self::UNDEFINED_COORD,
            y: Self::UNDEFINED_COORD,
        }
    }

    /// Creates a position from longitude and latitude in degrees.
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            x: double_to_fix(lon),
            y: double_to_fix(lat),
        }
    }

    /// Creates a position from raw fixed-point coordinates.
    pub const fn from_raw(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn is_defined(&self) -> bool {
        self.x != Self::UNDEFINED_COORD && self.y != Self::UNDEFINED_COORD
    }

    #[inline]
    pub fn x(&self) -> i32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn lon(&self) -> f64 {
        fix_to_double(self.x)
    }

    pub fn lat(&self) -> f64 {
        fix_to_double(self.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_defined() {
            write!(f, "({},{})", self.lon(), self.lat())
        } else {
            write!(f, "(undefined)")
        }
    }
}

fn double_to_fix(c: f64) -> i32 {
    (c * f64::from(COORD_PRECISION)).round() as i32
}

fn fix_to_double(c: i32) -> f64 {
    f64::from(c) / f64::from(COORD_PRECISION)
}

/// Axis-aligned bounding box, undefined until the first position is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    min_x: i32,
    max_x: i32,
    min_y: i32,
    max_y: i32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new()
    }
}

impl Bounds {
    pub const fn new() -> Self {
        Self {
            min_x: i32::MAX,
            max_x: i32::MIN,
            min_y: i32::MAX,
            max_y: i32::MIN,
        }
    }

    /// Grows the box so that it contains `position`.
    ///
    /// Undefined positions are ignored.
    pub fn extend(&mut self, position: Position) -> &mut Self {
        if !position.is_defined() {
            return self;
        }
        if position.x < self.min_x {
            self.min_x = position.x;
        }
        if position.x > self.max_x {
            self.max_x = position.x;
        }
        if position.y < self.min_y {
            self.min_y = position.y;
        }
        if position.y > self.max_y {
            self.max_y = position.y;
        }
        self
    }

    pub fn is_defined(&self) -> bool {
        self.min_x <= self.max_x
    }

    /// Bottom-left corner.
    pub fn bottom_left(&self) -> Option<Position> {
        if self.is_defined() {
            Some(Position::from_raw(self.min_x, self.min_y))
        } else {
            None
        }
    }

    /// Top-right corner.
    pub fn top_right(&self) -> Option<Position> {
        if self.is_defined() {
            Some(Position::from_raw(self.max_x, self.max_y))
        } else {
            None
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.bottom_left(), self.top_right()) {
            (Some(bl), Some(tr)) => {
                write!(f, "({},{},{},{})", bl.lon(), bl.lat(), tr.lon(), tr.lat())
            }
            _ => write!(f, "(undefined)"),
        }
    }
}
