use crate::element::Element;
use crate::matrix::Matrix;
use crate::point::{Point, Rect, point};

/// Channel layout of the caller's pixel buffer. The canvas does not own a
/// surface; the renderer tells it where each channel lives in the `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub red_shift: u32,
    pub green_shift: u32,
    pub blue_shift: u32,
}

impl PixelFormat {
    /// `0x00RRGGBB`
    pub const RGB888: Self = Self {
        red_shift: 16,
        green_shift: 8,
        blue_shift: 0,
    };

    pub fn pack(&self, [r, g, b]: [u8; 3]) -> u32 {
        ((r as u32) << self.red_shift)
            | ((g as u32) << self.green_shift)
            | ((b as u32) << self.blue_shift)
    }
}

/// The authoritative grid of circuit elements.
///
/// The stored rectangle is always the minimal bounding box of the non-empty
/// cells; any edit that leaves an empty border row or column shrinks the
/// backing matrix and reports the translation the viewport should apply to
/// stay visually still. Coordinates outside the rectangle read as
/// [`Element::Empty`] without allocating.
///
/// This is a plain value: cloning duplicates all cells, and
/// equality/hashing cover the full contents.
#[derive(
    serde::Deserialize, serde::Serialize, Debug, Default, Clone, PartialEq, Eq, Hash,
)]
pub struct CanvasState {
    cells: Matrix<Element>,
}

impl CanvasState {
    pub fn width(&self) -> i32 {
        self.cells.width()
    }

    pub fn height(&self) -> i32 {
        self.cells.height()
    }

    pub fn size(&self) -> Point {
        self.cells.size()
    }

    pub fn empty(&self) -> bool {
        self.cells.empty()
    }

    pub fn contains(&self, pt: Point) -> bool {
        self.cells.contains(pt)
    }

    /// Never fails; out-of-range coordinates are Empty.
    pub fn get(&self, pt: Point) -> Element {
        self.cells.get(pt).copied().unwrap_or(Element::Empty)
    }

    /// Direct cell access for the simulator write-back and the compiler's
    /// communicator attachment. Does not renormalize the bounding box.
    pub(crate) fn cell_mut(&mut self, pt: Point) -> &mut Element {
        &mut self.cells[pt]
    }

    /// All in-bounds coordinates in row-major order.
    pub fn points(&self) -> impl Iterator<Item = Point> + use<> {
        self.cells.points()
    }

    /// Place `element` at `pt`, growing or shrinking the backing rectangle
    /// to keep it minimal. Placing a kind over the same kind is a no-op so
    /// repeated pencil strokes don't wipe stored logic levels.
    ///
    /// Returns whether the canvas changed and the translation that was
    /// applied to every coordinate (so callers can keep their viewport and
    /// any remembered points in sync).
    pub fn set(&mut self, pt: Point, element: Element) -> (bool, Point) {
        if element.is_empty() {
            if self.contains(pt) && !self.cells[pt].is_empty() {
                self.cells[pt] = Element::Empty;
                (true, self.shrink_around(pt))
            } else {
                (false, Point::ZERO)
            }
        } else {
            let translation = self.prepare_for_addition(pt);
            let pt = pt + translation;
            if self.cells[pt].kind_index() != element.kind_index() {
                self.cells[pt] = element;
                (true, translation)
            } else {
                // same kind already present; translation is zero here
                (false, Point::ZERO)
            }
        }
    }

    /// Grow the matrix so `pt` is in bounds. Returns the translation to
    /// apply on `pt`.
    fn prepare_for_addition(&mut self, pt: Point) -> Point {
        if self.empty() {
            self.cells = Matrix::new(1, 1);
            return -pt;
        }
        if self.contains(pt) {
            return Point::ZERO;
        }

        let min_pt = pt.min(Point::ZERO);
        let max_pt = (pt + point(1, 1)).max(self.size());
        let translation = -min_pt;
        let new_size = max_pt + translation;

        let mut new_cells = Matrix::new(new_size.x, new_size.y);
        Matrix::move_range(
            &self.cells,
            &mut new_cells,
            Point::ZERO,
            translation,
            self.width(),
            self.height(),
        );
        self.cells = new_cells;
        translation
    }

    /// Shrink, skipping the scan when `pt` is not on the border (erasing an
    /// interior cell can never expose an empty border row/column).
    fn shrink_around(&mut self, pt: Point) -> Point {
        if pt.x > 0 && pt.x + 1 < self.width() && pt.y > 0 && pt.y + 1 < self.height() {
            return Point::ZERO;
        }
        self.shrink_to_bounding_box()
    }

    /// Shrink the matrix to the minimal bounding rectangle of non-empty
    /// cells. Returns the translation applied to every coordinate.
    pub fn shrink_to_bounding_box(&mut self) -> Point {
        let mut min = point(i32::MAX, i32::MAX);
        let mut max = point(i32::MIN, i32::MIN);
        for pt in self.cells.points() {
            if !self.cells[pt].is_empty() {
                min = min.min(pt);
                max = max.max(pt);
            }
        }

        if min == Point::ZERO && max + point(1, 1) == self.size() {
            return Point::ZERO;
        }
        if min.x > max.x {
            // no non-empty cells left
            self.cells = Matrix::default();
            return Point::ZERO;
        }

        let new_size = max - min + point(1, 1);
        let mut new_cells = Matrix::new(new_size.x, new_size.y);
        Matrix::move_range(&self.cells, &mut new_cells, min, Point::ZERO, new_size.x, new_size.y);
        self.cells = new_cells;
        -min
    }

    /// Grow the matrix to cover `[top_left, bottom_right)` ahead of a bulk
    /// edit. Returns the translation applied to every coordinate.
    pub fn extend(&mut self, top_left: Point, bottom_right: Point) -> Point {
        let new_top_left = if self.empty() {
            top_left
        } else {
            top_left.min(Point::ZERO)
        };
        let new_bottom_right = if self.empty() {
            bottom_right
        } else {
            bottom_right.max(self.size())
        };
        if new_top_left == Point::ZERO && new_bottom_right == self.size() {
            return Point::ZERO;
        }

        let new_size = new_bottom_right - new_top_left;
        let mut new_cells = Matrix::new(new_size.x, new_size.y);
        if !self.empty() {
            Matrix::move_range(
                &self.cells,
                &mut new_cells,
                Point::ZERO,
                -new_top_left,
                self.width(),
                self.height(),
            );
        }
        self.cells = new_cells;
        -new_top_left
    }

    /// Move a rectangle of elements out into a new canvas, leaving the area
    /// empty here. The result keeps the exact rectangle size (callers shrink
    /// it if they want the minimal box). `rect` must be in bounds.
    pub fn splice(&mut self, rect: Rect) -> Self {
        assert!(
            rect.x >= 0
                && rect.y >= 0
                && rect.x + rect.width <= self.width()
                && rect.y + rect.height <= self.height(),
            "splice rectangle out of bounds"
        );
        let mut out = Self {
            cells: Matrix::new(rect.width, rect.height),
        };
        Matrix::swap_range(
            &mut self.cells,
            &mut out.cells,
            rect.top_left(),
            Point::ZERO,
            rect.width,
            rect.height,
        );
        out
    }

    /// Overlay two canvases, with `second`'s non-empty cells written over
    /// `first`. The translations place each canvas in a common coordinate
    /// space; the returned translation maps that space onto the result.
    pub fn merge(first: Self, first_trans: Point, second: Self, second_trans: Point) -> (Self, Point) {
        if first.empty() {
            return (second, -second_trans);
        }
        if second.empty() {
            return (first, -first_trans);
        }

        let new_min = first_trans.min(second_trans);
        let new_max = (first_trans + first.size()).max(second_trans + second.size());

        let mut out = if first_trans == new_min && first_trans + first.size() == new_max {
            // `first` already covers the whole result
            first
        } else {
            let size = new_max - new_min;
            let mut cells = Matrix::new(size.x, size.y);
            Matrix::move_range(
                &first.cells,
                &mut cells,
                Point::ZERO,
                first_trans - new_min,
                first.width(),
                first.height(),
            );
            Self { cells }
        };

        for pt in second.points() {
            let element = second.cells[pt];
            if !element.is_empty() {
                out.cells[pt + second_trans - new_min] = element;
            }
        }

        (out, -new_min)
    }

    pub fn flip_horizontal(&mut self) {
        self.cells.flip_horizontal();
    }

    pub fn flip_vertical(&mut self) {
        self.cells.flip_vertical();
    }

    pub fn rotate_clockwise(&mut self) {
        let mut rotated: Matrix<Element> = Matrix::new(self.height(), self.width());
        for pt in self.cells.points() {
            rotated[point(self.height() - pt.y - 1, pt.x)] = self.cells[pt];
        }
        self.cells = rotated;
    }

    pub fn rotate_counter_clockwise(&mut self) {
        let mut rotated: Matrix<Element> = Matrix::new(self.height(), self.width());
        for pt in self.cells.points() {
            rotated[point(pt.y, self.width() - pt.x - 1)] = self.cells[pt];
        }
        self.cells = rotated;
    }

    /// Restore every element's default logic level.
    pub fn reset_logic_levels(&mut self) {
        for pt in self.cells.points() {
            self.cells[pt].reset_logic_level();
        }
    }

    /// Rasterize a rectangle of cells into a caller-owned pixel buffer.
    /// `region` is in canvas coordinates and may extend past the canvas;
    /// out-of-range cells are written as 0. `pitch` is the buffer row
    /// stride in pixels.
    pub fn fill_pixels(
        &self,
        use_default_view: bool,
        buffer: &mut [u32],
        format: PixelFormat,
        region: Rect,
        pitch: usize,
    ) {
        self.fill_pixels_with(buffer, format, region, pitch, |_, element| {
            if use_default_view {
                element.default_logic_level()
            } else {
                element.logic_level()
            }
        });
    }

    /// Like [`fill_pixels`](Self::fill_pixels) but with the logic level
    /// supplied per cell, so the live simulation view can substitute node
    /// levels without touching the canvas.
    pub fn fill_pixels_with<F>(
        &self,
        buffer: &mut [u32],
        format: PixelFormat,
        region: Rect,
        pitch: usize,
        mut level_of: F,
    ) where
        F: FnMut(Point, &Element) -> bool,
    {
        assert!(region.width >= 0 && region.height >= 0, "negative fill region");
        if region.height > 0 {
            let needed = (region.height as usize - 1) * pitch + region.width as usize;
            assert!(buffer.len() >= needed, "pixel buffer too small for region");
        }

        for row in 0..region.height {
            let row_start = (row as usize) * pitch;
            for col in 0..region.width {
                let pt = point(region.x + col, region.y + row);
                let pixel = &mut buffer[row_start + col as usize];
                match self.cells.get(pt) {
                    Some(element) if !element.is_empty() => {
                        let level = level_of(pt, element);
                        *pixel = format.pack(element.display_color(level));
                    }
                    _ => *pixel = 0,
                }
            }
        }
    }
}
