use image::RgbaImage;

use crate::canvas::{CanvasState, PixelFormat};
use crate::point::Rect;

/// Slot count including the implicit default slot 0.
pub const NUM_CLIPBOARDS: usize = 10;

#[derive(Debug, Default)]
struct Clipboard {
    state: CanvasState,
    preview: Option<RgbaImage>,
}

/// Named clipboard slots for cut/copy/paste. Slot 0 is the default slot:
/// writing to any other slot mirrors into it, and reading a non-empty
/// numbered slot promotes that slot's contents to the default.
///
/// Out-of-range indices are caller bugs; every public method panics on
/// them.
#[derive(Debug)]
pub struct ClipboardManager {
    clipboards: [Clipboard; NUM_CLIPBOARDS],
}

impl Default for ClipboardManager {
    fn default() -> Self {
        Self {
            clipboards: std::array::from_fn(|_| Clipboard::default()),
        }
    }
}

impl ClipboardManager {
    /// Read a slot. Reading a non-empty numbered slot also overwrites the
    /// default slot; an empty source must not clobber it.
    pub fn read(&mut self, index: usize) -> CanvasState {
        let state = self.clipboards[index].state.clone();
        if index != 0 && !state.empty() {
            self.store(0, state.clone());
        }
        state
    }

    /// Write a slot, mirroring numbered writes into the default slot.
    /// Previews regenerate on every write.
    pub fn write(&mut self, state: &CanvasState, index: usize) {
        self.store(index, state.clone());
        if index != 0 {
            self.store(0, state.clone());
        }
        log::debug!("clipboard {} <- {}x{}", index, state.width(), state.height());
    }

    /// Presentation order of the slots. Identity for now; exists so the
    /// selection UI never hardcodes the slot count.
    pub fn get_order(&self) -> [usize; NUM_CLIPBOARDS] {
        std::array::from_fn(|i| i)
    }

    /// Cached thumbnail for a slot; None while the slot is empty.
    pub fn preview(&self, index: usize) -> Option<&RgbaImage> {
        self.clipboards[index].preview.as_ref()
    }

    fn store(&mut self, index: usize, state: CanvasState) {
        let clipboard = &mut self.clipboards[index];
        clipboard.preview = generate_preview(&state);
        clipboard.state = state;
    }
}

/// One pixel per cell, default-level colors, opaque alpha.
fn generate_preview(state: &CanvasState) -> Option<RgbaImage> {
    if state.empty() {
        return None;
    }
    let width = state.width();
    let height = state.height();
    let mut buffer = vec![0u32; (width * height) as usize];
    state.fill_pixels(
        true,
        &mut buffer,
        PixelFormat::RGB888,
        Rect::new(0, 0, width, height),
        width as usize,
    );

    let mut image = RgbaImage::new(width as u32, height as u32);
    for (pixel, value) in image.pixels_mut().zip(buffer) {
        *pixel = image::Rgba([(value >> 16) as u8, (value >> 8) as u8, value as u8, 0xFF]);
    }
    Some(image)
}
