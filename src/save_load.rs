use std::io::{self, Read, Write};

use crate::canvas::CanvasState;
use crate::element::{Element, Logic};
use crate::point::point;

/// Magic bytes identifying a circuit save file.
pub const FILE_MAGIC: &[u8; 4] = b"CCPG";

/// Current save format version.
pub const FILE_VERSION: i32 = 0;

/// Why a canvas could not be decoded. Dialogs and retry policy belong to
/// the caller; the canvas is left untouched on any error.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("i/o error reading save data")]
    Io(#[from] io::Error),
    #[error("not a circuit save file")]
    BadMagic,
    #[error("save format version {0} is not supported")]
    UnsupportedVersion(i32),
    #[error("save file contains unknown element kind {0}; written by a newer version?")]
    UnknownElement(u8),
    #[error("save data is corrupted")]
    Corrupted,
}

fn read_i32_le<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

/// Encode a canvas: magic, version, little-endian width and height, then
/// one byte per cell row-major packing kind index and both logic levels.
pub fn write_canvas<W: Write>(state: &CanvasState, writer: &mut W) -> io::Result<()> {
    writer.write_all(FILE_MAGIC)?;
    writer.write_all(&FILE_VERSION.to_le_bytes())?;
    writer.write_all(&state.width().to_le_bytes())?;
    writer.write_all(&state.height().to_le_bytes())?;

    for pt in state.points() {
        let element = state.get(pt);
        let logic = element.logic().unwrap_or_default();
        let byte = (element.kind_index() << 2)
            | ((logic.level as u8) << 1)
            | (logic.default_level as u8);
        writer.write_all(&[byte])?;
    }
    Ok(())
}

/// Decode a canvas previously written by [`write_canvas`]. Communicator
/// handles come back null and are re-attached on the next compile.
pub fn read_canvas<R: Read>(reader: &mut R) -> Result<CanvasState, ReadError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != FILE_MAGIC {
        return Err(ReadError::BadMagic);
    }

    let version = read_i32_le(reader)?;
    if version != FILE_VERSION {
        return Err(ReadError::UnsupportedVersion(version));
    }

    let width = read_i32_le(reader)?;
    let height = read_i32_le(reader)?;
    if width < 0 || height < 0 || (width as i64) * (height as i64) > i32::MAX as i64 {
        return Err(ReadError::Corrupted);
    }

    let mut state = CanvasState::default();
    if width > 0 && height > 0 {
        state.extend(point(0, 0), point(width, height));
    }
    for y in 0..height {
        for x in 0..width {
            let mut byte = [0u8; 1];
            reader.read_exact(&mut byte)?;
            let logic = Logic {
                level: byte[0] & 0b10 != 0,
                default_level: byte[0] & 0b01 != 0,
            };
            let kind = byte[0] >> 2;
            let element =
                Element::from_kind_index(kind, logic).ok_or(ReadError::UnknownElement(kind))?;
            *state.cell_mut(point(x, y)) = element;
        }
    }

    // a well-formed file stores the minimal bounding box already, but a
    // hand-made one may not; normalize so canvas invariants hold
    state.shrink_to_bounding_box();
    log::debug!("loaded canvas of size {}x{}", state.width(), state.height());
    Ok(state)
}
