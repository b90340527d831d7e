use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Non-owning handle stored by communicator elements. The store owns
    /// the resource; a default key is "not attached yet".
    pub struct CommunicatorId;
}

/// Pending screen events, at most four queued past the live bit. Encoded
/// as a bitfield so overflow coalesces into the newest slot instead of
/// blocking the tick loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventQueue {
    state: u8,
    count: u8,
}

impl EventQueue {
    pub fn insert(&mut self, value: bool) {
        if self.count < 4 {
            self.count += 1;
            self.state |= (value as u8) << self.count;
        } else {
            self.state |= (value as u8) << 4;
        }
    }

    pub fn receive(&mut self) -> bool {
        if self.count > 0 {
            self.state >>= 1;
            self.count -= 1;
        }
        self.state & 1 == 1
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Bridges a screen I/O element to the host's input and display: received
/// bits come from queued key/mouse events, transmitted bits are what the
/// presentation layer shows.
#[derive(Debug, Default)]
pub struct ScreenCommunicator {
    input: EventQueue,
    transmitting: bool,
}

impl ScreenCommunicator {
    pub fn insert_event(&mut self, value: bool) {
        self.input.insert(value);
    }

    pub fn transmitting(&self) -> bool {
        self.transmitting
    }
}

/// Streams the bits of a file into the circuit, LSB first. The original
/// streamed on demand through a request protocol; here the file is loaded
/// eagerly when attached, which keeps the tick loop free of blocking I/O.
#[derive(Debug, Default)]
pub struct FileInputCommunicator {
    path: Option<PathBuf>,
    bytes: Vec<u8>,
    cursor: usize, // bit index
}

impl FileInputCommunicator {
    pub fn set_file(&mut self, path: &Path) -> std::io::Result<()> {
        self.bytes = fs::read(path)?;
        self.path = Some(path.to_owned());
        self.cursor = 0;
        log::info!(
            "file input communicator attached to {} ({} bytes)",
            path.display(),
            self.bytes.len()
        );
        Ok(())
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn next_bit(&mut self) -> bool {
        let Some(byte) = self.bytes.get(self.cursor / 8) else {
            return false;
        };
        let bit = (byte >> (self.cursor % 8)) & 1 == 1;
        self.cursor += 1;
        bit
    }
}

/// Collects transmitted bits into bytes, LSB first, and appends them to a
/// file when flushed.
#[derive(Debug, Default)]
pub struct FileOutputCommunicator {
    path: Option<PathBuf>,
    pending: Vec<u8>,
    bit_buffer: u8,
    bit_count: u8,
}

impl FileOutputCommunicator {
    pub fn set_file(&mut self, path: &Path) {
        self.path = Some(path.to_owned());
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn push_bit(&mut self, value: bool) {
        self.bit_buffer |= (value as u8) << self.bit_count;
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.pending.push(self.bit_buffer);
            self.bit_buffer = 0;
            self.bit_count = 0;
        }
    }

    /// Append the completed bytes to the configured file. Called when the
    /// simulation stops; a missing path just drops the data.
    pub fn flush(&mut self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            self.pending.clear();
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&self.pending)?;
        log::debug!(
            "file output communicator wrote {} bytes to {}",
            self.pending.len(),
            path.display()
        );
        self.pending.clear();
        Ok(())
    }
}

/// A communicator resource. Elements reference these through
/// [`CommunicatorId`]; the simulation thread drives them once per tick.
#[derive(Debug)]
pub enum Communicator {
    Screen(ScreenCommunicator),
    FileInput(FileInputCommunicator),
    FileOutput(FileOutputCommunicator),
}

impl Communicator {
    /// Push the level of the communicator's net for this tick.
    pub fn transmit(&mut self, value: bool) {
        match self {
            Self::Screen(screen) => screen.transmitting = value,
            Self::FileInput(_) => {}
            Self::FileOutput(file) => file.push_bit(value),
        }
    }

    /// Pull the bit the communicator drives onto its net this tick.
    pub fn receive(&mut self) -> bool {
        match self {
            Self::Screen(screen) => screen.input.receive(),
            Self::FileInput(file) => file.next_bit(),
            Self::FileOutput(_) => false,
        }
    }

    /// Drop transient state, as if the simulation had never run.
    pub fn refresh(&mut self) {
        match self {
            Self::Screen(screen) => {
                screen.input.clear();
                screen.transmitting = false;
            }
            Self::FileInput(file) => file.cursor = 0,
            Self::FileOutput(file) => {
                file.pending.clear();
                file.bit_buffer = 0;
                file.bit_count = 0;
            }
        }
    }
}

/// Session-wide registry of communicator resources. Canvas elements hold
/// keys into this store; compiling a canvas attaches resources to any
/// element whose key is still null.
#[derive(Debug, Default)]
pub struct CommunicatorStore {
    map: SlotMap<CommunicatorId, Communicator>,
}

impl CommunicatorStore {
    pub fn insert(&mut self, communicator: Communicator) -> CommunicatorId {
        self.map.insert(communicator)
    }

    pub fn contains(&self, id: CommunicatorId) -> bool {
        self.map.contains_key(id)
    }

    pub fn get(&self, id: CommunicatorId) -> &Communicator {
        self.map.get(id).expect("communicator not found")
    }

    pub fn get_mut(&mut self, id: CommunicatorId) -> &mut Communicator {
        self.map.get_mut(id).expect("communicator not found (mut)")
    }

    pub fn remove(&mut self, id: CommunicatorId) {
        self.map.remove(id);
    }

    pub fn refresh_all(&mut self) {
        for (_, communicator) in &mut self.map {
            communicator.refresh();
        }
    }

    /// Flush buffered file output. I/O failures are reported per resource
    /// so one broken file does not lose the rest.
    pub fn flush_file_outputs(&mut self) {
        for (_, communicator) in &mut self.map {
            if let Communicator::FileOutput(file) = communicator {
                if let Err(err) = file.flush() {
                    log::error!("failed to flush file output communicator: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_queue_delivers_in_order() {
        let mut queue = EventQueue::default();
        queue.insert(true);
        queue.insert(false);
        queue.insert(true);
        assert!(queue.receive());
        assert!(!queue.receive());
        assert!(queue.receive());
        // drained: last state is held
        assert!(queue.receive());
    }

    #[test]
    fn event_queue_overflow_coalesces_newest() {
        let mut queue = EventQueue::default();
        for _ in 0..4 {
            queue.insert(false);
        }
        queue.insert(true); // fifth event lands in the last slot
        queue.insert(false); // coalesced away
        assert!(!queue.receive());
        assert!(!queue.receive());
        assert!(!queue.receive());
        assert!(queue.receive());
    }

    #[test]
    fn file_input_streams_bits_lsb_first() {
        let mut file = FileInputCommunicator::default();
        file.bytes = vec![0b0000_0101];
        let mut communicator = Communicator::FileInput(file);
        assert!(communicator.receive());
        assert!(!communicator.receive());
        assert!(communicator.receive());
        for _ in 3..8 {
            assert!(!communicator.receive());
        }
        // past the end: constant low
        assert!(!communicator.receive());
    }

    #[test]
    fn file_input_refresh_rewinds() {
        let mut file = FileInputCommunicator::default();
        file.bytes = vec![0b1];
        let mut communicator = Communicator::FileInput(file);
        assert!(communicator.receive());
        assert!(!communicator.receive());
        communicator.refresh();
        assert!(communicator.receive());
    }

    #[test]
    fn file_output_packs_bits_into_bytes() {
        let mut communicator = Communicator::FileOutput(FileOutputCommunicator::default());
        for bit in [true, false, true, false, false, false, false, false] {
            communicator.transmit(bit);
        }
        let Communicator::FileOutput(file) = &communicator else {
            unreachable!();
        };
        assert_eq!(file.pending, vec![0b0000_0101]);
    }

    #[test]
    fn screen_communicator_tracks_transmit() {
        let mut communicator = Communicator::Screen(ScreenCommunicator::default());
        communicator.transmit(true);
        let Communicator::Screen(screen) = &communicator else {
            unreachable!();
        };
        assert!(screen.transmitting());
    }

    #[test]
    fn store_round_trip() {
        let mut store = CommunicatorStore::default();
        let id = store.insert(Communicator::Screen(ScreenCommunicator::default()));
        assert!(store.contains(id));
        assert!(!store.contains(CommunicatorId::default()));
        store.remove(id);
        assert!(!store.contains(id));
    }
}
