use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::canvas::{CanvasState, PixelFormat};
use crate::communicator::{
    Communicator, CommunicatorStore, FileInputCommunicator, FileOutputCommunicator,
};
use crate::element::Element;
use crate::history::HistoryManager;
use crate::point::{Point, Rect};
use crate::simulator::Simulator;

/// Whether the canvas changed since the last history commit. Unknown means
/// a bulk edit happened and only a full comparison can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dirty {
    Clean,
    Dirty,
    Unknown,
}

/// Owns the canonical canvas and mediates between editing operations and
/// the simulation lifecycle.
///
/// All editing entry points require the simulator to be stopped; the
/// presentation layer reads live levels through
/// [`fill_pixels`](Self::fill_pixels) while it runs.
pub struct StateManager {
    canvas: CanvasState,
    simulator: Simulator,
    history: HistoryManager,
    communicators: Arc<Mutex<CommunicatorStore>>,
    dirty: Dirty,
    delta_trans: Point,
}

impl StateManager {
    pub fn new(period: Duration) -> Self {
        let communicators = Arc::new(Mutex::new(CommunicatorStore::default()));
        Self {
            canvas: CanvasState::default(),
            simulator: Simulator::new(Arc::clone(&communicators), period),
            history: HistoryManager::new(CanvasState::default()),
            communicators,
            dirty: Dirty::Clean,
            delta_trans: Point::ZERO,
        }
    }

    /// Element at `pt`; Empty outside the canvas bounds.
    pub fn get(&self, pt: Point) -> Element {
        self.canvas.get(pt)
    }

    pub fn canvas(&self) -> &CanvasState {
        &self.canvas
    }

    /// Place one element, tracking dirtiness and the viewport translation
    /// for the eventual history commit.
    pub fn set(&mut self, pt: Point, element: Element) -> bool {
        assert!(
            !self.simulator.running(),
            "cannot edit the canvas while the simulation is running"
        );
        let (changed, translation) = self.canvas.set(pt, element);
        if changed {
            if self.dirty == Dirty::Clean {
                self.dirty = Dirty::Dirty;
            }
            self.delta_trans += translation;
        }
        changed
    }

    /// Swap in a bulk-edited canvas (selection move, paste, rotate). The
    /// change flag degrades to Unknown; the next commit compares.
    pub fn apply_canvas(&mut self, canvas: CanvasState, delta_trans: Point) {
        assert!(
            !self.simulator.running(),
            "cannot edit the canvas while the simulation is running"
        );
        self.canvas = canvas;
        self.dirty = Dirty::Unknown;
        self.delta_trans += delta_trans;
    }

    /// Commit the current canvas to the undo history if it changed.
    pub fn save_to_history(&mut self) -> bool {
        if self.dirty == Dirty::Clean {
            return false;
        }
        let committed = self.history.save_to_history(&self.canvas, self.delta_trans);
        self.dirty = Dirty::Clean;
        if committed {
            self.delta_trans = Point::ZERO;
        }
        committed
    }

    /// Undo one committed action. Pending edits are committed first so
    /// they become the entry being undone. Returns the viewport
    /// translation to apply, or None with nothing to undo.
    pub fn undo(&mut self) -> Option<Point> {
        assert!(
            !self.simulator.running(),
            "cannot undo while the simulation is running"
        );
        self.save_to_history();
        let (state, delta) = self.history.undo()?;
        self.canvas = state;
        self.dirty = Dirty::Clean;
        self.delta_trans = Point::ZERO;
        Some(delta)
    }

    pub fn redo(&mut self) -> Option<Point> {
        assert!(
            !self.simulator.running(),
            "cannot redo while the simulation is running"
        );
        self.save_to_history();
        let (state, delta) = self.history.redo()?;
        self.canvas = state;
        self.dirty = Dirty::Clean;
        self.delta_trans = Point::ZERO;
        Some(delta)
    }

    /// Whether a save is necessary. Callers commit (`save_to_history`)
    /// before asking, as the file-save action does.
    pub fn changed_since_last_save(&self) -> bool {
        self.history.changed_since_last_save()
    }

    /// Mark the current history position as saved. A failed save simply
    /// never calls this.
    pub fn set_saved(&mut self) {
        self.history.set_saved();
    }

    /// Replace the session's canvas wholesale (file open / new file). The
    /// undo history keeps its entries; the loaded state becomes current.
    pub fn load(&mut self, canvas: CanvasState) {
        assert!(
            !self.simulator.running(),
            "cannot load while the simulation is running"
        );
        self.history.imbue(canvas.clone());
        self.canvas = canvas;
        self.dirty = Dirty::Clean;
        self.delta_trans = Point::ZERO;
    }

    pub fn simulator_running(&self) -> bool {
        self.simulator.running()
    }

    /// Start if stopped. Returns false when there was nothing to simulate.
    pub fn start_simulator(&mut self) -> bool {
        if self.simulator.running() {
            return true;
        }
        self.simulator.start(&mut self.canvas)
    }

    /// Stop if running.
    pub fn stop_simulator(&mut self) {
        if self.simulator.running() {
            self.simulator.stop(&mut self.canvas);
        }
    }

    pub fn start_or_stop_simulator(&mut self) {
        if self.simulator.running() {
            self.stop_simulator();
        } else {
            self.start_simulator();
        }
    }

    /// Single tick if stopped. Returns false when there was nothing to
    /// simulate.
    pub fn step_simulator(&mut self) -> bool {
        if self.simulator.running() {
            return false;
        }
        self.simulator.step(&mut self.canvas)
    }

    /// Restore every element and communicator to its default state. Works
    /// regardless of running state; a running simulation restarts from the
    /// defaults.
    pub fn reset_simulator(&mut self) {
        let was_running = self.simulator.running();
        if was_running {
            self.simulator.stop(&mut self.canvas);
        }
        self.simulator.reset(&mut self.canvas);
        if was_running {
            self.simulator.start(&mut self.canvas);
        }
    }

    pub fn send_communicator_event(&self, device: usize, pressed: bool) {
        self.simulator.send_communicator_event(device, pressed);
    }

    pub fn period(&self) -> Duration {
        self.simulator.period()
    }

    pub fn set_period(&self, period: Duration) {
        self.simulator.set_period(period);
    }

    /// Rasterize for the renderer: live levels while running, stored
    /// levels otherwise.
    pub fn fill_pixels(
        &self,
        use_default_view: bool,
        buffer: &mut [u32],
        format: PixelFormat,
        region: Rect,
        pitch: usize,
    ) {
        if !use_default_view {
            if let Some(view) = self.simulator.live_view() {
                if self.simulator.compiled_size() == Some(self.canvas.size()) {
                    self.canvas.fill_pixels_with(buffer, format, region, pitch, |pt, _| {
                        view.level_at(pt)
                    });
                    return;
                }
            }
        }
        self.canvas
            .fill_pixels(use_default_view, buffer, format, region, pitch);
    }

    /// Attach (or re-point) the file behind a file-input communicator
    /// element. Creates the resource if the element has none yet.
    pub fn attach_file_input(&mut self, pt: Point, path: &Path) -> std::io::Result<()> {
        assert!(
            matches!(self.canvas.get(pt), Element::FileInputCommunicator(..)),
            "no file input communicator at the given cell"
        );
        let mut store = self.communicators.lock();
        let handle = match self.canvas.get(pt).communicator() {
            Some(id) if store.contains(id) => id,
            _ => {
                let id = store.insert(Communicator::FileInput(FileInputCommunicator::default()));
                self.canvas.cell_mut(pt).set_communicator(id);
                id
            }
        };
        match store.get_mut(handle) {
            Communicator::FileInput(file) => file.set_file(path),
            _ => unreachable!("handle attached to a file input element"),
        }
    }

    /// Attach the destination file of a file-output communicator element.
    pub fn attach_file_output(&mut self, pt: Point, path: &Path) {
        assert!(
            matches!(self.canvas.get(pt), Element::FileOutputCommunicator(..)),
            "no file output communicator at the given cell"
        );
        let mut store = self.communicators.lock();
        let handle = match self.canvas.get(pt).communicator() {
            Some(id) if store.contains(id) => id,
            _ => {
                let id =
                    store.insert(Communicator::FileOutput(FileOutputCommunicator::default()));
                self.canvas.cell_mut(pt).set_communicator(id);
                id
            }
        };
        match store.get_mut(handle) {
            Communicator::FileOutput(file) => file.set_file(path),
            _ => unreachable!("handle attached to a file output element"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Logic;
    use crate::point::point;

    fn new_manager() -> StateManager {
        let _ = env_logger::builder().is_test(true).try_init();
        StateManager::new(Duration::ZERO)
    }

    fn wire() -> Element {
        Element::ConductiveWire(Logic::LOW)
    }

    #[test]
    fn edits_accumulate_into_one_history_entry() {
        let mut manager = new_manager();
        assert!(manager.set(point(0, 0), wire()));
        assert!(manager.set(point(1, 0), wire()));
        assert!(manager.save_to_history());
        // nothing new to commit
        assert!(!manager.save_to_history());
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut manager = new_manager();
        manager.set(point(0, 0), wire());
        manager.save_to_history();
        manager.set(point(1, 0), Element::source());
        manager.save_to_history();

        assert!(manager.undo().is_some());
        assert_eq!(manager.get(point(1, 0)), Element::Empty);
        assert!(manager.redo().is_some());
        assert_eq!(manager.get(point(1, 0)), Element::source());
    }

    #[test]
    fn undo_commits_pending_edits_first() {
        let mut manager = new_manager();
        manager.set(point(0, 0), wire());
        manager.save_to_history();
        // pending, uncommitted edit
        manager.set(point(1, 0), wire());

        assert!(manager.undo().is_some());
        // the undo removed the pending edit, not the committed one
        assert_eq!(manager.get(point(1, 0)), Element::Empty);
        assert_eq!(manager.get(point(0, 0)), wire());
    }

    #[test]
    fn viewport_delta_flows_through_history() {
        let mut manager = new_manager();
        manager.set(point(0, 0), wire());
        manager.save_to_history();
        // growing left shifts every coordinate by +1
        manager.set(point(-1, 0), wire());
        manager.save_to_history();

        let delta = manager.undo().unwrap();
        assert_eq!(delta, point(-1, 0));
        let delta = manager.redo().unwrap();
        assert_eq!(delta, point(1, 0));
    }

    #[test]
    fn save_marker_flow() {
        let mut manager = new_manager();
        manager.set(point(0, 0), wire());
        manager.save_to_history();
        assert!(manager.changed_since_last_save());
        manager.set_saved();
        assert!(!manager.changed_since_last_save());
    }

    #[test]
    fn load_replaces_canvas_without_history_entry() {
        let mut manager = new_manager();
        let mut canvas = CanvasState::default();
        canvas.set(point(0, 0), Element::source());
        manager.load(canvas.clone());
        assert_eq!(manager.canvas(), &canvas);
        assert!(!manager.save_to_history());
    }

    #[test]
    fn simulation_lifecycle_through_manager() {
        let mut manager = new_manager();
        manager.set(point(0, 0), Element::source());
        manager.set(point(1, 0), wire());

        assert!(manager.start_simulator());
        assert!(manager.simulator_running());
        // idempotent start
        assert!(manager.start_simulator());

        manager.stop_simulator();
        assert!(!manager.simulator_running());
        assert!(manager.get(point(1, 0)).logic_level());
    }

    #[test]
    fn step_updates_stored_levels() {
        let mut manager = new_manager();
        manager.set(point(0, 0), Element::source());
        manager.set(point(1, 0), wire());
        assert!(manager.step_simulator());
        assert!(manager.get(point(1, 0)).logic_level());
    }

    #[test]
    fn reset_restores_defaults_while_running() {
        let mut manager = new_manager();
        manager.set(point(0, 0), Element::source());
        manager.set(point(1, 0), wire());
        manager.start_simulator();
        manager.reset_simulator();
        assert!(manager.simulator_running());
        manager.stop_simulator();
    }

    #[test]
    fn start_on_empty_canvas_reports_nothing_to_simulate() {
        let mut manager = new_manager();
        assert!(!manager.start_simulator());
        assert!(!manager.simulator_running());
    }

    #[test]
    #[should_panic(expected = "while the simulation is running")]
    fn editing_while_running_is_a_contract_violation() {
        let mut manager = new_manager();
        manager.set(point(0, 0), Element::source());
        manager.start_simulator();
        manager.set(point(1, 0), wire());
    }

    #[test]
    fn live_fill_pixels_tracks_the_simulation() {
        let mut manager = new_manager();
        manager.set(point(0, 0), Element::source());
        manager.set(point(1, 0), wire());
        manager.start_simulator();

        let mut live = [0u32; 2];
        manager.fill_pixels(
            false,
            &mut live,
            PixelFormat::RGB888,
            Rect::new(0, 0, 2, 1),
            2,
        );
        let lit_wire = PixelFormat::RGB888.pack(wire().display_color(true));
        assert_eq!(live[1], lit_wire);

        manager.stop_simulator();
    }

    #[test]
    fn file_input_communicator_feeds_the_net() {
        let mut manager = new_manager();
        manager.set(
            point(0, 0),
            Element::FileInputCommunicator(Logic::LOW, Default::default()),
        );

        let path = std::env::temp_dir().join(format!(
            "gridcircuit-file-input-{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, [0xFFu8]).unwrap();
        manager.attach_file_input(point(0, 0), &path).unwrap();

        assert!(manager.step_simulator());
        assert!(manager.get(point(0, 0)).logic_level());
        std::fs::remove_file(&path).ok();
    }
}
