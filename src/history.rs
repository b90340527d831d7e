use std::collections::VecDeque;

use crate::canvas::CanvasState;
use crate::point::Point;

/// Undo depth bound; the oldest snapshot is evicted past this.
pub const MAX_HISTORY_DEPTH: usize = 256;

/// An immutable canvas snapshot plus the viewport translation accumulated
/// since the previous snapshot.
#[derive(Debug, Clone)]
struct Snapshot {
    state: CanvasState,
    delta_trans: Point,
}

/// Bounded linear undo/redo over whole-canvas snapshots.
///
/// The manager keeps the current committed state alongside the two stacks;
/// the undo-stack top is always the state to restore on the next undo. A
/// save-distance counter tracks how many undo/redo moves away the on-disk
/// state is (`None` once it can no longer be reached).
#[derive(Debug, Default)]
pub struct HistoryManager {
    undo_stack: VecDeque<Snapshot>,
    redo_stack: Vec<Snapshot>,
    current: CanvasState,
    save_distance: Option<i64>,
}

impl HistoryManager {
    pub fn new(initial: CanvasState) -> Self {
        Self {
            current: initial,
            save_distance: Some(0),
            ..Self::default()
        }
    }

    /// Commit `state` as a new history entry. Does nothing and returns
    /// false when the canvas is unchanged, so callers can commit after
    /// every action without flooding the stack.
    pub fn save_to_history(&mut self, state: &CanvasState, delta_trans: Point) -> bool {
        if *state == self.current {
            return false;
        }

        // the inverse translation is what an undo must re-apply
        let previous = std::mem::replace(&mut self.current, state.clone());
        self.undo_stack.push_back(Snapshot {
            state: previous,
            delta_trans: -delta_trans,
        });
        self.save_distance = match self.save_distance {
            // the save point lived down the redo branch we just cut off
            Some(d) if d < 0 => None,
            Some(d) => Some(d + 1),
            None => None,
        };
        if self.undo_stack.len() > MAX_HISTORY_DEPTH {
            self.undo_stack.pop_front();
            // the evicted entry might have been the only path to the save point
            if self.save_distance.is_some_and(|d| d > self.undo_stack.len() as i64) {
                self.save_distance = None;
            }
        }
        self.redo_stack.clear();
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Step back one entry. Returns the restored canvas and the viewport
    /// translation to apply, or None with nothing to undo.
    pub fn undo(&mut self) -> Option<(CanvasState, Point)> {
        let snapshot = self.undo_stack.pop_back()?;
        let redone = std::mem::replace(&mut self.current, snapshot.state);
        self.redo_stack.push(Snapshot {
            state: redone,
            delta_trans: -snapshot.delta_trans,
        });
        if let Some(d) = &mut self.save_distance {
            *d -= 1;
        }
        Some((self.current.clone(), snapshot.delta_trans))
    }

    /// Inverse of [`undo`](Self::undo).
    pub fn redo(&mut self) -> Option<(CanvasState, Point)> {
        let snapshot = self.redo_stack.pop()?;
        let undone = std::mem::replace(&mut self.current, snapshot.state);
        self.undo_stack.push_back(Snapshot {
            state: undone,
            delta_trans: -snapshot.delta_trans,
        });
        if let Some(d) = &mut self.save_distance {
            *d += 1;
        }
        Some((self.current.clone(), snapshot.delta_trans))
    }

    /// The state the manager currently considers committed.
    pub fn current_state(&self) -> &CanvasState {
        &self.current
    }

    /// Replace the committed state without touching the stacks. Used when
    /// a file load swaps the canvas wholesale.
    pub fn imbue(&mut self, state: CanvasState) {
        self.current = state;
    }

    /// Whether the current stack position differs from the last save.
    pub fn changed_since_last_save(&self) -> bool {
        self.save_distance != Some(0)
    }

    /// Mark the current stack position as the on-disk state.
    pub fn set_saved(&mut self) {
        self.save_distance = Some(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, Logic};
    use crate::point::point;

    fn canvas_with_wires(count: i32) -> CanvasState {
        let mut state = CanvasState::default();
        for x in 0..count {
            state.set(point(x, 0), Element::ConductiveWire(Logic::LOW));
        }
        state
    }

    #[test]
    fn unchanged_canvas_is_not_pushed() {
        let mut history = HistoryManager::new(canvas_with_wires(1));
        assert!(!history.save_to_history(&canvas_with_wires(1), Point::ZERO));
        assert!(!history.can_undo());
        assert!(!history.changed_since_last_save());
    }

    #[test]
    fn undo_then_redo_round_trips() {
        let mut history = HistoryManager::new(canvas_with_wires(1));
        let edited = canvas_with_wires(2);
        assert!(history.save_to_history(&edited, point(3, 0)));

        let (undone, delta) = history.undo().unwrap();
        assert_eq!(undone, canvas_with_wires(1));
        assert_eq!(delta, point(-3, 0));

        let (redone, delta) = history.redo().unwrap();
        assert_eq!(redone, edited);
        assert_eq!(delta, point(3, 0));
    }

    #[test]
    fn undo_with_only_initial_state_is_none() {
        let mut history = HistoryManager::new(CanvasState::default());
        assert!(history.undo().is_none());
        assert!(history.redo().is_none());
    }

    #[test]
    fn new_edit_clears_the_redo_stack() {
        let mut history = HistoryManager::new(canvas_with_wires(1));
        history.save_to_history(&canvas_with_wires(2), Point::ZERO);
        history.undo().unwrap();
        assert!(history.can_redo());

        history.save_to_history(&canvas_with_wires(3), Point::ZERO);
        assert!(!history.can_redo());
    }

    #[test]
    fn save_marker_tracks_position() {
        let mut history = HistoryManager::new(canvas_with_wires(1));
        assert!(!history.changed_since_last_save());

        history.save_to_history(&canvas_with_wires(2), Point::ZERO);
        assert!(history.changed_since_last_save());

        history.set_saved();
        assert!(!history.changed_since_last_save());

        history.undo().unwrap();
        assert!(history.changed_since_last_save());
        history.redo().unwrap();
        assert!(!history.changed_since_last_save());
    }

    #[test]
    fn overwriting_an_undone_save_point_loses_it() {
        let mut history = HistoryManager::new(canvas_with_wires(1));
        history.save_to_history(&canvas_with_wires(2), Point::ZERO);
        history.set_saved();
        history.undo().unwrap();

        // branch off: the saved state is no longer reachable
        history.save_to_history(&canvas_with_wires(3), Point::ZERO);
        assert!(history.changed_since_last_save());
        history.undo().unwrap();
        assert!(history.changed_since_last_save());
    }

    #[test]
    fn depth_is_bounded() {
        let mut history = HistoryManager::new(canvas_with_wires(1));
        history.set_saved();
        for i in 2..(MAX_HISTORY_DEPTH as i32 + 10) {
            history.save_to_history(&canvas_with_wires(i), Point::ZERO);
        }
        let mut undos = 0;
        while history.undo().is_some() {
            undos += 1;
        }
        assert_eq!(undos, MAX_HISTORY_DEPTH);
        // the save point was evicted along the way
        assert!(history.changed_since_last_save());
    }
}
