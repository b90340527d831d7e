use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::canvas::CanvasState;
use crate::communicator::{Communicator, CommunicatorStore};
use crate::compile::{self, CompileError, Netlist};
use crate::element::{Element, GateKind, RelayKind};
use crate::point::Point;

/// Pending external events are bounded so a spamming input tool can never
/// block the tick loop; the oldest event is dropped on overflow.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// An input-tool event targeting a communicator device of the compiled
/// netlist (device indices are deterministic, see the compiler).
#[derive(Debug, Clone, Copy)]
pub struct CommunicatorEvent {
    pub device: usize,
    pub pressed: bool,
}

/// One complete set of logic levels. A tick computes a fresh `LevelState`
/// from the previous one and publishes it as a whole, so readers never see
/// a half-applied tick.
#[derive(Debug, Clone)]
pub struct LevelState {
    pub node_levels: Vec<bool>,
    pub relay_levels: Vec<bool>,
    pub relay_conductive: Vec<bool>,
    pub comm_transmit: Vec<bool>,
}

impl LevelState {
    fn blank(netlist: &Netlist) -> Self {
        Self {
            node_levels: vec![false; netlist.node_count],
            relay_levels: vec![false; netlist.relay_pixels.len()],
            relay_conductive: vec![false; netlist.relay_pixels.len()],
            comm_transmit: vec![false; netlist.communicators.len()],
        }
    }
}

/// State shared with the simulation thread while running.
struct SimShared {
    netlist: Netlist,
    /// Last completed tick. Locked only for the brief publish/clone.
    latest: Mutex<Arc<LevelState>>,
    stopping: AtomicBool,
    sleep_lock: Mutex<()>,
    sleep_cv: Condvar,
}

/// A torn-free snapshot of the running simulation for presentation reads.
pub struct LiveView {
    shared: Arc<SimShared>,
    levels: Arc<LevelState>,
}

impl LiveView {
    /// Displayed level of a canvas cell.
    pub fn level_at(&self, pt: Point) -> bool {
        self.shared
            .netlist
            .pixel_level(pt, &self.levels.node_levels, &self.levels.relay_levels)
    }

    /// Whether communicator device `device` transmitted HIGH last tick.
    pub fn communicator_transmit(&self, device: usize) -> Option<bool> {
        self.levels.comm_transmit.get(device).copied()
    }
}

/// Owns the compiled netlist and the tick loop.
///
/// `Stopped -> start() -> Running -> stop() -> Stopped`; `step()` is a
/// whole compile/tick/write-back cycle while stopped. The netlist is
/// rebuilt from the canvas on every (re)start and dropped on stop, after
/// the live levels are written back onto the canvas elements.
pub struct Simulator {
    shared: Option<Arc<SimShared>>,
    thread: Option<JoinHandle<()>>,
    period_nanos: Arc<AtomicU64>,
    events: Arc<Mutex<VecDeque<CommunicatorEvent>>>,
    communicators: Arc<Mutex<CommunicatorStore>>,
}

impl Simulator {
    pub fn new(communicators: Arc<Mutex<CommunicatorStore>>, period: Duration) -> Self {
        Self {
            shared: None,
            thread: None,
            period_nanos: Arc::new(AtomicU64::new(period.as_nanos() as u64)),
            events: Arc::new(Mutex::new(VecDeque::new())),
            communicators,
        }
    }

    pub fn running(&self) -> bool {
        self.thread.is_some()
    }

    /// Minimum time between ticks; zero means free-running.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos.load(Ordering::Acquire))
    }

    pub fn set_period(&self, period: Duration) {
        self.period_nanos
            .store(period.as_nanos() as u64, Ordering::Release);
    }

    /// Queue an external event for a screen communicator. Applied at the
    /// start of the next tick; safe to call from any thread.
    pub fn send_communicator_event(&self, device: usize, pressed: bool) {
        let mut events = self.events.lock();
        if events.len() == EVENT_QUEUE_CAPACITY {
            events.pop_front();
            log::warn!("communicator event queue full, dropping oldest event");
        }
        events.push_back(CommunicatorEvent { device, pressed });
    }

    /// Compile the canvas and spawn the tick loop. Returns false when the
    /// canvas has nothing to simulate.
    pub fn start(&mut self, state: &mut CanvasState) -> bool {
        assert!(!self.running(), "start() requires a stopped simulator");

        let netlist = {
            let mut comms = self.communicators.lock();
            match compile::compile(state, &mut comms) {
                Ok(netlist) => netlist,
                Err(CompileError::Empty) => {
                    log::info!("nothing to simulate");
                    return false;
                }
            }
        };
        let initial = initial_levels(&netlist, state);

        let shared = Arc::new(SimShared {
            netlist,
            latest: Mutex::new(Arc::new(initial)),
            stopping: AtomicBool::new(false),
            sleep_lock: Mutex::new(()),
            sleep_cv: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let period_nanos = Arc::clone(&self.period_nanos);
        let events = Arc::clone(&self.events);
        let communicators = Arc::clone(&self.communicators);
        self.thread = Some(
            thread::Builder::new()
                .name("simulation".to_owned())
                .spawn(move || run(&thread_shared, &period_nanos, &events, &communicators))
                .expect("failed to spawn simulation thread"),
        );
        self.shared = Some(shared);
        log::info!("simulation started");
        true
    }

    /// Stop the tick loop, write the live levels back onto the canvas and
    /// drop the netlist. Safe to call mid-tick; the in-flight tick is
    /// discarded so the canvas reflects the state the user saw.
    pub fn stop(&mut self, state: &mut CanvasState) {
        assert!(self.running(), "stop() requires a running simulator");
        let shared = self.halt_thread().expect("running simulator has shared state");

        let levels = shared.latest.lock().clone();
        write_levels(&shared.netlist, &levels, state);
        self.communicators.lock().flush_file_outputs();
        log::info!("simulation stopped");
    }

    /// One compile/tick/write-back cycle for single-step debugging.
    /// Returns false when the canvas has nothing to simulate.
    pub fn step(&mut self, state: &mut CanvasState) -> bool {
        assert!(!self.running(), "step() requires a stopped simulator");

        let mut comms = self.communicators.lock();
        let netlist = match compile::compile(state, &mut comms) {
            Ok(netlist) => netlist,
            Err(CompileError::Empty) => {
                log::info!("nothing to simulate");
                return false;
            }
        };
        let initial = initial_levels(&netlist, state);
        let mut events = self.events.lock();
        let next = calculate(&netlist, &mut comms, &mut events, &initial);
        drop(events);
        write_levels(&netlist, &next, state);
        comms.flush_file_outputs();
        true
    }

    /// Restore every element and communicator to its default state. The
    /// caller (StateManager) stops and restarts a running simulation
    /// around this.
    pub fn reset(&mut self, state: &mut CanvasState) {
        assert!(!self.running(), "reset() requires a stopped simulator");
        state.reset_logic_levels();
        self.communicators.lock().refresh_all();
        self.events.lock().clear();
        log::debug!("simulation state reset to defaults");
    }

    /// Snapshot for presentation reads; None while stopped.
    pub fn live_view(&self) -> Option<LiveView> {
        let shared = self.shared.as_ref()?;
        let levels = shared.latest.lock().clone();
        Some(LiveView {
            shared: Arc::clone(shared),
            levels,
        })
    }

    /// Width/height the running netlist was compiled for.
    pub fn compiled_size(&self) -> Option<Point> {
        self.shared.as_ref().map(|shared| shared.netlist.pixels.size())
    }

    fn halt_thread(&mut self) -> Option<Arc<SimShared>> {
        let shared = self.shared.take()?;
        {
            let _guard = shared.sleep_lock.lock();
            shared.stopping.store(true, Ordering::Release);
        }
        shared.sleep_cv.notify_one();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("simulation thread panicked");
        }
        Some(shared)
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if self.running() {
            log::warn!("simulator dropped while running; live levels are lost");
            self.halt_thread();
        }
    }
}

/// The tick loop. Runs until `stopping` is observed; when a period is set
/// it paces itself against wall-clock deadlines, absorbing calculation
/// time as long as a tick fits in one period.
fn run(
    shared: &Arc<SimShared>,
    period_nanos: &AtomicU64,
    events: &Mutex<VecDeque<CommunicatorEvent>>,
    communicators: &Mutex<CommunicatorStore>,
) {
    let mut next_step = Instant::now();
    loop {
        let old = shared.latest.lock().clone();
        let new = {
            let mut comms = communicators.lock();
            let mut events = events.lock();
            calculate(&shared.netlist, &mut comms, &mut events, &old)
        };

        // discard the in-flight tick when asked to stop, so the canvas
        // write-back matches what was last published
        if shared.stopping.load(Ordering::Acquire) {
            break;
        }

        *shared.latest.lock() = Arc::new(new);

        let period = Duration::from_nanos(period_nanos.load(Ordering::Acquire));
        if !period.is_zero() {
            next_step += period;
            let now = Instant::now();
            if next_step > now {
                let mut guard = shared.sleep_lock.lock();
                if !shared.stopping.load(Ordering::Relaxed) {
                    shared.sleep_cv.wait_until(&mut guard, next_step);
                }
            } else {
                // the tick rate is outrunning the period; don't accumulate debt
                next_step = now;
            }
        }
    }
}

/// Seed levels from the canvas elements: sources drive, gates re-drive
/// their stored output level, relays restore their stored conduction.
fn initial_levels(netlist: &Netlist, state: &CanvasState) -> LevelState {
    let mut levels = LevelState::blank(netlist);
    for pt in state.points() {
        let element = state.get(pt);
        match element {
            Element::Source(_) => {
                let node = netlist.pixels[pt].index[0].expect("source cell always has a node");
                levels.node_levels[node as usize] = true;
            }
            _ if element.is_gate() => {
                if element.logic_level() {
                    let node =
                        netlist.pixels[pt].index[0].expect("gate cell always has a node");
                    levels.node_levels[node as usize] = true;
                }
            }
            _ if element.is_relay() => {
                if element.logic_level() {
                    let pixel =
                        netlist.pixels[pt].index[0].expect("relay cell always has a pixel");
                    levels.relay_conductive[pixel as usize] = true;
                }
            }
            _ => {}
        }
    }
    flood_fill(netlist, &mut levels);
    levels
}

/// One synchronous tick: every device reads `old` and writes into a fresh
/// all-low state, so no device observes another device's update from the
/// same tick. Feedback loops therefore evolve tick over tick; there is
/// deliberately no intra-tick fixed-point iteration.
fn calculate(
    netlist: &Netlist,
    comms: &mut CommunicatorStore,
    events: &mut VecDeque<CommunicatorEvent>,
    old: &LevelState,
) -> LevelState {
    let mut new = LevelState::blank(netlist);

    // queued external events land in their communicator queues first
    for event in events.drain(..) {
        match netlist.communicators.get(event.device) {
            Some(device) => match comms.get_mut(device.handle) {
                Communicator::Screen(screen) => screen.insert_event(event.pressed),
                _ => log::warn!(
                    "communicator event for non-screen device {}",
                    event.device
                ),
            },
            None => log::warn!("communicator event for unknown device {}", event.device),
        }
    }

    for source in &netlist.sources {
        new.node_levels[source.output as usize] = true;
    }

    for gate in &netlist.gates {
        let output = &mut new.node_levels[gate.output as usize];
        if !*output {
            let high = |&index: &u32| old.node_levels[index as usize];
            *output = match gate.kind {
                GateKind::And => gate.inputs.iter().all(high),
                GateKind::Or => gate.inputs.iter().any(high),
                GateKind::Nand => !gate.inputs.iter().all(high),
                GateKind::Nor => !gate.inputs.iter().any(high),
            };
        }
    }

    for relay in &netlist.relays {
        new.relay_conductive[relay.pixel as usize] = match relay.kind {
            RelayKind::Positive => relay
                .inputs
                .iter()
                .any(|&index| old.node_levels[index as usize]),
            RelayKind::Negative => relay
                .inputs
                .iter()
                .any(|&index| !old.node_levels[index as usize]),
        };
    }

    for (index, device) in netlist.communicators.iter().enumerate() {
        let communicator = comms.get_mut(device.handle);
        let level = old.node_levels[device.node as usize];
        communicator.transmit(level);
        new.comm_transmit[index] = level;
        if communicator.receive() {
            new.node_levels[device.node as usize] = true;
        }
    }

    flood_fill(netlist, &mut new);
    new
}

/// Propagate HIGH levels across nodes joined by conducting relay pixels.
/// Driven nodes are the seeds; a conducting relay pixel carries the level
/// to every node it touches.
fn flood_fill(netlist: &Netlist, levels: &mut LevelState) {
    // (is_relay_pixel, index)
    let mut stack: Vec<(bool, u32)> = Vec::new();
    for node in 0..netlist.node_count {
        if levels.node_levels[node] {
            // re-marked by the fill itself
            levels.node_levels[node] = false;
            stack.push((false, node as u32));
        }
    }

    while let Some((is_relay, index)) = stack.pop() {
        if is_relay {
            if levels.relay_levels[index as usize] {
                continue;
            }
            levels.relay_levels[index as usize] = true;
            for &node in netlist.relay_pixels[index as usize].nodes() {
                if !levels.node_levels[node as usize] {
                    stack.push((false, node));
                }
            }
        } else {
            if levels.node_levels[index as usize] {
                continue;
            }
            levels.node_levels[index as usize] = true;
            for &pixel in netlist.relays_of_node(index) {
                if levels.relay_conductive[pixel as usize]
                    && !levels.relay_levels[pixel as usize]
                {
                    stack.push((true, pixel));
                }
            }
        }
    }
}

/// Write the displayed level of every cell back onto the canvas elements.
fn write_levels(netlist: &Netlist, levels: &LevelState, state: &mut CanvasState) {
    for pt in state.points() {
        let level = netlist.pixel_level(pt, &levels.node_levels, &levels.relay_levels);
        state.cell_mut(pt).set_logic_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Logic;
    use crate::point::point;

    fn new_simulator() -> Simulator {
        let _ = env_logger::builder().is_test(true).try_init();
        Simulator::new(
            Arc::new(Mutex::new(CommunicatorStore::default())),
            Duration::ZERO,
        )
    }

    fn wire() -> Element {
        Element::ConductiveWire(Logic::LOW)
    }

    fn signal() -> Element {
        Element::Signal(Logic::LOW)
    }

    /// Source feeding one AND input through a wire, second input low.
    fn and_gate_canvas() -> CanvasState {
        let mut state = CanvasState::default();
        state.set(point(0, 0), Element::source());
        state.set(point(1, 0), wire());
        state.set(point(2, 0), signal());
        state.set(point(2, 1), Element::AndGate(Logic::LOW));
        state.set(point(2, 2), signal());
        state
    }

    #[test]
    fn step_on_empty_canvas_is_a_no_op() {
        let mut simulator = new_simulator();
        let mut state = CanvasState::default();
        assert!(!simulator.step(&mut state));
        assert!(!simulator.start(&mut state));
        assert!(!simulator.running());
    }

    #[test]
    fn and_gate_with_one_low_input_outputs_low() {
        let mut simulator = new_simulator();
        let mut state = and_gate_canvas();
        assert!(simulator.step(&mut state));

        // the source's net is live, the second signal stays low
        assert!(state.get(point(0, 0)).logic_level());
        assert!(state.get(point(1, 0)).logic_level());
        assert!(state.get(point(2, 0)).logic_level());
        assert!(!state.get(point(2, 2)).logic_level());
        // 1 AND 0 = 0
        assert!(!state.get(point(2, 1)).logic_level());
    }

    #[test]
    fn reset_restores_default_levels() {
        let mut simulator = new_simulator();
        let mut state = and_gate_canvas();
        simulator.step(&mut state);
        assert!(state.get(point(1, 0)).logic_level());

        simulator.reset(&mut state);
        assert!(!state.get(point(1, 0)).logic_level());
        assert!(state.get(point(0, 0)).logic_level()); // source defaults high
    }

    #[test]
    fn ticks_are_deterministic() {
        let mut simulator_a = new_simulator();
        let mut simulator_b = new_simulator();
        let mut state_a = and_gate_canvas();
        let mut state_b = and_gate_canvas();
        for _ in 0..5 {
            simulator_a.step(&mut state_a);
            simulator_b.step(&mut state_b);
        }
        assert_eq!(state_a, state_b);
    }

    #[test]
    fn nand_feedback_loop_oscillates() {
        // NAND with its only input signal tied back to its own output net:
        //   wire   wire
        //   signal nand
        let mut state = CanvasState::default();
        state.set(point(0, 0), wire());
        state.set(point(1, 0), wire());
        state.set(point(0, 1), signal());
        state.set(point(1, 1), Element::NandGate(Logic::LOW));

        let mut simulator = new_simulator();
        let mut level = state.get(point(1, 1)).logic_level();
        assert!(!level);
        for _ in 0..6 {
            simulator.step(&mut state);
            let next = state.get(point(1, 1)).logic_level();
            assert_ne!(next, level, "oscillator must toggle every tick");
            level = next;
        }
    }

    fn relay_canvas(with_control_source: bool) -> CanvasState {
        // source -> wire above the relay is terminal A (driven); the wire
        // right of the relay is terminal B (floating); the signal below is
        // the control, fed through a wire from its own source
        let mut state = CanvasState::default();
        state.set(point(0, 0), Element::source());
        state.set(point(1, 0), wire());
        state.set(point(1, 1), Element::PositiveRelay(Logic::LOW));
        state.set(point(2, 1), wire());
        state.set(point(1, 2), signal());
        state.set(point(1, 3), wire());
        if with_control_source {
            state.set(point(0, 3), Element::source());
        }
        state
    }

    #[test]
    fn conducting_relay_merges_terminals_in_one_tick() {
        let mut simulator = new_simulator();
        let mut state = relay_canvas(true);
        simulator.step(&mut state);
        assert!(state.get(point(1, 2)).logic_level(), "control is high");
        assert!(state.get(point(1, 0)).logic_level(), "driven terminal");
        assert!(
            state.get(point(2, 1)).logic_level(),
            "floating terminal must pick up the level through the relay"
        );
        assert!(state.get(point(1, 1)).logic_level(), "relay pixel is live");
    }

    #[test]
    fn isolating_relay_keeps_terminals_independent() {
        let mut simulator = new_simulator();
        let mut state = relay_canvas(false);
        simulator.step(&mut state);
        assert!(!state.get(point(1, 2)).logic_level(), "control is low");
        assert!(state.get(point(1, 0)).logic_level(), "driven terminal");
        assert!(
            !state.get(point(2, 1)).logic_level(),
            "isolated terminal keeps its own level"
        );
    }

    #[test]
    fn negative_relay_conducts_on_low_control() {
        let mut state = relay_canvas(false);
        let (changed, _) = state.set(point(1, 1), Element::NegativeRelay(Logic::LOW));
        assert!(changed);
        let mut simulator = new_simulator();
        simulator.step(&mut state);
        assert!(state.get(point(2, 1)).logic_level());
    }

    #[test]
    fn screen_communicator_event_drives_its_net() {
        let mut state = CanvasState::default();
        state.set(
            point(0, 0),
            Element::ScreenCommunicator(Logic::LOW, Default::default()),
        );
        state.set(point(1, 0), wire());

        let mut simulator = new_simulator();
        simulator.send_communicator_event(0, true);
        simulator.step(&mut state);
        assert!(state.get(point(0, 0)).logic_level());
        assert!(state.get(point(1, 0)).logic_level());

        // a press is held until released
        simulator.step(&mut state);
        assert!(state.get(point(0, 0)).logic_level());
        simulator.send_communicator_event(0, false);
        simulator.step(&mut state);
        assert!(!state.get(point(0, 0)).logic_level());
    }

    #[test]
    fn event_queue_drops_oldest_on_overflow() {
        let simulator = new_simulator();
        for _ in 0..EVENT_QUEUE_CAPACITY + 5 {
            simulator.send_communicator_event(0, true);
        }
        assert_eq!(simulator.events.lock().len(), EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn start_and_stop_round_trip() {
        let mut simulator = new_simulator();
        simulator.set_period(Duration::from_micros(50));
        let mut state = and_gate_canvas();

        assert!(simulator.start(&mut state));
        assert!(simulator.running());
        let view = simulator.live_view().expect("running simulator has a view");
        // the source node is high in every published state
        assert!(view.level_at(point(0, 0)));
        assert_eq!(simulator.compiled_size(), Some(state.size()));

        simulator.stop(&mut state);
        assert!(!simulator.running());
        assert!(simulator.live_view().is_none());
        // live levels were written back
        assert!(state.get(point(1, 0)).logic_level());
    }

    #[test]
    fn stop_discards_the_in_flight_tick() {
        // with a zero period the loop spins freely; stop() must still join
        // promptly and leave a coherent state
        let mut simulator = new_simulator();
        let mut state = and_gate_canvas();
        assert!(simulator.start(&mut state));
        std::thread::sleep(Duration::from_millis(5));
        simulator.stop(&mut state);
        assert!(!state.get(point(2, 1)).logic_level());
    }

    #[test]
    #[should_panic(expected = "requires a stopped simulator")]
    fn step_while_running_is_a_contract_violation() {
        let mut simulator = new_simulator();
        let mut state = and_gate_canvas();
        simulator.start(&mut state);
        let _ = simulator.step(&mut state);
    }
}
