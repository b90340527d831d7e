use crate::canvas::CanvasState;
use crate::communicator::{
    Communicator, CommunicatorId, CommunicatorStore, FileInputCommunicator,
    FileOutputCommunicator, ScreenCommunicator,
};
use crate::element::{Element, GateKind, RelayKind};
use crate::matrix::Matrix;
use crate::point::{Point, point};

/// Neighbour offsets in the order devices resolve their pins: up, down,
/// left, right. Node numbering and device pin order both depend on this
/// being fixed.
const DIRECTIONS: [Point; 4] = [point(0, -1), point(0, 1), point(-1, 0), point(1, 0)];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    /// The canvas has no element that could drive or observe a net.
    /// Callers treat this as "nothing to simulate", not a failure.
    #[error("nothing to simulate")]
    Empty,
}

/// Per-cell mapping into the compiled netlist. Wire crossings keep one
/// node per axis; a relay cell maps to its relay pixel on both axes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PixelSlot {
    pub is_relay: bool,
    pub index: [Option<u32>; 2],
}

/// Range into [`Netlist::adj_relay_pixels`] listing the relay pixels that
/// touch a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeSpan {
    pub begin: u32,
    pub end: u32,
}

/// Drives its node high every tick.
#[derive(Debug)]
pub struct SourceDevice {
    pub output: u32,
}

/// Pure combinational device: reads the nodes of its adjacent signal
/// cells, drives its own node.
#[derive(Debug)]
pub struct GateDevice {
    pub kind: GateKind,
    pub inputs: Vec<u32>,
    pub output: u32,
}

/// Switch between up to four nodes, controlled by adjacent signal cells.
#[derive(Debug)]
pub struct RelayDevice {
    pub kind: RelayKind,
    pub inputs: Vec<u32>,
    pub pixel: u32,
}

/// The electrical side of one relay cell: the nodes its terminals touch.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayPixel {
    adj: [u32; 4],
    len: u8,
}

impl RelayPixel {
    fn push(&mut self, node: u32) {
        self.adj[self.len as usize] = node;
        self.len += 1;
    }

    pub fn nodes(&self) -> &[u32] {
        &self.adj[..self.len as usize]
    }
}

/// Bridges one node to an external resource.
#[derive(Debug)]
pub struct CommunicatorDevice {
    pub node: u32,
    pub handle: CommunicatorId,
}

/// Compiled electrical connectivity of a canvas: nodes (nets of
/// wire-joined cells and device terminals) plus the devices that read and
/// drive them. Rebuilt from scratch on every simulation start.
#[derive(Debug, Default)]
pub struct Netlist {
    pub node_count: usize,
    pub sources: Vec<SourceDevice>,
    pub gates: Vec<GateDevice>,
    pub relays: Vec<RelayDevice>,
    pub communicators: Vec<CommunicatorDevice>,
    pub relay_pixels: Vec<RelayPixel>,
    pub nodes: Vec<NodeSpan>,
    pub adj_relay_pixels: Vec<u32>,
    pub pixels: Matrix<PixelSlot>,
}

impl Netlist {
    pub fn device_count(&self) -> usize {
        self.sources.len() + self.gates.len() + self.relays.len() + self.communicators.len()
    }

    /// Relay pixels adjacent to `node`.
    pub fn relays_of_node(&self, node: u32) -> &[u32] {
        let span = self.nodes[node as usize];
        &self.adj_relay_pixels[span.begin as usize..span.end as usize]
    }

    /// Displayed level of a cell given the per-node and per-relay level
    /// arrays. Cells belonging to no kept net read low.
    pub fn pixel_level(&self, pt: Point, node_levels: &[bool], relay_levels: &[bool]) -> bool {
        let Some(slot) = self.pixels.get(pt) else {
            return false;
        };
        let levels = if slot.is_relay { relay_levels } else { node_levels };
        slot.index
            .iter()
            .flatten()
            .any(|&index| levels[index as usize])
    }
}

/// Derive a [`Netlist`] from a canvas.
///
/// Nodes are found by flood fill over 4-adjacent floodfillable cells, one
/// visit per axis so insulated wire carries both directions without
/// joining them; a signal never joins the net of a signal receiver (that
/// adjacency is a device pin instead). Node numbering follows the
/// first-encountered cell in row-major scan order, horizontal axis first,
/// which keeps compilation deterministic.
///
/// Communicator elements with a null handle get a fresh resource from
/// `store`, one per 4-connected group of same-kind cells; this is the only
/// way `state` is mutated.
pub fn compile(
    state: &mut CanvasState,
    store: &mut CommunicatorStore,
) -> Result<Netlist, CompileError> {
    let mut netlist = Netlist {
        pixels: Matrix::new(state.width(), state.height()),
        ..Netlist::default()
    };
    // adjacent relay pixels per node; flattened into CSR form at the end
    let mut node_relays: Vec<Vec<u32>> = Vec::new();

    for pt in state.points() {
        netlist.pixels[pt].is_relay = state.get(pt).is_relay();
    }

    // visited flags per axis: horizontal, vertical
    let mut visited: Matrix<[bool; 2]> = Matrix::new(state.width(), state.height());

    // pass 1: flood-fill the nodes
    for pt in state.points() {
        if !state.get(pt).is_floodfillable() {
            continue;
        }
        for axis in 0..2 {
            if visited[pt][axis] {
                continue;
            }

            // wire-only nets that touch nothing are culled
            let mut useful = false;
            let mut net_cells: Vec<(Point, usize)> = Vec::new();
            let mut stack = vec![(pt, axis)];

            while let Some((cur, cur_axis)) = stack.pop() {
                if visited[cur][cur_axis] {
                    continue;
                }
                visited[cur][cur_axis] = true;
                net_cells.push((cur, cur_axis));

                let cur_elem = state.get(cur);
                if cur_elem.is_useful() {
                    useful = true;
                }

                // everything except insulated wire joins its own axes
                if !matches!(cur_elem, Element::InsulatedWire(_)) && !visited[cur][1 - cur_axis] {
                    stack.push((cur, 1 - cur_axis));
                }

                for step in [-1, 1] {
                    let next = if cur_axis == 0 {
                        point(cur.x + step, cur.y)
                    } else {
                        point(cur.x, cur.y + step)
                    };
                    if !state.contains(next) {
                        continue;
                    }
                    let next_elem = state.get(next);
                    if !visited[next][cur_axis]
                        && next_elem.is_floodfillable()
                        && !(next_elem.is_signal_receiver() && cur_elem.is_signal())
                        && !(next_elem.is_signal() && cur_elem.is_signal_receiver())
                    {
                        stack.push((next, cur_axis));
                    }
                    if !useful && next_elem.is_relay() {
                        useful = true;
                    }
                }
            }

            if useful {
                let node = node_relays.len() as u32;
                for (cell, cell_axis) in net_cells {
                    netlist.pixels[cell].index[cell_axis] = Some(node);
                }
                node_relays.push(Vec::new());
            }
        }
    }

    // pass 2: sources
    for pt in state.points() {
        if let Element::Source(_) = state.get(pt) {
            let output = netlist.pixels[pt].index[0].expect("source cell always has a node");
            netlist.sources.push(SourceDevice { output });
        }
    }

    // pass 3: gates
    for pt in state.points() {
        let Some(kind) = state.get(pt).gate_kind() else {
            continue;
        };
        let output = netlist.pixels[pt].index[0].expect("gate cell always has a node");
        let mut inputs = Vec::new();
        for dir in DIRECTIONS {
            let next = pt + dir;
            if state.get(next).is_signal() {
                inputs
                    .push(netlist.pixels[next].index[0].expect("signal cell always has a node"));
            }
        }
        netlist.gates.push(GateDevice {
            kind,
            inputs,
            output,
        });
    }

    // pass 4: relays; adjacent relay pairs get a synthetic node between them
    let mut relay_done: Matrix<bool> = Matrix::new(state.width(), state.height());
    for pt in state.points() {
        relay_done[pt] = true;
        let Some(kind) = state.get(pt).relay_kind() else {
            continue;
        };

        let pixel = netlist.relay_pixels.len() as u32;
        netlist.relay_pixels.push(RelayPixel::default());
        let mut inputs = Vec::new();

        for dir in DIRECTIONS {
            let next = pt + dir;
            if !state.contains(next) {
                continue;
            }
            let next_elem = state.get(next);
            if next_elem.is_signal() {
                inputs
                    .push(netlist.pixels[next].index[0].expect("signal cell always has a node"));
            } else if next_elem.is_floodfillable() {
                // the axis facing the relay decides which net a crossing joins
                let axis = (dir.y != 0) as usize;
                let node = netlist.pixels[next].index[axis]
                    .expect("net adjacent to a relay is never culled");
                netlist.relay_pixels[pixel as usize].push(node);
                node_relays[node as usize].push(pixel);
            } else if next_elem.is_relay() && relay_done[next] {
                // relay-to-relay contact: synthesize a two-terminal node,
                // spawned once per pair by the scan-order check above
                let other = netlist.pixels[next].index[0]
                    .expect("processed relay has a pixel index");
                let node = node_relays.len() as u32;
                node_relays.push(vec![pixel, other]);
                netlist.relay_pixels[pixel as usize].push(node);
                netlist.relay_pixels[other as usize].push(node);
            }
        }

        netlist.relays.push(RelayDevice {
            kind,
            inputs,
            pixel,
        });
        netlist.pixels[pt].index = [Some(pixel), Some(pixel)];
    }

    // pass 5: communicators, one device per connected group of same-kind
    // cells; attach store resources to any group without one
    let mut comm_done: Matrix<bool> = Matrix::new(state.width(), state.height());
    for pt in state.points() {
        let elem = state.get(pt);
        if !elem.is_communicator() || comm_done[pt] {
            continue;
        }

        let kind = elem.kind_index();
        let mut group = Vec::new();
        let mut stack = vec![pt];
        while let Some(cur) = stack.pop() {
            if comm_done[cur] {
                continue;
            }
            comm_done[cur] = true;
            group.push(cur);
            for dir in DIRECTIONS {
                let next = cur + dir;
                if state.contains(next)
                    && !comm_done[next]
                    && state.get(next).kind_index() == kind
                {
                    stack.push(next);
                }
            }
        }

        let existing = group
            .iter()
            .filter_map(|&cell| state.get(cell).communicator())
            .find(|&id| store.contains(id));
        let handle = existing.unwrap_or_else(|| {
            store.insert(match state.get(pt) {
                Element::ScreenCommunicator(..) => {
                    Communicator::Screen(ScreenCommunicator::default())
                }
                Element::FileInputCommunicator(..) => {
                    Communicator::FileInput(FileInputCommunicator::default())
                }
                Element::FileOutputCommunicator(..) => {
                    Communicator::FileOutput(FileOutputCommunicator::default())
                }
                _ => unreachable!("group members are communicators"),
            })
        });
        for &cell in &group {
            state.cell_mut(cell).set_communicator(handle);
        }

        // the group is one 4-connected net, so any member cell names it
        let node = netlist.pixels[pt].index[0].expect("communicator cell always has a node");
        netlist.communicators.push(CommunicatorDevice { node, handle });
    }

    netlist.node_count = node_relays.len();
    if netlist.node_count == 0 && netlist.device_count() == 0 {
        return Err(CompileError::Empty);
    }

    // flatten the node -> relay-pixel adjacency
    for relays in &node_relays {
        let begin = netlist.adj_relay_pixels.len() as u32;
        netlist.adj_relay_pixels.extend_from_slice(relays);
        netlist.nodes.push(NodeSpan {
            begin,
            end: netlist.adj_relay_pixels.len() as u32,
        });
    }

    log::debug!(
        "compiled netlist: {} nodes, {} sources, {} gates, {} relays, {} communicators",
        netlist.node_count,
        netlist.sources.len(),
        netlist.gates.len(),
        netlist.relays.len(),
        netlist.communicators.len()
    );
    Ok(netlist)
}
