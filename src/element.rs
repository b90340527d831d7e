use crate::communicator::CommunicatorId;

/// Live and reset logic levels carried by every non-empty element.
#[derive(
    serde::Deserialize, serde::Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash,
)]
pub struct Logic {
    /// Current level, true = HIGH. While the simulation is stopped this is
    /// the last live level written back by the simulator.
    pub level: bool,
    /// Level restored by reset().
    pub default_level: bool,
}

impl Logic {
    pub const LOW: Self = Self {
        level: false,
        default_level: false,
    };
    pub const HIGH: Self = Self {
        level: true,
        default_level: true,
    };
}

/// One grid cell. The variant set is closed; the compiler and the tick
/// engine match on it exhaustively.
#[derive(
    serde::Deserialize, serde::Serialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum Element {
    #[default]
    Empty,
    ConductiveWire(Logic),
    /// Carries the horizontal and vertical runs through a cell without
    /// electrically joining them.
    InsulatedWire(Logic),
    Signal(Logic),
    Source(Logic),
    PositiveRelay(Logic),
    NegativeRelay(Logic),
    AndGate(Logic),
    OrGate(Logic),
    NandGate(Logic),
    NorGate(Logic),
    ScreenCommunicator(Logic, CommunicatorId),
    FileInputCommunicator(Logic, CommunicatorId),
    FileOutputCommunicator(Logic, CommunicatorId),
}

/// Combinational function of a gate element.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    And,
    Or,
    Nand,
    Nor,
}

/// Conduction condition of a relay element.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    /// Conducts while any control input is HIGH.
    Positive,
    /// Conducts while any control input is LOW.
    Negative,
}

impl Element {
    /// A source starts out driving HIGH; everything else starts LOW.
    pub fn source() -> Self {
        Self::Source(Logic::HIGH)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Signal(_))
    }

    pub fn is_gate(&self) -> bool {
        matches!(
            self,
            Self::AndGate(_) | Self::OrGate(_) | Self::NandGate(_) | Self::NorGate(_)
        )
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, Self::PositiveRelay(_) | Self::NegativeRelay(_))
    }

    pub fn is_communicator(&self) -> bool {
        matches!(
            self,
            Self::ScreenCommunicator(..)
                | Self::FileInputCommunicator(..)
                | Self::FileOutputCommunicator(..)
        )
    }

    /// Receives from adjacent signals rather than joining their net.
    pub fn is_signal_receiver(&self) -> bool {
        matches!(self, Self::Source(_)) || self.is_gate() || self.is_relay() || self.is_communicator()
    }

    /// Participates in the node flood fill (everything except Empty and
    /// relays; a relay cell is a switch between nets, not part of one).
    pub fn is_floodfillable(&self) -> bool {
        !self.is_empty() && !self.is_relay()
    }

    /// A node containing one of these is worth keeping; nets made purely of
    /// wire drive nothing and are culled unless a relay touches them.
    pub fn is_useful(&self) -> bool {
        matches!(self, Self::Signal(_) | Self::Source(_)) || self.is_gate() || self.is_communicator()
    }

    pub fn gate_kind(&self) -> Option<GateKind> {
        match self {
            Self::AndGate(_) => Some(GateKind::And),
            Self::OrGate(_) => Some(GateKind::Or),
            Self::NandGate(_) => Some(GateKind::Nand),
            Self::NorGate(_) => Some(GateKind::Nor),
            _ => None,
        }
    }

    pub fn relay_kind(&self) -> Option<RelayKind> {
        match self {
            Self::PositiveRelay(_) => Some(RelayKind::Positive),
            Self::NegativeRelay(_) => Some(RelayKind::Negative),
            _ => None,
        }
    }

    pub fn logic(&self) -> Option<Logic> {
        match self {
            Self::Empty => None,
            Self::ConductiveWire(l)
            | Self::InsulatedWire(l)
            | Self::Signal(l)
            | Self::Source(l)
            | Self::PositiveRelay(l)
            | Self::NegativeRelay(l)
            | Self::AndGate(l)
            | Self::OrGate(l)
            | Self::NandGate(l)
            | Self::NorGate(l)
            | Self::ScreenCommunicator(l, _)
            | Self::FileInputCommunicator(l, _)
            | Self::FileOutputCommunicator(l, _) => Some(*l),
        }
    }

    pub fn logic_mut(&mut self) -> Option<&mut Logic> {
        match self {
            Self::Empty => None,
            Self::ConductiveWire(l)
            | Self::InsulatedWire(l)
            | Self::Signal(l)
            | Self::Source(l)
            | Self::PositiveRelay(l)
            | Self::NegativeRelay(l)
            | Self::AndGate(l)
            | Self::OrGate(l)
            | Self::NandGate(l)
            | Self::NorGate(l)
            | Self::ScreenCommunicator(l, _)
            | Self::FileInputCommunicator(l, _)
            | Self::FileOutputCommunicator(l, _) => Some(l),
        }
    }

    pub fn logic_level(&self) -> bool {
        self.logic().map(|l| l.level).unwrap_or(false)
    }

    pub fn default_logic_level(&self) -> bool {
        self.logic().map(|l| l.default_level).unwrap_or(false)
    }

    pub fn set_logic_level(&mut self, level: bool) {
        if let Some(l) = self.logic_mut() {
            l.level = level;
        }
    }

    pub fn reset_logic_level(&mut self) {
        if let Some(l) = self.logic_mut() {
            l.level = l.default_level;
        }
    }

    pub fn communicator(&self) -> Option<CommunicatorId> {
        match self {
            Self::ScreenCommunicator(_, c)
            | Self::FileInputCommunicator(_, c)
            | Self::FileOutputCommunicator(_, c) => Some(*c),
            _ => None,
        }
    }

    pub fn set_communicator(&mut self, id: CommunicatorId) {
        match self {
            Self::ScreenCommunicator(_, c)
            | Self::FileInputCommunicator(_, c)
            | Self::FileOutputCommunicator(_, c) => *c = id,
            _ => panic!("element has no communicator handle"),
        }
    }

    /// Stable ordinal used by the on-disk byte layout. Must not be
    /// reordered; the save format encodes it in the upper six bits of each
    /// cell byte.
    pub fn kind_index(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::ConductiveWire(_) => 1,
            Self::InsulatedWire(_) => 2,
            Self::Signal(_) => 3,
            Self::Source(_) => 4,
            Self::PositiveRelay(_) => 5,
            Self::NegativeRelay(_) => 6,
            Self::AndGate(_) => 7,
            Self::OrGate(_) => 8,
            Self::NandGate(_) => 9,
            Self::NorGate(_) => 10,
            Self::ScreenCommunicator(..) => 11,
            Self::FileInputCommunicator(..) => 12,
            Self::FileOutputCommunicator(..) => 13,
        }
    }

    /// Inverse of [`kind_index`](Self::kind_index). Communicator handles
    /// come back null; they are re-attached on the next compile.
    pub fn from_kind_index(index: u8, logic: Logic) -> Option<Self> {
        Some(match index {
            0 => Self::Empty,
            1 => Self::ConductiveWire(logic),
            2 => Self::InsulatedWire(logic),
            3 => Self::Signal(logic),
            4 => Self::Source(logic),
            5 => Self::PositiveRelay(logic),
            6 => Self::NegativeRelay(logic),
            7 => Self::AndGate(logic),
            8 => Self::OrGate(logic),
            9 => Self::NandGate(logic),
            10 => Self::NorGate(logic),
            11 => Self::ScreenCommunicator(logic, CommunicatorId::default()),
            12 => Self::FileInputCommunicator(logic, CommunicatorId::default()),
            13 => Self::FileOutputCommunicator(logic, CommunicatorId::default()),
            _ => return None,
        })
    }

    fn base_color(&self) -> [u8; 3] {
        match self {
            Self::Empty => [0, 0, 0],
            Self::ConductiveWire(_) => [0x99, 0x99, 0x99],
            Self::InsulatedWire(_) => [0x00, 0x66, 0x44],
            Self::Signal(_) => [0xFF, 0xFF, 0x00],
            Self::Source(_) => [0x00, 0xFF, 0x00],
            Self::PositiveRelay(_) => [0xFF, 0x99, 0x00],
            Self::NegativeRelay(_) => [0xFF, 0x33, 0x00],
            Self::AndGate(_) => [0xFF, 0x00, 0xFF],
            Self::OrGate(_) => [0x99, 0x00, 0xFF],
            Self::NandGate(_) => [0x66, 0x88, 0xFF],
            Self::NorGate(_) => [0x00, 0x88, 0xFF],
            Self::ScreenCommunicator(..) => [0xFF, 0x00, 0x00],
            Self::FileInputCommunicator(..) => [0x00, 0xCC, 0xCC],
            Self::FileOutputCommunicator(..) => [0xCC, 0x66, 0x00],
        }
    }

    /// Render color for the given level. Elements brighten towards white
    /// when HIGH and dim towards black when LOW; communicators keep a
    /// stronger contrast so transmit activity stands out.
    pub fn display_color(&self, level: bool) -> [u8; 3] {
        let [r, g, b] = self.base_color();
        let (num, den) = if self.is_communicator() { (1, 3) } else { (2, 3) };
        let scale = |c: u8| -> u8 {
            if level {
                0xFF - ((0xFF - c as u32) * num / den) as u8
            } else {
                ((c as u32) * num / den) as u8
            }
        };
        [scale(r), scale(g), scale(b)]
    }
}
