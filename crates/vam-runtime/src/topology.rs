//! I/O topologies and port numbering

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a node port takes its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Host buffer streamed over a data port
    Buffer,
    /// Register-style port fed from inside the fabric
    Register,
}

/// Port configuration of a node, ordered (input-A, input-B, output)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Topology {
    BufBufBuf = 0,
    BufBufReg = 1,
    BufRegBuf = 2,
    BufRegReg = 3,
    RegBufBuf = 4,
    RegBufReg = 5,
    RegRegBuf = 6,
    RegRegReg = 7,
}

impl Topology {
    /// All variants in code order
    pub const ALL: [Self; 8] = [
        Self::BufBufBuf,
        Self::BufBufReg,
        Self::BufRegBuf,
        Self::BufRegReg,
        Self::RegBufBuf,
        Self::RegBufReg,
        Self::RegRegBuf,
        Self::RegRegReg,
    ];

    /// Numeric code
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look a variant up by code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Port kinds for (input-A, input-B, output)
    pub fn port_kinds(self) -> [PortKind; 3] {
        let code = self as u8;
        let kind = |bit: u8| {
            if code & bit == 0 {
                PortKind::Buffer
            } else {
                PortKind::Register
            }
        };
        [kind(0b100), kind(0b010), kind(0b001)]
    }

    /// Only all-buffer transfers have a protocol implementation
    pub const fn is_supported(self) -> bool {
        matches!(self, Self::BufBufBuf)
    }

    /// Output port is register-style
    pub fn output_is_register(self) -> bool {
        matches!(self.port_kinds()[2], PortKind::Register)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, out] = self.port_kinds();
        let name = |k: PortKind| match k {
            PortKind::Buffer => "Buf",
            PortKind::Register => "Reg",
        };
        write!(f, "{}_{}_{}", name(a), name(b), name(out))
    }
}

/// Whether a node port is tied to a caller buffer or to a buffer the
/// runtime owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tie {
    /// Caller-owned buffer
    #[default]
    External,
    /// Runtime-owned buffer, released on free
    Internal,
}

/// Node data port roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    InputA,
    InputB,
    Output,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InputA => "input-A",
            Self::InputB => "input-B",
            Self::Output => "output",
        })
    }
}

/// Data port numbers of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodePorts {
    pub in_a: u32,
    pub in_b: u32,
    pub out: u32,
}

impl NodePorts {
    /// Port number for a role
    pub const fn port(&self, port: Port) -> u32 {
        match port {
            Port::InputA => self.in_a,
            Port::InputB => self.in_b,
            Port::Output => self.out,
        }
    }

    /// All three ports
    pub const fn all(&self) -> [u32; 3] {
        [self.in_a, self.in_b, self.out]
    }

    /// Role of `port` on this slot
    pub fn role_of(&self, port: u32) -> Option<Port> {
        [Port::InputA, Port::InputB, Port::Output]
            .into_iter()
            .find(|role| self.port(*role) == port)
    }
}

/// Slot-to-port numbering: `base + stride * slot + {0, 1, 2}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    pub base: u32,
    pub stride: u32,
}

impl PortLayout {
    pub const fn new(base: u32, stride: u32) -> Self {
        Self { base, stride }
    }

    /// Data ports of `slot`
    pub const fn ports_for(&self, slot: u8) -> NodePorts {
        let first = self.base + self.stride * slot as u32;
        NodePorts {
            in_a: first,
            in_b: first + 1,
            out: first + 2,
        }
    }
}
