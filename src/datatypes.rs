use std::collections::BTreeMap;

use nalgebra::Vector3;

/// Node number as stored in the model and the result database
pub type NodeId = i32;

/// Node number used by the result database for padding records
pub const SENTINEL_NODE: NodeId = 0;

/// Reference position per node
pub type PositionMap = BTreeMap<NodeId, Vector3<f64>>;

/// Accumulated displacement per node
pub type DisplacementMap = BTreeMap<NodeId, Vector3<f64>>;

/// The two driving load magnitudes written into the load module
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loads {
    /// Vertical load (load case 2)
    pub v: f64,
    /// Horizontal load (load case 3)
    pub h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeCoordinate {
    pub node_id: NodeId,
    pub position: Vector3<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplacementSample {
    pub node_id: NodeId,
    pub displacement: Vector3<f64>,
}

/// Identifies a category of binary records in the result database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Selector {
    pub record_type: i32,
    pub subtype: i32,
}

impl Selector {
    /// Node coordinates
    pub const NODE_POSITIONS: Selector = Selector {
        record_type: 20,
        subtype: 0,
    };
    /// Nodal displacements, first component set
    pub const DISPLACEMENT_PRIMARY: Selector = Selector {
        record_type: 24,
        subtype: 2,
    };
    /// Nodal displacements, second component set
    pub const DISPLACEMENT_SECONDARY: Selector = Selector {
        record_type: 24,
        subtype: 3,
    };
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.record_type, self.subtype)
    }
}

/// A fixed-size record as returned by the result database: a node number
/// followed by three reals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRecord {
    pub node_id: NodeId,
    pub values: [f64; 3],
}

impl RawRecord {
    pub fn new(node_id: NodeId, x: f64, y: f64, z: f64) -> RawRecord {
        RawRecord {
            node_id,
            values: [x, y, z],
        }
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.values[0], self.values[1], self.values[2])
    }
}
