use std::path::Path;

use nalgebra::Vector3;

use crate::{
    datatypes::{
        DisplacementMap, DisplacementSample, NodeCoordinate, PositionMap, RawRecord, Selector,
        SENTINEL_NODE,
    },
    error::FlambError,
};

/// Sequential, typed access to a binary result database
///
/// The database is rewritten by every solver run, so a binding is opened,
/// scanned and closed once per cycle. Use [`StoreSession`] rather than
/// calling these directly; it guarantees `close` on every exit path.
pub trait ResultStore {
    /// Binds the database at `path` and returns the backend status code
    fn open(&mut self, path: &Path) -> Result<i32, FlambError>;

    /// Whether an `open` status means the database is ready to read
    fn is_ready(&self, status: i32) -> bool {
        status != 0
    }

    /// Fetches the next record of `selector`, or `None` once the set is
    /// exhausted
    fn next_record(&mut self, selector: Selector) -> Option<RawRecord>;

    /// Releases the binding and returns the final status code
    fn close(&mut self) -> i32;
}

/// Status codes observed while reading one record set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReport {
    pub open_status: i32,
    pub ready: bool,
    pub close_status: i32,
    pub records: usize,
    /// Records left over on the primary and secondary selector when a
    /// lockstep scan ends with one side exhausted
    pub unpaired: (usize, usize),
}

/// An open binding that is closed when dropped
pub struct StoreSession<'a, S: ResultStore + ?Sized> {
    store: &'a mut S,
    open_status: i32,
    closed: bool,
}

impl<'a, S: ResultStore + ?Sized> StoreSession<'a, S> {
    pub fn open(store: &'a mut S, path: &Path) -> Result<StoreSession<'a, S>, FlambError> {
        let open_status = store.open(path)?;
        Ok(StoreSession {
            store,
            open_status,
            closed: false,
        })
    }

    pub fn open_status(&self) -> i32 {
        self.open_status
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready(self.open_status)
    }

    pub fn next_record(&mut self, selector: Selector) -> Option<RawRecord> {
        self.store.next_record(selector)
    }

    /// Reads every remaining record of `selector`
    pub fn read_records(&mut self, selector: Selector) -> Vec<RawRecord> {
        let mut records = Vec::new();
        while let Some(record) = self.store.next_record(selector) {
            records.push(record);
        }
        records
    }

    pub fn close(mut self) -> i32 {
        self.closed = true;
        self.store.close()
    }
}

impl<'a, S: ResultStore + ?Sized> Drop for StoreSession<'a, S> {
    fn drop(&mut self) {
        if !self.closed {
            self.store.close();
        }
    }
}

/// Reads the node position set (type 20, subtype 0)
///
/// # Arguments
/// * `store` - The result database backend
/// * `path` - The path to the database file
///
/// # Returns
/// The raw positions in store order, sentinel records included, and the
/// status codes of the read
pub fn read_positions<S: ResultStore + ?Sized>(
    store: &mut S,
    path: &Path,
) -> Result<(Vec<NodeCoordinate>, StoreReport), FlambError> {
    let mut session = StoreSession::open(store, path)?;
    let open_status = session.open_status();
    let ready = session.is_ready();

    let positions: Vec<NodeCoordinate> = session
        .read_records(Selector::NODE_POSITIONS)
        .iter()
        .map(|r| NodeCoordinate {
            node_id: r.node_id,
            position: r.vector(),
        })
        .collect();

    let close_status = session.close();
    let records = positions.len();

    Ok((
        positions,
        StoreReport {
            open_status,
            ready,
            close_status,
            records,
            unpaired: (0, 0),
        },
    ))
}

/// Reads the two displacement selectors (24/2 and 24/3) in lockstep
///
/// One record is fetched from each selector per scan step and the pair is
/// summed component-wise into one sample carrying the node number of the
/// primary record. Pairing is positional: both selectors are assumed to
/// yield the same nodes in the same order. If one side runs out first the
/// scan stops and the leftover counts are reported in
/// [`StoreReport::unpaired`].
pub fn read_displacements<S: ResultStore + ?Sized>(
    store: &mut S,
    path: &Path,
) -> Result<(Vec<DisplacementSample>, StoreReport), FlambError> {
    let mut session = StoreSession::open(store, path)?;
    let open_status = session.open_status();
    let ready = session.is_ready();

    let mut samples: Vec<DisplacementSample> = Vec::new();
    let mut unpaired = (0, 0);

    loop {
        let primary = session.next_record(Selector::DISPLACEMENT_PRIMARY);
        let secondary = session.next_record(Selector::DISPLACEMENT_SECONDARY);

        match (primary, secondary) {
            (Some(a), Some(b)) => samples.push(DisplacementSample {
                node_id: a.node_id,
                displacement: a.vector() + b.vector(),
            }),
            (None, None) => break,
            (Some(_), None) => {
                unpaired.0 = 1 + session.read_records(Selector::DISPLACEMENT_PRIMARY).len();
                break;
            }
            (None, Some(_)) => {
                unpaired.1 = 1 + session.read_records(Selector::DISPLACEMENT_SECONDARY).len();
                break;
            }
        }
    }

    let close_status = session.close();
    let records = samples.len();

    Ok((
        samples,
        StoreReport {
            open_status,
            ready,
            close_status,
            records,
            unpaired,
        },
    ))
}

/// Builds `node -> position`, first record wins, sentinel ids excluded
pub fn position_map(positions: &[NodeCoordinate]) -> PositionMap {
    let mut map = PositionMap::new();
    for coordinate in positions {
        if coordinate.node_id == SENTINEL_NODE {
            continue;
        }
        map.entry(coordinate.node_id).or_insert(coordinate.position);
    }
    map
}

/// Builds `node -> displacement`, summing every sample of the same node,
/// sentinel ids excluded
pub fn accumulate_displacements(samples: &[DisplacementSample]) -> DisplacementMap {
    let mut map = DisplacementMap::new();
    for sample in samples {
        if sample.node_id == SENTINEL_NODE {
            continue;
        }
        *map.entry(sample.node_id).or_insert_with(Vector3::zeros) += sample.displacement;
    }
    map
}
