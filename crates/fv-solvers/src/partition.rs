//! Mesh partition metadata consumed by the solver layer.
//!
//! A partition describes which cells this rank knows about (the
//! *overlapping* set, owned cells plus ghosts) and which of them it owns
//! (the *non-overlapping* set). Every owned cell belongs to exactly one rank.
//! Local cell index `i` refers to position `i` of the overlapping set.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::comm::{Communicator, SerialComm};
use crate::error::{Result, SolverError};

/// Extent of a structured grid. Unused trailing axes have extent 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dimensions: usize,
}

impl GridShape {
    pub fn grid1d(nx: usize) -> Self {
        Self { nx, ny: 1, nz: 1, dimensions: 1 }
    }

    pub fn grid2d(nx: usize, ny: usize) -> Self {
        Self { nx, ny, nz: 1, dimensions: 2 }
    }

    pub fn grid3d(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz, dimensions: 3 }
    }

    pub fn number_of_cells(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Number of layers along the slowest-varying axis.
    fn layers(&self) -> usize {
        match self.dimensions {
            1 => self.nx,
            2 => self.ny,
            _ => self.nz,
        }
    }

    /// Cells per layer along the slowest-varying axis.
    fn layer_size(&self) -> usize {
        match self.dimensions {
            1 => 1,
            2 => self.nx,
            _ => self.nx * self.ny,
        }
    }
}

/// Cell ownership of one rank, together with the communicator of its group.
#[derive(Clone)]
pub struct MeshPartition {
    comm: Arc<dyn Communicator>,
    global_cells: usize,
    global_ids: Vec<usize>,
    non_overlapping: Vec<usize>,
}

impl std::fmt::Debug for MeshPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshPartition")
            .field("process_id", &self.comm.process_id())
            .field("number_of_processes", &self.comm.number_of_processes())
            .field("global_cells", &self.global_cells)
            .field("local_cells", &self.global_ids.len())
            .field("owned_cells", &self.non_overlapping.len())
            .finish()
    }
}

impl MeshPartition {
    /// Partition of `cells` cells owned entirely by a single process.
    pub fn serial(cells: usize) -> Self {
        Self {
            comm: Arc::new(SerialComm),
            global_cells: cells,
            global_ids: (0..cells).collect(),
            non_overlapping: (0..cells).collect(),
        }
    }

    /// Build a partition from explicit index arrays.
    ///
    /// `global_ids[i]` is the global ID of local cell `i`; `non_overlapping`
    /// lists the local indices this rank owns.
    pub fn new(
        comm: Arc<dyn Communicator>,
        global_cells: usize,
        global_ids: Vec<usize>,
        non_overlapping: Vec<usize>,
    ) -> Result<Self> {
        if let Some(&bad) = global_ids.iter().find(|&&id| id >= global_cells) {
            return Err(SolverError::InvalidConfig(format!(
                "global cell ID {} out of range (global cells {})",
                bad, global_cells
            )));
        }
        let unique: HashSet<usize> = global_ids.iter().copied().collect();
        if unique.len() != global_ids.len() {
            return Err(SolverError::InvalidConfig(
                "duplicate global cell IDs in partition".into(),
            ));
        }
        if let Some(&bad) = non_overlapping.iter().find(|&&i| i >= global_ids.len()) {
            return Err(SolverError::InvalidConfig(format!(
                "owned local index {} out of range (local cells {})",
                bad,
                global_ids.len()
            )));
        }
        Ok(Self {
            comm,
            global_cells,
            global_ids,
            non_overlapping,
        })
    }

    /// Split a structured grid into contiguous slabs along its slowest axis,
    /// one per rank of `comm`, each padded with `overlap` ghost layers.
    pub fn slabs(shape: GridShape, overlap: usize, comm: Arc<dyn Communicator>) -> Result<Self> {
        let nprocs = comm.number_of_processes();
        let layers = shape.layers();
        let layer_size = shape.layer_size();
        if nprocs > layers {
            return Err(SolverError::InvalidConfig(format!(
                "cannot split {} layers across {} processes",
                layers, nprocs
            )));
        }

        let rank = comm.process_id();
        let base = layers / nprocs;
        let rem = layers % nprocs;
        let start = rank * base + rank.min(rem);
        let end = start + base + usize::from(rank < rem);
        let lo = start.saturating_sub(overlap);
        let hi = (end + overlap).min(layers);

        let global_ids: Vec<usize> = (lo * layer_size..hi * layer_size).collect();
        let non_overlapping: Vec<usize> =
            ((start - lo) * layer_size..(end - lo) * layer_size).collect();

        Self::new(comm, shape.number_of_cells(), global_ids, non_overlapping)
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn process_id(&self) -> usize {
        self.comm.process_id()
    }

    pub fn number_of_processes(&self) -> usize {
        self.comm.number_of_processes()
    }

    /// Local (overlapping) cell count.
    pub fn number_of_cells(&self) -> usize {
        self.global_ids.len()
    }

    pub fn global_number_of_cells(&self) -> usize {
        self.global_cells
    }

    /// Global IDs of the overlapping cells, indexed by local cell index.
    pub fn global_overlapping_ids(&self) -> &[usize] {
        &self.global_ids
    }

    /// Local indices of the cells this rank owns.
    pub fn local_non_overlapping_ids(&self) -> &[usize] {
        &self.non_overlapping
    }

    pub fn global_non_overlapping_ids(&self) -> Vec<usize> {
        self.non_overlapping
            .iter()
            .map(|&i| self.global_ids[i])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalGroupComm;

    #[test]
    fn serial_partition_owns_everything() {
        let p = MeshPartition::serial(5);
        assert_eq!(p.number_of_cells(), 5);
        assert_eq!(p.local_non_overlapping_ids(), &[0, 1, 2, 3, 4]);
        assert_eq!(p.number_of_processes(), 1);
    }

    #[test]
    fn slabs_cover_each_cell_once() {
        let shape = GridShape::grid2d(3, 5);
        let mut owned = Vec::new();
        for comm in LocalGroupComm::group(2) {
            let p = MeshPartition::slabs(shape, 1, Arc::new(comm)).unwrap();
            owned.extend(p.global_non_overlapping_ids());
        }
        owned.sort_unstable();
        assert_eq!(owned, (0..15).collect::<Vec<_>>());
    }

    #[test]
    fn slabs_include_ghost_layers() {
        let shape = GridShape::grid1d(6);
        let comms = LocalGroupComm::group(2);
        let first = MeshPartition::slabs(shape, 2, Arc::new(comms[0].clone())).unwrap();
        let second = MeshPartition::slabs(shape, 2, Arc::new(comms[1].clone())).unwrap();

        assert_eq!(first.global_overlapping_ids(), &[0, 1, 2, 3, 4]);
        assert_eq!(first.global_non_overlapping_ids(), vec![0, 1, 2]);
        assert_eq!(second.global_overlapping_ids(), &[1, 2, 3, 4, 5]);
        assert_eq!(second.local_non_overlapping_ids(), &[2, 3, 4]);
    }

    #[test]
    fn slabs_split_3d_along_z() {
        let shape = GridShape::grid3d(2, 2, 4);
        let comms = LocalGroupComm::group(2);
        let p = MeshPartition::slabs(shape, 0, Arc::new(comms[1].clone())).unwrap();
        assert_eq!(p.global_overlapping_ids(), &[8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn rejects_bad_index_arrays() {
        let comm: Arc<dyn Communicator> = Arc::new(SerialComm);
        assert!(MeshPartition::new(comm.clone(), 3, vec![0, 3], vec![0]).is_err());
        assert!(MeshPartition::new(comm.clone(), 3, vec![0, 0], vec![0]).is_err());
        assert!(MeshPartition::new(comm, 3, vec![0, 1], vec![2]).is_err());
    }

    #[test]
    fn too_many_ranks_for_layers() {
        let comms = LocalGroupComm::group(4);
        let result = MeshPartition::slabs(GridShape::grid1d(3), 1, Arc::new(comms[0].clone()));
        assert!(result.is_err());
    }
}
