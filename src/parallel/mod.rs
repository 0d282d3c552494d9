//! Process-group abstraction for the distributed pipeline.
//!
//! Every distributed operation in this crate (operator construction, transpose,
//! products, the solve itself) is collective and synchronous: all processes in
//! the group must call it in the same order or the group deadlocks. The group
//! is an explicit [`Communicator`] handle passed around by value, never implicit
//! global state. Process count and rank are fixed for the lifetime of the run.

pub trait Comm: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);

    /// Sum a local scalar across all ranks; every rank receives the result.
    fn all_reduce_sum(&self, x: f64) -> f64;

    /// Gather one value from every rank, in rank order.
    fn all_gather_usize(&self, x: usize) -> Vec<usize>;

    /// Gather a variable-length slice from every rank, concatenated in rank order.
    fn all_gather_v_u64(&self, local: &[u64]) -> Vec<u64>;
    fn all_gather_v_f64(&self, local: &[f64]) -> Vec<f64>;

    /// Sparse data exchange: `sends[r]` is delivered to rank `r`; the return
    /// value holds, per source rank, what that rank sent here. This is the
    /// primitive the communication patterns of `DistributedMatrix` are built on.
    fn alltoallv_u64(&self, sends: &[Vec<u64>]) -> Vec<Vec<u64>>;
    fn alltoallv_f64(&self, sends: &[Vec<f64>]) -> Vec<Vec<f64>>;
}

/// Single-process group: rank 0 of 1. All exchanges are local moves.
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}

    fn all_reduce_sum(&self, x: f64) -> f64 {
        x
    }

    fn all_gather_usize(&self, x: usize) -> Vec<usize> {
        vec![x]
    }

    fn all_gather_v_u64(&self, local: &[u64]) -> Vec<u64> {
        local.to_vec()
    }

    fn all_gather_v_f64(&self, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }

    fn alltoallv_u64(&self, sends: &[Vec<u64>]) -> Vec<Vec<u64>> {
        debug_assert_eq!(sends.len(), 1);
        sends.to_vec()
    }

    fn alltoallv_f64(&self, sends: &[Vec<f64>]) -> Vec<Vec<f64>> {
        debug_assert_eq!(sends.len(), 1);
        sends.to_vec()
    }
}

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Process group handle selected by build configuration.
pub enum Communicator {
    Serial(SerialComm),
    #[cfg(feature = "mpi")]
    Mpi(MpiComm),
}

impl Communicator {
    /// The ambient process group: the MPI world when built with the `mpi`
    /// feature, a single-process group otherwise. Obtained once at start.
    pub fn world() -> Self {
        #[cfg(feature = "mpi")]
        {
            Communicator::Mpi(MpiComm::world())
        }
        #[cfg(not(feature = "mpi"))]
        {
            Communicator::Serial(SerialComm)
        }
    }

    pub fn serial() -> Self {
        Communicator::Serial(SerialComm)
    }
}

impl Comm for Communicator {
    fn rank(&self) -> usize {
        match self {
            Communicator::Serial(c) => c.rank(),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.rank(),
        }
    }
    fn size(&self) -> usize {
        match self {
            Communicator::Serial(c) => c.size(),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.size(),
        }
    }
    fn barrier(&self) {
        match self {
            Communicator::Serial(c) => c.barrier(),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.barrier(),
        }
    }
    fn all_reduce_sum(&self, x: f64) -> f64 {
        match self {
            Communicator::Serial(c) => c.all_reduce_sum(x),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.all_reduce_sum(x),
        }
    }
    fn all_gather_usize(&self, x: usize) -> Vec<usize> {
        match self {
            Communicator::Serial(c) => c.all_gather_usize(x),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.all_gather_usize(x),
        }
    }
    fn all_gather_v_u64(&self, local: &[u64]) -> Vec<u64> {
        match self {
            Communicator::Serial(c) => c.all_gather_v_u64(local),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.all_gather_v_u64(local),
        }
    }
    fn all_gather_v_f64(&self, local: &[f64]) -> Vec<f64> {
        match self {
            Communicator::Serial(c) => c.all_gather_v_f64(local),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.all_gather_v_f64(local),
        }
    }
    fn alltoallv_u64(&self, sends: &[Vec<u64>]) -> Vec<Vec<u64>> {
        match self {
            Communicator::Serial(c) => c.alltoallv_u64(sends),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.alltoallv_u64(sends),
        }
    }
    fn alltoallv_f64(&self, sends: &[Vec<f64>]) -> Vec<Vec<f64>> {
        match self {
            Communicator::Serial(c) => c.alltoallv_f64(sends),
            #[cfg(feature = "mpi")]
            Communicator::Mpi(c) => c.alltoallv_f64(sends),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_group_is_rank_zero_of_one() {
        let comm = SerialComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.all_reduce_sum(2.5), 2.5);
        assert_eq!(comm.all_gather_usize(7), vec![7]);
    }

    #[test]
    fn serial_alltoallv_moves_data_locally() {
        let comm = SerialComm;
        let got = comm.alltoallv_u64(&[vec![3, 1, 4]]);
        assert_eq!(got, vec![vec![3, 1, 4]]);
        let got = comm.alltoallv_f64(&[vec![0.5, -1.0]]);
        assert_eq!(got, vec![vec![0.5, -1.0]]);
    }
}
