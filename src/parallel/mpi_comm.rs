//! MPI-backed process group, available with the `mpi` feature.
//!
//! Wraps the world communicator of the ambient MPI runtime. The variable-count
//! collectives are expressed through `Partition`/`PartitionMut`, with a fixed
//! count exchange first so every rank knows how much each peer will deliver.

use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// MPI world communicator wrapper.
///
/// Holds the universe guard so the MPI runtime stays initialized for the
/// lifetime of the group handle.
pub struct MpiComm {
    _universe: Universe,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Initializes MPI and binds to the world communicator.
    ///
    /// # Panics
    /// Panics if MPI initialization fails or MPI was already initialized.
    pub fn world() -> Self {
        let universe = mpi::initialize().expect("MPI initialization failed");
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiComm { _universe: universe, world, rank, size }
    }

    fn counts_displs(lens: &[usize]) -> (Vec<mpi::Count>, Vec<mpi::Count>) {
        let counts: Vec<mpi::Count> = lens.iter().map(|&l| l as mpi::Count).collect();
        let mut displs = Vec::with_capacity(lens.len());
        let mut off = 0;
        for &c in &counts {
            displs.push(off);
            off += c;
        }
        (counts, displs)
    }
}

macro_rules! impl_alltoallv {
    ($name:ident, $ty:ty) => {
        fn $name(&self, sends: &[Vec<$ty>]) -> Vec<Vec<$ty>> {
            assert_eq!(sends.len(), self.size);

            let send_lens: Vec<usize> = sends.iter().map(Vec::len).collect();
            let send_counts: Vec<mpi::Count> =
                send_lens.iter().map(|&l| l as mpi::Count).collect();
            let mut recv_counts = vec![0 as mpi::Count; self.size];
            self.world.all_to_all_into(&send_counts, &mut recv_counts);

            let send_buf: Vec<$ty> = sends.concat();
            let (send_counts, send_displs) = Self::counts_displs(&send_lens);
            let recv_lens: Vec<usize> = recv_counts.iter().map(|&c| c as usize).collect();
            let (recv_counts, recv_displs) = Self::counts_displs(&recv_lens);

            let mut recv_buf = vec![<$ty>::default(); recv_lens.iter().sum()];
            {
                let send_part = Partition::new(&send_buf[..], &send_counts[..], &send_displs[..]);
                let mut recv_part =
                    PartitionMut::new(&mut recv_buf[..], &recv_counts[..], &recv_displs[..]);
                self.world.all_to_all_varcount_into(&send_part, &mut recv_part);
            }

            let mut out = Vec::with_capacity(self.size);
            let mut off = 0;
            for len in recv_lens {
                out.push(recv_buf[off..off + len].to_vec());
                off += len;
            }
            out
        }
    };
}

macro_rules! impl_all_gather_v {
    ($name:ident, $ty:ty) => {
        fn $name(&self, local: &[$ty]) -> Vec<$ty> {
            let lens = self.all_gather_usize(local.len());
            let (counts, displs) = Self::counts_displs(&lens);
            let mut buf = vec![<$ty>::default(); lens.iter().sum()];
            {
                let mut part = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut part);
            }
            buf
        }
    };
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.world.barrier();
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        use mpi::collective::SystemOperation;
        let mut y = 0.0;
        self.world.all_reduce_into(&x, &mut y, &SystemOperation::sum());
        y
    }

    fn all_gather_usize(&self, x: usize) -> Vec<usize> {
        let mut buf = vec![0u64; self.size];
        self.world.all_gather_into(&(x as u64), &mut buf[..]);
        buf.into_iter().map(|v| v as usize).collect()
    }

    impl_all_gather_v!(all_gather_v_u64, u64);
    impl_all_gather_v!(all_gather_v_f64, f64);

    impl_alltoallv!(alltoallv_u64, u64);
    impl_alltoallv!(alltoallv_f64, f64);
}
