//! Row-distributed sparse operator and its communication pattern.
//!
//! Each process owns a contiguous range of rows (and, independently, a range
//! of columns — restriction operators are rectangular and the two
//! distributions differ after repartitioning). The local chunk is split at
//! construction into a `local` part whose columns this process owns and a
//! `remote` part whose columns live elsewhere; the remote columns actually
//! referenced define a ghost buffer and a communication pattern that is built
//! once and reused by every product against the same sparsity structure.
//!
//! All methods taking `&self` plus [`transpose`](DistributedMatrix::transpose),
//! [`product`](DistributedMatrix::product) and
//! [`spmv`](DistributedMatrix::spmv) are collective: every rank in the group
//! must call them in the same order.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::range::{self, RowRange};
use crate::core::value::{BlockValue, RhsValue};
use crate::error::{Error, Result};
use crate::matrix::CsrChunk;
use crate::parallel::{Comm, Communicator};

/// Reusable halo-exchange plan: which of our owned values each peer needs
/// (`send_idx`, in the peer's requested order) and how many ghost values each
/// peer delivers to us. Ghost columns are sorted by global index, so the
/// values received from rank `r` occupy one contiguous, ordered span of the
/// ghost buffer.
#[derive(Clone, Debug)]
pub struct CommPattern {
    send_idx: Vec<Vec<usize>>,
    recv_counts: Vec<usize>,
}

impl CommPattern {
    pub fn send_idx(&self) -> &[Vec<usize>] {
        &self.send_idx
    }

    /// Exchange rhs-valued ghost data. `pack` resolves a list of owned local
    /// column indices to their current values (a slice read on the CPU, a
    /// device download for an accelerator backend).
    pub fn exchange_rhs<R: RhsValue>(
        &self,
        comm: &Communicator,
        pack: impl Fn(&[usize]) -> Vec<R>,
    ) -> Vec<R> {
        let size = comm.size();
        let mut sends = vec![Vec::new(); size];
        for r in 0..size {
            let vals = pack(&self.send_idx[r]);
            let mut buf = Vec::with_capacity(vals.len() * R::DIM);
            for v in &vals {
                v.write_scalars(&mut buf);
            }
            sends[r] = buf;
        }
        let recvs = comm.alltoallv_f64(&sends);
        let mut ghosts = Vec::new();
        for (r, buf) in recvs.iter().enumerate() {
            debug_assert_eq!(buf.len(), self.recv_counts[r] * R::DIM);
            for chunk in buf.chunks_exact(R::DIM) {
                ghosts.push(R::read_scalars(chunk));
            }
        }
        ghosts
    }
}

/// The global sparse operator as this process sees it: its own rows, split
/// into local and remote parts, plus the halo-exchange pattern. Composable:
/// supports transpose and products until [`move_to_backend`] consumes it.
///
/// [`move_to_backend`]: DistributedMatrix::move_to_backend
#[derive(Clone)]
pub struct DistributedMatrix<V: BlockValue> {
    comm: Arc<Communicator>,
    glob_rows: usize,
    glob_cols: usize,
    row_range: RowRange,
    col_range: RowRange,
    row_begs: Vec<usize>,
    col_begs: Vec<usize>,
    local: CsrChunk<V>,
    remote: CsrChunk<V>,
    ghost_cols: Vec<usize>,
    pattern: CommPattern,
}

impl<V: BlockValue> DistributedMatrix<V> {
    /// Collective. Wrap each process's raw CRS rows (global column indices)
    /// into a distributed operator. Malformed input — a column index outside
    /// `[0, glob_cols)`, a pointer array that does not match the owned row
    /// count — is a fatal construction error on the offending rank.
    pub fn new(
        comm: Arc<Communicator>,
        glob_rows: usize,
        glob_cols: usize,
        row_range: RowRange,
        col_range: RowRange,
        ptr: Vec<usize>,
        col: Vec<usize>,
        val: Vec<V>,
    ) -> Result<Self> {
        let chunk = CsrChunk::new(row_range.len(), glob_cols, ptr, col, val)?;
        let row_begs = Self::gather_offsets(&comm, row_range, glob_rows, "row")?;
        let col_begs = Self::gather_offsets(&comm, col_range, glob_cols, "column")?;
        Self::assemble(comm, glob_rows, glob_cols, row_range, col_range, row_begs, col_begs, chunk)
    }

    /// Collective. Wrap an already-validated chunk.
    pub fn from_chunk(
        comm: Arc<Communicator>,
        glob_rows: usize,
        row_range: RowRange,
        col_range: RowRange,
        chunk: CsrChunk<V>,
    ) -> Result<Self> {
        let glob_cols = chunk.ncols();
        let row_begs = Self::gather_offsets(&comm, row_range, glob_rows, "row")?;
        let col_begs = Self::gather_offsets(&comm, col_range, glob_cols, "column")?;
        Self::assemble(comm, glob_rows, glob_cols, row_range, col_range, row_begs, col_begs, chunk)
    }

    fn gather_offsets(
        comm: &Arc<Communicator>,
        range: RowRange,
        glob: usize,
        what: &str,
    ) -> Result<Vec<usize>> {
        let mut begs = comm.all_gather_usize(range.beg);
        begs.push(glob);
        let rank = comm.rank();
        if begs[rank + 1] != range.end || begs.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidMatrix(format!(
                "{what} ranges do not tile the global {what} space of size {glob}"
            )));
        }
        Ok(begs)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        comm: Arc<Communicator>,
        glob_rows: usize,
        glob_cols: usize,
        row_range: RowRange,
        col_range: RowRange,
        row_begs: Vec<usize>,
        col_begs: Vec<usize>,
        chunk: CsrChunk<V>,
    ) -> Result<Self> {
        let n = row_range.len();

        let mut ghost_cols: Vec<usize> =
            chunk.col().iter().copied().filter(|&c| !col_range.contains(c)).collect();
        ghost_cols.sort_unstable();
        ghost_cols.dedup();

        let mut lptr = Vec::with_capacity(n + 1);
        let mut lcol = Vec::new();
        let mut lval = Vec::new();
        let mut rptr = Vec::with_capacity(n + 1);
        let mut rcol = Vec::new();
        let mut rval = Vec::new();
        lptr.push(0);
        rptr.push(0);

        for i in 0..n {
            let (cols, vals) = chunk.row(i);
            for (&c, v) in cols.iter().zip(vals) {
                if col_range.contains(c) {
                    lcol.push(c - col_range.beg);
                    lval.push(*v);
                } else {
                    rcol.push(ghost_cols.binary_search(&c).unwrap());
                    rval.push(*v);
                }
            }
            lptr.push(lcol.len());
            rptr.push(rcol.len());
        }

        let local = CsrChunk::new(n, col_range.len(), lptr, lcol, lval)?;
        let remote = CsrChunk::new(n, ghost_cols.len(), rptr, rcol, rval)?;

        // Collective: owners learn which of their columns each peer references.
        let size = comm.size();
        let mut want = vec![Vec::new(); size];
        for &g in &ghost_cols {
            want[range::owner(&col_begs, g)].push(g as u64);
        }
        let asked = comm.alltoallv_u64(&want);
        let send_idx = asked
            .iter()
            .map(|v| v.iter().map(|&g| g as usize - col_range.beg).collect())
            .collect();
        let recv_counts = want.iter().map(Vec::len).collect();
        let pattern = CommPattern { send_idx, recv_counts };

        Ok(DistributedMatrix {
            comm,
            glob_rows,
            glob_cols,
            row_range,
            col_range,
            row_begs,
            col_begs,
            local,
            remote,
            ghost_cols,
            pattern,
        })
    }

    pub fn comm(&self) -> &Arc<Communicator> {
        &self.comm
    }
    pub fn glob_rows(&self) -> usize {
        self.glob_rows
    }
    pub fn glob_cols(&self) -> usize {
        self.glob_cols
    }
    pub fn row_range(&self) -> RowRange {
        self.row_range
    }
    pub fn col_range(&self) -> RowRange {
        self.col_range
    }
    /// Locally owned row count.
    pub fn loc_rows(&self) -> usize {
        self.row_range.len()
    }
    pub fn loc_nnz(&self) -> usize {
        self.local.nnz() + self.remote.nnz()
    }
    /// Owned-column part of the chunk (local column indices).
    pub fn local_part(&self) -> &CsrChunk<V> {
        &self.local
    }
    /// Remote-column part of the chunk (ghost-slot indices).
    pub fn remote_part(&self) -> &CsrChunk<V> {
        &self.remote
    }

    /// Collective. Global non-zero count.
    pub fn glob_nnz(&self) -> usize {
        self.comm.all_reduce_sum(self.loc_nnz() as f64) as usize
    }

    /// Diagonal blocks of the owned rows. Requires matching row and column
    /// distributions (square operator). Rows without a stored diagonal entry
    /// yield the zero block.
    pub fn diagonal(&self) -> Vec<V> {
        debug_assert_eq!(self.row_begs, self.col_begs);
        (0..self.loc_rows())
            .map(|i| {
                let (cols, vals) = self.local.row(i);
                match cols.binary_search(&i) {
                    Ok(k) => vals[k],
                    Err(_) => cols
                        .iter()
                        .position(|&c| c == i)
                        .map(|k| vals[k])
                        .unwrap_or_else(V::zero),
                }
            })
            .collect()
    }

    /// Owned non-zero entries in global coordinates, row-major.
    pub fn triples(&self) -> Vec<(usize, usize, V)> {
        let mut out = Vec::with_capacity(self.loc_nnz());
        for i in 0..self.loc_rows() {
            let gi = self.row_range.beg + i;
            let (cols, vals) = self.local.row(i);
            for (&c, v) in cols.iter().zip(vals) {
                out.push((gi, self.col_range.beg + c, *v));
            }
            let (slots, vals) = self.remote.row(i);
            for (&s, v) in slots.iter().zip(vals) {
                out.push((gi, self.ghost_cols[s], *v));
            }
        }
        out
    }

    /// Collective. y = beta*y + alpha*A*x, where `x` is distributed by this
    /// operator's column ranges and `y` by its row ranges. Ghost values are
    /// fetched through the stored pattern before the local kernels run.
    pub fn spmv(&self, alpha: f64, x: &[V::Rhs], beta: f64, y: &mut [V::Rhs]) {
        assert_eq!(x.len(), self.col_range.len());
        assert_eq!(y.len(), self.row_range.len());
        let ghosts = self
            .pattern
            .exchange_rhs(&self.comm, |idx| idx.iter().map(|&i| x[i]).collect());
        self.local.spmv_into(alpha, x, beta, y);
        self.remote.spmv_into(alpha, &ghosts, 1.0, y);
    }

    /// Collective. The algebraic transpose: row and column ownership swap, so
    /// every stored entry is shipped to the owner of its column and the
    /// communication pattern is rebuilt from scratch.
    pub fn transpose(&self) -> Result<DistributedMatrix<V>> {
        let size = self.comm.size();
        let dd = V::DIM * V::DIM;
        let mut coord_sends = vec![Vec::new(); size];
        let mut val_sends = vec![Vec::new(); size];

        let mut ship = |gj: usize, gi: usize, v: &V| {
            let dest = range::owner(&self.col_begs, gj);
            coord_sends[dest].push(gj as u64);
            coord_sends[dest].push(gi as u64);
            v.transpose().write_scalars(&mut val_sends[dest]);
        };
        for i in 0..self.loc_rows() {
            let gi = self.row_range.beg + i;
            let (cols, vals) = self.local.row(i);
            for (&c, v) in cols.iter().zip(vals) {
                ship(self.col_range.beg + c, gi, v);
            }
            let (slots, vals) = self.remote.row(i);
            for (&s, v) in slots.iter().zip(vals) {
                ship(self.ghost_cols[s], gi, v);
            }
        }

        let coord_recv = self.comm.alltoallv_u64(&coord_sends);
        let val_recv = self.comm.alltoallv_f64(&val_sends);

        let mut triples: Vec<(usize, usize, V)> = Vec::new();
        for (coords, vals) in coord_recv.iter().zip(&val_recv) {
            for (k, pair) in coords.chunks_exact(2).enumerate() {
                let row = pair[0] as usize - self.col_range.beg;
                let col = pair[1] as usize;
                triples.push((row, col, V::read_scalars(&vals[k * dd..(k + 1) * dd])));
            }
        }
        triples.sort_by_key(|&(r, c, _)| (r, c));

        let n = self.col_range.len();
        let mut ptr = Vec::with_capacity(n + 1);
        let mut col = Vec::with_capacity(triples.len());
        let mut val = Vec::with_capacity(triples.len());
        ptr.push(0);
        let mut row = 0;
        for (r, c, v) in triples {
            while row < r {
                ptr.push(col.len());
                row += 1;
            }
            col.push(c);
            val.push(v);
        }
        while row < n {
            ptr.push(col.len());
            row += 1;
        }

        let chunk = CsrChunk::new(n, self.glob_rows, ptr, col, val)?;
        Self::assemble(
            self.comm.clone(),
            self.glob_cols,
            self.glob_rows,
            self.col_range,
            self.row_range,
            self.col_begs.clone(),
            self.row_begs.clone(),
            chunk,
        )
    }

    /// Collective. Distributed sparse matrix-matrix product `self * other`.
    /// The rows of `other` matching this process's ghost columns are fetched
    /// from their owners; accumulation per output row goes through an ordered
    /// map, so the result is reproducible for a fixed process count.
    pub fn product(&self, other: &DistributedMatrix<V>) -> Result<DistributedMatrix<V>> {
        if self.glob_cols != other.glob_rows || self.col_begs != other.row_begs {
            return Err(Error::InvalidMatrix(format!(
                "product shape mismatch: {}x{} times {}x{} (or distributions disagree)",
                self.glob_rows, self.glob_cols, other.glob_rows, other.glob_cols
            )));
        }

        let ghost_rows = self.fetch_rows(other);

        let n = self.loc_rows();
        let mut ptr = Vec::with_capacity(n + 1);
        let mut col = Vec::new();
        let mut val = Vec::new();
        ptr.push(0);

        for i in 0..n {
            let mut acc: BTreeMap<usize, V> = BTreeMap::new();
            let fma = |acc: &mut BTreeMap<usize, V>, g: usize, v: V| {
                acc.entry(g).and_modify(|e| *e = e.add(&v)).or_insert(v);
            };

            let (cols, vals) = self.local.row(i);
            for (&j, a) in cols.iter().zip(vals) {
                let (bc, bv) = other.local.row(j);
                for (&c, b) in bc.iter().zip(bv) {
                    fma(&mut acc, other.col_range.beg + c, a.mul(b));
                }
                let (bs, bv) = other.remote.row(j);
                for (&s, b) in bs.iter().zip(bv) {
                    fma(&mut acc, other.ghost_cols[s], a.mul(b));
                }
            }
            let (slots, vals) = self.remote.row(i);
            for (&s, a) in slots.iter().zip(vals) {
                let (bc, bv) = ghost_rows.row(s);
                for (&g, b) in bc.iter().zip(bv) {
                    fma(&mut acc, g, a.mul(b));
                }
            }

            for (g, v) in acc {
                col.push(g);
                val.push(v);
            }
            ptr.push(col.len());
        }

        let chunk = CsrChunk::new(n, other.glob_cols, ptr, col, val)?;
        Self::assemble(
            self.comm.clone(),
            self.glob_rows,
            other.glob_cols,
            self.row_range,
            other.col_range,
            self.row_begs.clone(),
            other.col_begs.clone(),
            chunk,
        )
    }

    /// Collective. Ship the rows of `other` this process references through
    /// its ghost columns; the result has one row per ghost column, in ghost
    /// order, with global column indices.
    fn fetch_rows(&self, other: &DistributedMatrix<V>) -> CsrChunk<V> {
        let size = self.comm.size();
        let dd = V::DIM * V::DIM;
        let mut meta_sends = vec![Vec::new(); size];
        let mut val_sends = vec![Vec::new(); size];

        for r in 0..size {
            for &i in &self.pattern.send_idx[r] {
                let (lc, lv) = other.local.row(i);
                let (rc, rv) = other.remote.row(i);
                meta_sends[r].push((lc.len() + rc.len()) as u64);
                for (&c, v) in lc.iter().zip(lv) {
                    meta_sends[r].push((other.col_range.beg + c) as u64);
                    v.write_scalars(&mut val_sends[r]);
                }
                for (&s, v) in rc.iter().zip(rv) {
                    meta_sends[r].push(other.ghost_cols[s] as u64);
                    v.write_scalars(&mut val_sends[r]);
                }
            }
        }

        let meta_recv = self.comm.alltoallv_u64(&meta_sends);
        let val_recv = self.comm.alltoallv_f64(&val_sends);

        let mut ptr = vec![0];
        let mut col = Vec::new();
        let mut val = Vec::new();
        for (meta, vals) in meta_recv.iter().zip(&val_recv) {
            let mut m = 0;
            let mut k = 0;
            while m < meta.len() {
                let len = meta[m] as usize;
                m += 1;
                for _ in 0..len {
                    col.push(meta[m] as usize);
                    val.push(V::read_scalars(&vals[k * dd..(k + 1) * dd]));
                    m += 1;
                    k += 1;
                }
                ptr.push(col.len());
            }
        }

        CsrChunk { nrows: self.ghost_cols.len(), ncols: other.glob_cols, ptr, col, val }
    }

    /// One-way transition into the backend-resident execution form. Consumes
    /// the composable operator; the result supports repeated matrix-vector
    /// products but no further algebraic composition, by construction.
    pub fn move_to_backend<B: crate::backend::Backend<V>>(
        self,
        prm: &B::Params,
    ) -> crate::backend::BackendOperator<V, B> {
        crate::backend::BackendOperator::new(
            self.comm,
            self.row_range,
            self.col_range,
            &self.local,
            &self.remote,
            self.ghost_cols.len(),
            self.pattern,
            prm,
        )
    }
}
