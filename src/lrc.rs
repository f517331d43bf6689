//! Locally repairable codes on top of Reed-Solomon erasure coding.
//!
//! A code is parameterized by a partition of the `k` data chunks into `L`
//! contiguous locality groups and a count `m` of global parities. Encoding
//! produces one local parity per group (the XOR of the group's data chunks)
//! and `m` Reed-Solomon parities over all data chunks, for `n = k + L + m`
//! chunks total. A single failure inside a group repairs from the group's
//! surviving chunks alone; heavier patterns fall back to a global linear
//! solve over GF(2^8).
//!
//! Chunk indices run `0..n` in the order data `[0, k)`, local parities
//! `[k, k + L)`, global parities `[k + L, n)`.

use tracing::{debug, trace};

use crate::buf::LrcBuf;
use crate::gf;

/// The `Error` enum defines the possible errors this crate can return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing allocation for a chunk buffer failed.
    #[error("out of memory: failed to allocate {0} bytes")]
    OutOfMemory(usize),
    /// The erasure pattern exceeds what the code can correct.
    #[error("unrecoverable erasure pattern: {0}")]
    Unrecoverable(String),
    /// The requested parity counts exceed the GF(2^8) field capacity.
    #[error("invalid m: {0}")]
    InvalidM(String),
    /// The input is malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl Error {
    fn unrecoverable(msg: impl Into<String>) -> Self {
        Self::Unrecoverable(msg.into())
    }

    fn invalid_m(msg: impl Into<String>) -> Self {
        Self::InvalidM(msg.into())
    }

    pub(crate) fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

/// A contiguous run of data chunks sharing one local parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalGroup {
    start: usize,
    len: usize,
}

impl LocalGroup {
    /// Index of the first data chunk in this group.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of data chunks this group covers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty groups are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Reconstruction plan for one erasure pattern: which surviving chunks to
/// read, which parity rows serve as equations, and what must be solved for.
struct SourcePlan {
    /// Surviving chunk indices to read, ascending.
    source: Vec<usize>,
    /// Parity chunk indices whose generator rows form the linear system,
    /// in acceptance order.
    rows: Vec<usize>,
    /// Erased data chunk indices, ascending. The unknowns of the system.
    unknowns: Vec<usize>,
    /// Erased parity chunk indices, re-encoded once the data is complete.
    erased_parity: Vec<usize>,
}

/// Code parameters: the locality partition and the generator matrix.
///
/// Immutable once constructed. The generator matrix has `L + m` rows by `k`
/// columns: row `i < L` is the indicator row of group `i` (its local parity
/// is the XOR of the group), and row `L + r` is the Vandermonde row
/// `power(r * c)`, so row `L` is all-ones.
pub struct LrcParam {
    k: usize,
    m: usize,
    n: usize,
    locals: Vec<LocalGroup>,
    matrix: Vec<u8>,
}

impl LrcParam {
    /// Create code parameters from the locality partition and global parity
    /// count.
    ///
    /// `local_sizes[i]` is the number of data chunks in group `i`; groups
    /// tile `[0, k)` in order.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArguments`] if the partition is empty or contains an
    ///   empty group.
    /// * [`Error::InvalidM`] if `m` is zero or `k + L + m` exceeds the 256
    ///   distinct symbols GF(2^8) can provide.
    pub fn new(local_sizes: &[usize], m: usize) -> Result<Self, Error> {
        if local_sizes.is_empty() {
            return Err(Error::invalid_arguments(
                "at least one locality group is required",
            ));
        }
        if local_sizes.iter().any(|&len| len == 0) {
            return Err(Error::invalid_arguments("locality groups must not be empty"));
        }
        if m < 1 {
            return Err(Error::invalid_m("at least one global parity is required"));
        }
        let k: usize = local_sizes.iter().sum();
        let n_local = local_sizes.len();
        if k + n_local + m > 256 {
            return Err(Error::invalid_m(format!(
                "k({k}) + locals({n_local}) + m({m}) exceeds the GF(2^8) capacity of 256"
            )));
        }

        let mut locals = Vec::with_capacity(n_local);
        let mut start = 0;
        for &len in local_sizes {
            locals.push(LocalGroup { start, len });
            start += len;
        }
        let matrix = Self::build_matrix(k, &locals, m);
        Ok(Self {
            k,
            m,
            n: k + n_local + m,
            locals,
            matrix,
        })
    }

    fn build_matrix(k: usize, locals: &[LocalGroup], m: usize) -> Vec<u8> {
        let mut matrix = vec![0u8; (locals.len() + m) * k];
        for (i, group) in locals.iter().enumerate() {
            matrix[i * k + group.start..i * k + group.start + group.len].fill(1);
        }
        for r in 0..m {
            let row = &mut matrix[(locals.len() + r) * k..][..k];
            for (c, coef) in row.iter_mut().enumerate() {
                *coef = gf::power(r * c);
            }
        }
        matrix
    }

    /// Number of data chunks.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of global parity chunks.
    pub fn m(&self) -> usize {
        self.m
    }

    /// Total number of chunks, `k + L + m`.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of locality groups.
    pub fn n_local(&self) -> usize {
        self.locals.len()
    }

    /// The locality partition.
    pub fn locals(&self) -> &[LocalGroup] {
        &self.locals
    }

    /// The generator matrix, row-major, `(L + m)` rows by `k` columns.
    pub fn matrix(&self) -> &[u8] {
        &self.matrix
    }

    /// Generator row of parity chunk `chunk`, which must be in `[k, n)`.
    fn matrix_row(&self, chunk: usize) -> &[u8] {
        debug_assert!((self.k..self.n).contains(&chunk));
        &self.matrix[(chunk - self.k) * self.k..][..self.k]
    }

    /// Data columns parity chunk `chunk` depends on: its group for a local
    /// parity, all of `[0, k)` for a global one.
    fn support(&self, chunk: usize) -> std::ops::Range<usize> {
        debug_assert!((self.k..self.n).contains(&chunk));
        if chunk < self.k + self.locals.len() {
            self.locals[chunk - self.k].range()
        } else {
            0..self.k
        }
    }

    /// Erasures charged to locality group `group`: those in its data columns
    /// plus its own local parity chunk. At most one is locally repairable.
    fn n_locally_erased(&self, group: usize, is_erased: &[bool]) -> usize {
        let erased_data = self.locals[group]
            .range()
            .filter(|&c| is_erased[c])
            .count();
        erased_data + usize::from(is_erased[self.k + group])
    }

    fn check_buf(&self, buf: &LrcBuf) -> Result<(), Error> {
        if buf.k() != self.k || buf.n_local() != self.locals.len() || buf.m() != self.m {
            return Err(Error::invalid_arguments(format!(
                "buffer laid out for (k={}, l={}, m={}) does not match code (k={}, l={}, m={})",
                buf.k(),
                buf.n_local(),
                buf.m(),
                self.k,
                self.locals.len(),
                self.m
            )));
        }
        Ok(())
    }

    /// Sort, dedup and range-check an erasure list.
    fn check_erased(&self, erased: &[usize]) -> Result<Vec<usize>, Error> {
        let mut erased = erased.to_vec();
        erased.sort_unstable();
        erased.dedup();
        if let Some(&bad) = erased.iter().find(|&&e| e >= self.n) {
            return Err(Error::invalid_arguments(format!(
                "erased index {bad} out of range for {} chunks",
                self.n
            )));
        }
        Ok(erased)
    }

    /// Fill the `L + m` parity chunks of `buf` from its first `k` data
    /// chunks.
    ///
    /// Parity rows are independent of one another, so the computation order
    /// does not affect the result.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArguments`] if `buf` was not laid out for these
    /// parameters.
    pub fn encode(&self, buf: &mut LrcBuf) -> Result<(), Error> {
        self.check_buf(buf)?;
        let mut chunks = buf.chunks_mut();
        let (data, parity) = chunks.split_at_mut(self.k);
        let src: Vec<&[u8]> = data.iter().map(|chunk| &**chunk).collect();
        for (row, dest) in self.matrix.chunks_exact(self.k).zip(parity.iter_mut()) {
            gf::vect_dot_prod(row, &src, dest);
        }
        Ok(())
    }

    /// Compute the source set for an erasure pattern: the surviving chunk
    /// indices that reconstruction would read, ascending.
    ///
    /// A group with at most one erasure (counting its local parity) repairs
    /// from its own survivors; groups with more fall back to the global
    /// solve, which widens the set to every chunk the chosen equations
    /// touch.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArguments`] on an out-of-range index.
    /// * [`Error::Unrecoverable`] if no solvable selection exists.
    pub fn get_source(&self, erased: &[usize]) -> Result<Vec<usize>, Error> {
        let erased = self.check_erased(erased)?;
        Ok(self.source_plan(&erased)?.source)
    }

    /// Select reconstruction equations and sources for a validated erasure
    /// list.
    ///
    /// Candidate equations are ranked local rows first: groups repairing a
    /// single data erasure, then fallback groups whose local parity
    /// survived, then surviving global rows. Each candidate is accepted only
    /// if it is linearly independent of the accepted set over the unknown
    /// columns, so the system ends up square and invertible.
    fn source_plan(&self, erased: &[usize]) -> Result<SourcePlan, Error> {
        let n_local = self.locals.len();
        let mut is_erased = vec![false; self.n];
        for &e in erased {
            is_erased[e] = true;
        }
        let unknowns: Vec<usize> = erased.iter().copied().filter(|&e| e < self.k).collect();
        let erased_parity: Vec<usize> = erased.iter().copied().filter(|&e| e >= self.k).collect();

        let mut candidates: Vec<usize> = Vec::new();
        let mut fallback_locals: Vec<usize> = Vec::new();
        for (i, group) in self.locals.iter().enumerate() {
            let local_parity = self.k + i;
            if is_erased[local_parity] || group.range().all(|c| !is_erased[c]) {
                // No usable row, or no unknown for it to describe.
                continue;
            }
            if self.n_locally_erased(i, &is_erased) == 1 {
                candidates.push(local_parity);
            } else {
                fallback_locals.push(local_parity);
            }
        }
        candidates.extend(fallback_locals);
        candidates.extend((self.k + n_local..self.n).filter(|&c| !is_erased[c]));

        let mut rows: Vec<usize> = Vec::new();
        let mut basis: Vec<(usize, Vec<u8>)> = Vec::new();
        for cand in candidates {
            if rows.len() == unknowns.len() {
                break;
            }
            let row = self.matrix_row(cand);
            let restricted: Vec<u8> = unknowns.iter().map(|&c| row[c]).collect();
            if let Some(reduced) = reduce_against(&basis, restricted) {
                basis.push(reduced);
                rows.push(cand);
            }
        }
        if rows.len() < unknowns.len() {
            debug!(
                unknowns = unknowns.len(),
                independent = rows.len(),
                "erasure pattern beyond correction capacity"
            );
            return Err(Error::unrecoverable(format!(
                "{} erased data chunks, only {} independent parity equations",
                unknowns.len(),
                rows.len()
            )));
        }

        let mut in_source = vec![false; self.n];
        for &row_chunk in &rows {
            in_source[row_chunk] = true;
            for c in self.support(row_chunk) {
                if !is_erased[c] {
                    in_source[c] = true;
                }
            }
        }
        // Erased parities are re-encoded from their support after the data
        // solve, so their surviving support is read as well.
        for &parity in &erased_parity {
            for c in self.support(parity) {
                if !is_erased[c] {
                    in_source[c] = true;
                }
            }
        }
        let source: Vec<usize> = (0..self.n).filter(|&c| in_source[c]).collect();
        trace!(?erased, ?source, ?rows, "reconstruction plan");
        Ok(SourcePlan {
            source,
            rows,
            unknowns,
            erased_parity,
        })
    }

    /// Recover the chunks listed in `erased` in place.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArguments`] on a mismatched buffer or out-of-range
    ///   index.
    /// * [`Error::Unrecoverable`] if the pattern exceeds the code's
    ///   correction capacity.
    pub fn decode(&self, buf: &mut LrcBuf, erased: &[usize]) -> Result<(), Error> {
        Decoder::new(self, buf, erased)?.decode();
        Ok(())
    }
}

/// Reduce `row` against the elimination basis. Returns the normalized
/// residual with its pivot column if `row` is independent of the basis.
fn reduce_against(basis: &[(usize, Vec<u8>)], mut row: Vec<u8>) -> Option<(usize, Vec<u8>)> {
    for (pivot, b) in basis {
        let factor = row[*pivot];
        if factor != 0 {
            for (r, &bc) in row.iter_mut().zip(b) {
                *r ^= gf::mul(factor, bc);
            }
        }
    }
    let pivot = row.iter().position(|&c| c != 0)?;
    let scale = gf::inv(row[pivot]);
    for c in &mut row {
        *c = gf::mul(*c, scale);
    }
    Some((pivot, row))
}

/// Single-pattern decoder state.
///
/// Borrows the caller's buffer for the duration of the decode (the aliasing
/// role the C implementation fills with a shadow buffer) and owns the
/// reduced decoding matrix for the chosen equations. Built for one erasure
/// pattern and consumed by [`decode`](Decoder::decode).
pub struct Decoder<'a> {
    param: &'a LrcParam,
    buf: &'a mut LrcBuf,
    plan: SourcePlan,
    /// Inverse of the system matrix: accepted rows restricted to the
    /// unknown columns.
    decode_matrix: Vec<u8>,
}

impl<'a> Decoder<'a> {
    /// Validate the pattern, select sources and invert the reduced system.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArguments`] on a mismatched buffer or out-of-range
    ///   index.
    /// * [`Error::Unrecoverable`] if no solvable source selection exists.
    pub fn new(param: &'a LrcParam, buf: &'a mut LrcBuf, erased: &[usize]) -> Result<Self, Error> {
        param.check_buf(buf)?;
        let erased = param.check_erased(erased)?;
        debug!(n_erased = erased.len(), "building decoder");
        let plan = param.source_plan(&erased)?;

        let u = plan.unknowns.len();
        let mut system = vec![0u8; u * u];
        for (r, &row_chunk) in plan.rows.iter().enumerate() {
            let row = param.matrix_row(row_chunk);
            for (c, &col) in plan.unknowns.iter().enumerate() {
                system[r * u + c] = row[col];
            }
        }
        let mut decode_matrix = vec![0u8; u * u];
        if !gf::invert_matrix(&mut system, &mut decode_matrix, u) {
            // Selection only accepts independent rows, so the system is
            // invertible by construction.
            return Err(Error::unrecoverable("reduced decoding matrix is singular"));
        }
        Ok(Self {
            param,
            buf,
            plan,
            decode_matrix,
        })
    }

    /// Surviving chunk indices this decode reads, ascending.
    pub fn source(&self) -> &[usize] {
        &self.plan.source
    }

    /// Recover every erased chunk in place.
    pub fn decode(mut self) {
        let chunk_size = self.buf.chunk_size();
        let u = self.plan.unknowns.len();
        let mut is_unknown = vec![false; self.param.k];
        for &c in &self.plan.unknowns {
            is_unknown[c] = true;
        }

        // Each equation's right-hand side: the parity chunk with the
        // surviving data contributions of its row substituted out.
        let mut rhs: Vec<Vec<u8>> = Vec::with_capacity(u);
        for &row_chunk in &self.plan.rows {
            let row = self.param.matrix_row(row_chunk);
            let mut acc = self.buf.chunk(row_chunk).to_vec();
            for c in self.param.support(row_chunk) {
                let coef = row[c];
                if coef == 0 || is_unknown[c] {
                    continue;
                }
                let chunk = self.buf.chunk(c);
                if coef == 1 {
                    for (a, &b) in acc.iter_mut().zip(chunk) {
                        *a ^= b;
                    }
                } else {
                    for (a, &b) in acc.iter_mut().zip(chunk) {
                        *a ^= gf::mul(coef, b);
                    }
                }
            }
            rhs.push(acc);
        }

        // Unknown j is decode-matrix row j dotted across the RHS chunks.
        let rhs_refs: Vec<&[u8]> = rhs.iter().map(|v| v.as_slice()).collect();
        let mut recovered = vec![0u8; chunk_size];
        for (j, &chunk_idx) in self.plan.unknowns.iter().enumerate() {
            gf::vect_dot_prod(
                &self.decode_matrix[j * u..][..u],
                &rhs_refs,
                &mut recovered,
            );
            self.buf.chunk_mut(chunk_idx).copy_from_slice(&recovered);
        }

        // With the data complete again, erased parities are plain re-encodes.
        for &parity in &self.plan.erased_parity {
            let row = self.param.matrix_row(parity);
            let support = self.param.support(parity);
            let mut chunks = self.buf.chunks_mut();
            let (data, rest) = chunks.split_at_mut(self.param.k);
            let src: Vec<&[u8]> = data[support.clone()].iter().map(|chunk| &**chunk).collect();
            gf::vect_dot_prod(&row[support], &src, &mut rest[parity - self.param.k]);
        }
    }
}

/// Code parameters bundled with an owning chunk buffer.
///
/// # Examples
///
/// ```rust
/// # use erasure_lrc::Lrc;
/// // 4 data chunks in two groups of 2, plus 2 local and 2 global parities.
/// let mut lrc = Lrc::new(&[2, 2], 2, 16).unwrap();
/// lrc.chunk_mut(0).fill(0x11);
/// lrc.chunk_mut(1).fill(0x22);
/// lrc.chunk_mut(2).fill(0x33);
/// lrc.chunk_mut(3).fill(0x44);
/// lrc.encode().unwrap();
///
/// // The local parity of group 0 is the XOR of its data chunks.
/// assert!(lrc.chunk(4).iter().all(|&b| b == 0x11 ^ 0x22));
///
/// // Lose a chunk, recover it from the group's survivors.
/// let original = lrc.chunk(1).to_vec();
/// lrc.chunk_mut(1).fill(0);
/// lrc.decode(&[1]).unwrap();
/// assert_eq!(lrc.chunk(1), &original[..]);
/// ```
pub struct Lrc {
    param: LrcParam,
    buf: LrcBuf,
}

impl Lrc {
    /// Create a code from group sizes, global parity count and chunk size,
    /// with a freshly allocated zeroed buffer.
    ///
    /// # Errors
    ///
    /// Propagates [`LrcParam::new`] and [`LrcBuf::new`] failures.
    pub fn new(local_sizes: &[usize], m: usize, chunk_size: usize) -> Result<Self, Error> {
        let param = LrcParam::new(local_sizes, m)?;
        let buf = LrcBuf::new(&param, chunk_size)?;
        Ok(Self { param, buf })
    }

    /// The code parameters.
    pub fn param(&self) -> &LrcParam {
        &self.param
    }

    /// The chunk buffer.
    pub fn buf(&self) -> &LrcBuf {
        &self.buf
    }

    /// The chunk buffer, mutably.
    pub fn buf_mut(&mut self) -> &mut LrcBuf {
        &mut self.buf
    }

    /// Borrow chunk `idx`; data chunks are `0..k`.
    pub fn chunk(&self, idx: usize) -> &[u8] {
        self.buf.chunk(idx)
    }

    /// Mutably borrow chunk `idx`.
    pub fn chunk_mut(&mut self, idx: usize) -> &mut [u8] {
        self.buf.chunk_mut(idx)
    }

    /// Fill all parity chunks from the data chunks.
    pub fn encode(&mut self) -> Result<(), Error> {
        self.param.encode(&mut self.buf)
    }

    /// Recover the chunks listed in `erased` in place.
    pub fn decode(&mut self, erased: &[usize]) -> Result<(), Error> {
        self.param.decode(&mut self.buf, erased)
    }

    /// Source set for an erasure pattern; see [`LrcParam::get_source`].
    pub fn get_source(&self, erased: &[usize]) -> Result<Vec<usize>, Error> {
        self.param.get_source(erased)
    }
}
