//! Coordinate-form stamp buffers.
//!
//! Device stamps append `(row, col, val)` entries for the Jacobian and
//! `(row, val)` entries for the right-hand side. Buffers are reserved once
//! from the device catalog and never grow; a stamp beyond capacity sets an
//! overflow flag that the assembler turns into an error naming the device.

use crate::error::SolveError;

use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

#[derive(Debug, Clone, Default)]
pub struct Triplets {
    y_row: Vec<usize>,
    y_col: Vec<usize>,
    y_val: Vec<f64>,
    j_row: Vec<usize>,
    j_val: Vec<f64>,
    y_cap: usize,
    j_cap: usize,
    overflow: bool,
}

impl Triplets {
    pub fn with_capacity(y_cap: usize, j_cap: usize) -> Self {
        Self {
            y_row: Vec::with_capacity(y_cap),
            y_col: Vec::with_capacity(y_cap),
            y_val: Vec::with_capacity(y_cap),
            j_row: Vec::with_capacity(j_cap),
            j_val: Vec::with_capacity(j_cap),
            y_cap,
            j_cap,
            overflow: false,
        }
    }

    /// Resets the write cursors, keeping the reservation.
    pub fn clear(&mut self) {
        self.y_row.clear();
        self.y_col.clear();
        self.y_val.clear();
        self.j_row.clear();
        self.j_val.clear();
        self.overflow = false;
    }

    #[inline]
    pub fn stamp_y(&mut self, i: usize, j: usize, v: f64) {
        if v == 0.0 {
            return;
        }
        if self.y_val.len() == self.y_cap {
            self.overflow = true;
            return;
        }
        self.y_row.push(i);
        self.y_col.push(j);
        self.y_val.push(v);
    }

    #[inline]
    pub fn stamp_j(&mut self, i: usize, v: f64) {
        if v == 0.0 {
            return;
        }
        if self.j_val.len() == self.j_cap {
            self.overflow = true;
            return;
        }
        self.j_row.push(i);
        self.j_val.push(v);
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn nnz_y(&self) -> usize {
        self.y_val.len()
    }

    pub fn nnz_j(&self) -> usize {
        self.j_val.len()
    }

    pub fn capacity(&self) -> (usize, usize) {
        (self.y_cap, self.j_cap)
    }

    /// Appends all entries of another buffer.
    pub fn extend_from(&mut self, other: &Triplets) {
        for k in 0..other.y_val.len() {
            self.stamp_y(other.y_row[k], other.y_col[k], other.y_val[k]);
        }
        for k in 0..other.j_val.len() {
            self.stamp_j(other.j_row[k], other.j_val[k]);
        }
    }

    pub fn y_entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.y_val.len()).map(move |k| (self.y_row[k], self.y_col[k], self.y_val[k]))
    }

    pub fn j_entries(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.j_val.len()).map(move |k| (self.j_row[k], self.j_val[k]))
    }

    /// Dense right-hand side of length `n`.
    pub fn dense_j(&self, n: usize) -> Vec<f64> {
        let mut j = vec![0.0; n];
        for (i, v) in self.j_entries() {
            j[i] += v;
        }
        j
    }

    /// Compressed-row form with duplicate entries summed.
    pub fn to_csr(&self, n: usize) -> CsrMatrix {
        let mut coo = Coo::with_capacity(n, n, self.y_val.len());
        coo.extend(&self.y_row, &self.y_col, &self.y_val);
        coo.to_csr()
    }

    /// Transposed copy of the Jacobian entries whose row and column both own
    /// a dual index, mapped into dual space.
    ///
    /// For a linear constraint row `i` with entry `Y[i][j]`, the stationarity
    /// row of unknown `j` receives `Y[i][j]` times the multiplier of row `i`.
    pub fn stamp_transpose(&self, dual_of: &[Option<usize>], out: &mut Triplets) {
        for (i, j, v) in self.y_entries() {
            if let (Some(di), Some(dj)) = (dual_of[i], dual_of[j]) {
                out.stamp_y(dj, di, v);
            }
        }
    }
}

/// Compressed-row Newton matrix.
pub type CsrMatrix = CSR<usize, f64>;

/// Stored `(row, col, val)` entries of a compressed-row matrix, row by row.
pub fn csr_entries(a: &CsrMatrix) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
    let (rowptr, colidx, values) = (a.rowptr(), a.colidx(), a.values());
    (0..a.rows()).flat_map(move |i| (rowptr[i]..rowptr[i + 1]).map(move |k| (i, colidx[k], values[k])))
}

/// Linear system with empty rows and columns removed.
#[derive(Clone)]
pub struct ReducedSystem {
    /// Full index of each retained row.
    pub rows: Vec<usize>,
    /// Full index of each retained column.
    pub cols: Vec<usize>,
    pub a: CsrMatrix,
    pub b: Vec<f64>,
    /// Empty rows whose right-hand side was nonzero and got discarded.
    pub inconsistent: Vec<usize>,
}

impl ReducedSystem {
    /// Drops rows and columns of `y` without a nonzero entry, and the
    /// matching entries of `j`.
    ///
    /// Unused phase slots and disabled auxiliaries leave such gaps. The
    /// remaining system must be square.
    pub fn reduce(y: &CsrMatrix, j: &[f64]) -> Result<Self, SolveError> {
        let n = y.rows();
        let mut row_used = vec![false; n];
        let mut col_used = vec![false; y.cols()];
        for (i, c, v) in csr_entries(y) {
            if v != 0.0 {
                row_used[i] = true;
                col_used[c] = true;
            }
        }
        let rows: Vec<usize> = (0..n).filter(|&i| row_used[i]).collect();
        let cols: Vec<usize> = (0..y.cols()).filter(|&c| col_used[c]).collect();

        if rows.len() != cols.len() {
            let zero_rows: Vec<usize> = (0..n).filter(|&i| !row_used[i] && col_used[i]).collect();
            let zero_cols: Vec<usize> = (0..n).filter(|&c| !col_used[c] && row_used[c]).collect();
            log::warn!("Rows with all zero: {:?}", zero_rows);
            log::warn!("Columns with all zero: {:?}", zero_cols);
            return Err(SolveError::NonSquare {
                rows: rows.len(),
                cols: cols.len(),
            });
        }

        let inconsistent: Vec<usize> = (0..n).filter(|&i| !row_used[i] && j[i] != 0.0).collect();
        if !inconsistent.is_empty() {
            log::warn!(
                "right-hand side dropped on {} empty rows: {:?}",
                inconsistent.len(),
                inconsistent
            );
        }

        let a = y
            .select(Some(rows.as_slice()), Some(cols.as_slice()))
            .map_err(|e| SolveError::Sparse(e.to_string()))?;
        let b = rows.iter().map(|&i| j[i]).collect();

        Ok(Self {
            rows,
            cols,
            a,
            b,
            inconsistent,
        })
    }

    /// Writes a reduced solution into a full-length vector. Unknowns that
    /// were removed keep the value they have in `full`.
    pub fn scatter(&self, x: &[f64], full: &mut [f64]) {
        for (k, &c) in self.cols.iter().enumerate() {
            full[c] = x[k];
        }
    }
}
