use crate::triplet::{csr_entries, CsrMatrix};

use anyhow::{anyhow, bail, Result};
use faer::prelude::SpSolver;
use faer::sparse::solvers::{Lu, SymbolicLu};
use faer::sparse::SparseColMat;
use faer::{FaerMat, Mat};

/// Factorizes and solves a square real system `A·x = b`.
///
/// The factorization is rebuilt on every call: the sparsity pattern of the
/// Newton matrix is stable but its values change each iteration.
pub trait LinearSolver {
    fn solve(&self, a: &CsrMatrix, b: &[f64]) -> Result<Vec<f64>>;
}

/// Sparse LU with fill-reducing ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseLu;

impl LinearSolver for SparseLu {
    fn solve(&self, a: &CsrMatrix, b: &[f64]) -> Result<Vec<f64>> {
        let n = check_dims(a, b)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let triplets: Vec<(usize, usize, f64)> = csr_entries(a).filter(|e| e.2 != 0.0).collect();
        let sparse_mat = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| anyhow!("sparse matrix build failed: {:?}", e))?;

        let symbolic = SymbolicLu::try_new(sparse_mat.as_ref().symbolic())
            .map_err(|e| anyhow!("symbolic factorization failed: {:?}", e))?;
        let lu = Lu::try_new_with_symbolic(symbolic, sparse_mat.as_ref())
            .map_err(|e| anyhow!("LU factorization failed: {:?}", e))?;

        let mut rhs = Mat::<f64>::zeros(n, 1);
        for (i, &v) in b.iter().enumerate() {
            rhs.write(i, 0, v);
        }
        let x = lu.solve(&rhs);

        finite((0..n).map(|i| x.read(i, 0)).collect())
    }
}

/// Dense LU with partial pivoting, for small systems and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve(&self, a: &CsrMatrix, b: &[f64]) -> Result<Vec<f64>> {
        let n = check_dims(a, b)?;
        let mut rows = vec![vec![0.0; n]; n];
        for (i, j, v) in csr_entries(a) {
            rows[i][j] += v;
        }
        dense_solve(&rows, b)
    }
}

/// Solves a dense system given row by row.
pub fn dense_solve(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>> {
    let n = b.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if a.len() != n || a.iter().any(|r| r.len() != n) {
        bail!("dimension mismatch: matrix is not {}x{}", n, n);
    }

    let mut mat = Mat::<f64>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            mat.write(i, j, a[i][j]);
        }
    }
    let mut rhs = Mat::<f64>::zeros(n, 1);
    for i in 0..n {
        rhs.write(i, 0, b[i]);
    }

    let lu = mat.partial_piv_lu();
    let x = lu.solve(&rhs);

    finite((0..n).map(|i| x.read(i, 0)).collect())
}

fn check_dims(a: &CsrMatrix, b: &[f64]) -> Result<usize> {
    let n = a.rows();
    if a.cols() != n || b.len() != n {
        bail!(
            "dimension mismatch: matrix is {}x{}, rhs length is {}",
            a.rows(),
            a.cols(),
            b.len()
        );
    }
    Ok(n)
}

fn finite(x: Vec<f64>) -> Result<Vec<f64>> {
    if x.iter().any(|v| !v.is_finite()) {
        bail!("LU produced NaN/Inf solution");
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triplet::Triplets;

    fn two_by_two() -> CsrMatrix {
        let mut t = Triplets::with_capacity(4, 0);
        t.stamp_y(0, 0, 2.0);
        t.stamp_y(0, 1, 1.0);
        t.stamp_y(1, 0, 5.0);
        t.stamp_y(1, 1, 7.0);
        t.to_csr(2)
    }

    #[test]
    fn sparse_lu_solves_known_2x2() {
        let x = SparseLu.solve(&two_by_two(), &[11.0, 13.0]).unwrap();
        assert!((x[0] - 64.0 / 9.0).abs() < 1e-10);
        assert!((x[1] + 29.0 / 9.0).abs() < 1e-10);
    }

    #[test]
    fn dense_lu_agrees_with_sparse() {
        let a = two_by_two();
        let xs = SparseLu.solve(&a, &[1.0, -2.0]).unwrap();
        let xd = DenseLu.solve(&a, &[1.0, -2.0]).unwrap();
        for (s, d) in xs.iter().zip(&xd) {
            assert!((s - d).abs() < 1e-12);
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        assert!(SparseLu.solve(&two_by_two(), &[1.0]).is_err());
    }
}
