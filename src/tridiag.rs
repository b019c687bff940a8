// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{Result, SolverError};

/// Pivot magnitude below which the system is treated as singular.
pub const PIVOT_EPS: f64 = 1e-30;

/// Solve a tridiagonal linear system with the Thomas algorithm.
///
/// The system is `a[p]*x[p-1] + b[p]*x[p] + c[p]*x[p+1] = d[p]` for
/// `p = 0..n-1`, with `a[0]` and `c[n-1]` unused. The forward sweep
/// eliminates `a` using `c` and `d` as in-place scratch, then back
/// substitution fills `x`. O(n), strictly sequential within one system.
///
/// # Errors
/// Returns `SingularSystem` if any pivot magnitude falls below [`PIVOT_EPS`].
pub fn solve_tridiagonal(
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
    d: &mut [f64],
    x: &mut [f64],
) -> Result<()> {
    let n = b.len();
    debug_assert!(a.len() >= n && c.len() >= n && d.len() >= n && x.len() >= n);
    if n == 0 {
        return Ok(());
    }

    if b[0].abs() < PIVOT_EPS {
        return Err(SolverError::SingularSystem { row: 0 });
    }
    c[0] /= b[0];
    d[0] /= b[0];

    for p in 1..n {
        let pivot = b[p] - a[p] * c[p - 1];
        if pivot.abs() < PIVOT_EPS {
            return Err(SolverError::SingularSystem { row: p });
        }
        c[p] /= pivot;
        d[p] = (d[p] - a[p] * d[p - 1]) / pivot;
    }

    x[n - 1] = d[n - 1];
    for p in (0..n - 1).rev() {
        x[p] = d[p] - c[p] * x[p + 1];
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residual(a: &[f64], b: &[f64], c: &[f64], d: &[f64], x: &[f64]) -> f64 {
        let n = b.len();
        let mut max = 0.0_f64;
        for p in 0..n {
            let mut lhs = b[p] * x[p];
            if p > 0 {
                lhs += a[p] * x[p - 1];
            }
            if p + 1 < n {
                lhs += c[p] * x[p + 1];
            }
            max = max.max((lhs - d[p]).abs());
        }
        max
    }

    #[test]
    fn known_3x3() {
        // [2 1 0; 1 2 1; 0 1 2] x = [3; 4; 3] -> x = [1; 1; 1]
        let a = [0.0, 1.0, 1.0];
        let b = [2.0, 2.0, 2.0];
        let mut c = [1.0, 1.0, 0.0];
        let mut d = [3.0, 4.0, 3.0];
        let mut x = [0.0; 3];
        solve_tridiagonal(&a, &b, &mut c, &mut d, &mut x).unwrap();
        for &v in &x {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn dirichlet_endpoint_rows() {
        // Rows x[0] = 5 and x[n-1] = -2 survive the solve exactly.
        let n = 6;
        let a = vec![0.0, -1.0, -1.0, -1.0, -1.0, 0.0];
        let b = vec![1.0, 4.0, 4.0, 4.0, 4.0, 1.0];
        let mut c = vec![0.0, -1.0, -1.0, -1.0, -1.0, 0.0];
        let mut d = vec![5.0, 1.0, 1.0, 1.0, 1.0, -2.0];
        let mut x = vec![0.0; n];
        let (ca, da) = (c.clone(), d.clone());
        solve_tridiagonal(&a, &b, &mut c, &mut d, &mut x).unwrap();
        assert_eq!(x[0], 5.0);
        assert_eq!(x[n - 1], -2.0);
        assert!(residual(&a, &b, &ca, &da, &x) < 1e-12);
    }

    #[test]
    fn singular_zero_first_pivot() {
        let a = [0.0, 1.0, 1.0];
        let b = [0.0, 2.0, 2.0];
        let mut c = [1.0, 1.0, 0.0];
        let mut d = [1.0, 1.0, 1.0];
        let mut x = [0.0; 3];
        let result = solve_tridiagonal(&a, &b, &mut c, &mut d, &mut x);
        assert!(matches!(result, Err(SolverError::SingularSystem { row: 0 })));
    }

    #[test]
    fn singular_interior_pivot() {
        // Row 1 becomes 0 after eliminating a: b - a*c' = 0.5 - 1*0.5 = 0.
        let a = [0.0, 1.0, 1.0];
        let b = [2.0, 0.5, 2.0];
        let mut c = [1.0, 1.0, 0.0];
        let mut d = [1.0, 1.0, 1.0];
        let mut x = [0.0; 3];
        let result = solve_tridiagonal(&a, &b, &mut c, &mut d, &mut x);
        assert!(matches!(result, Err(SolverError::SingularSystem { row: 1 })));
    }

    #[test]
    fn minimum_size_system() {
        let a = [0.0];
        let b = [4.0];
        let mut c = [0.0];
        let mut d = [8.0];
        let mut x = [0.0];
        solve_tridiagonal(&a, &b, &mut c, &mut d, &mut x).unwrap();
        assert_eq!(x[0], 2.0);
    }

    #[test]
    fn diagonally_dominant_sweep() {
        // Deterministic pseudo-random dominant systems of varying length.
        let mut seed = 0x2545_f491_4f6c_dd1d_u64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };

        for n in [3usize, 5, 17, 64, 200] {
            let mut a = vec![0.0; n];
            let mut b = vec![0.0; n];
            let mut c = vec![0.0; n];
            let mut d = vec![0.0; n];
            for p in 0..n {
                a[p] = next() - 0.5;
                c[p] = next() - 0.5;
                b[p] = 2.0 + a[p].abs() + c[p].abs() + next();
                d[p] = 10.0 * (next() - 0.5);
            }
            a[0] = 0.0;
            c[n - 1] = 0.0;

            let mut cs = c.clone();
            let mut ds = d.clone();
            let mut x = vec![0.0; n];
            solve_tridiagonal(&a, &b, &mut cs, &mut ds, &mut x).unwrap();
            let r = residual(&a, &b, &c, &d, &x);
            assert!(r < 1e-10, "n={}: residual {}", n, r);
        }
    }
}
