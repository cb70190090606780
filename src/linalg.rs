use ndarray::{Array1, Array2};

use crate::error::{Result, SurvivalError};

/// pivots smaller than this fraction of the largest entry are treated as zero
const RELATIVE_PIVOT_TOLERANCE: f64 = 1e-11;

/// Solve `A x = b` by gaussian elimination with partial pivoting.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(SurvivalError::invalid_dimensions("matrix dimensions mismatch"));
    }
    let rhs = b.clone().into_shape_with_order((n, 1)).map_err(|e| {
        SurvivalError::invalid_dimensions(e.to_string())
    })?;
    let x = solve_many(a, rhs)?;
    Ok(x.column(0).to_owned())
}

/// inverse of a square matrix (singular -> `SingularHessian`)
pub fn invert(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(SurvivalError::invalid_dimensions("can only invert square matrices"));
    }
    solve_many(a, Array2::eye(n))
}

fn solve_many(a: &Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let mut a = a.clone();
    let scale = a.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    let threshold = scale * RELATIVE_PIVOT_TOLERANCE;
    let n_rhs = b.ncols();

    // forward elimination
    for i in 0..n {
        let mut max_row = i;
        for k in i + 1..n {
            if a[[k, i]].abs() > a[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if !(a[[max_row, i]].abs() > threshold) {
            return Err(SurvivalError::singular_hessian(format!(
                "pivot {} is numerically zero (column {})",
                a[[max_row, i]],
                i
            )));
        }

        if max_row != i {
            for j in 0..n {
                a.swap([i, j], [max_row, j]);
            }
            for j in 0..n_rhs {
                b.swap([i, j], [max_row, j]);
            }
        }

        for k in i + 1..n {
            let factor = a[[k, i]] / a[[i, i]];
            if factor == 0.0 {
                continue;
            }
            for j in i..n {
                a[[k, j]] -= factor * a[[i, j]];
            }
            for j in 0..n_rhs {
                b[[k, j]] -= factor * b[[i, j]];
            }
        }
    }

    // back substitution
    let mut x = Array2::zeros((n, n_rhs));
    for c in 0..n_rhs {
        for i in (0..n).rev() {
            let mut v = b[[i, c]];
            for j in i + 1..n {
                v -= a[[i, j]] * x[[j, c]];
            }
            x[[i, c]] = v / a[[i, i]];
        }
    }

    Ok(x)
}
