//! Structural connectivity and conduction delays.

use ndarray::Array2;
use nmm_core::{NmmError, Result, Time};

/// Prepare the connectivity matrix for coupling.
///
/// Weights must be finite and non-negative. The diagonal is cleared and, for
/// more than one node, the matrix is divided by its maximum so that `K_gl`
/// keeps the same meaning across networks. An all-zero matrix stays zero.
pub fn normalize_connectivity(cmat: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = cmat.dim();
    if rows == 0 || rows != cols {
        return Err(NmmError::config(format!(
            "Cmat must be square and non-empty, got {:?}",
            cmat.dim()
        )));
    }
    if let Some(((i, j), w)) = cmat
        .indexed_iter()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(NmmError::config(format!(
            "Cmat[{}, {}] = {} is not a finite non-negative weight",
            i, j, w
        )));
    }

    let mut normalized = cmat.clone();
    normalized.diag_mut().fill(0.0);
    if rows > 1 {
        let max = normalized.fold(0.0f64, |acc, &w| acc.max(w));
        if max > 0.0 {
            normalized.mapv_inplace(|w| w / max);
        }
    }
    Ok(normalized)
}

/// Inter-node delays in ms from fiber lengths (mm) and conduction velocity (m/s).
///
/// A non-positive velocity disables delays.
pub fn delay_matrix(length_mat: &Array2<f64>, signal_v: f64) -> Array2<Time> {
    if signal_v > 0.0 {
        length_mat.mapv(|length| length / signal_v)
    } else {
        Array2::zeros(length_mat.raw_dim())
    }
}

/// Discretize delays (ms) into whole integration steps, diagonal cleared.
pub fn delay_steps(delays: &Array2<Time>, dt: Time) -> Result<Array2<usize>> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(NmmError::config(format!("dt must be positive, got {}", dt)));
    }
    if let Some(((i, j), d)) = delays
        .indexed_iter()
        .find(|(_, d)| !d.is_finite() || **d < 0.0)
    {
        return Err(NmmError::config(format!(
            "delay[{}, {}] = {} ms is not a finite non-negative delay",
            i, j, d
        )));
    }
    let mut steps = Array2::zeros(delays.raw_dim());
    for ((i, j), &d) in delays.indexed_iter() {
        let rounded = (d / dt).round();
        if !rounded.is_finite() || rounded >= usize::MAX as f64 {
            return Err(NmmError::config(format!(
                "delay[{}, {}] = {} ms is too long for dt = {} ms",
                i, j, d, dt
            )));
        }
        steps[[i, j]] = rounded as usize;
    }
    steps.diag_mut().fill(0);
    Ok(steps)
}

/// Delay matrix in steps for a network, the 1x1 zero matrix for a single node
pub fn network_delay_steps(
    length_mat: &Array2<f64>,
    signal_v: f64,
    dt: Time,
) -> Result<Array2<usize>> {
    if length_mat.nrows() <= 1 {
        return Ok(Array2::zeros((1, 1)));
    }
    delay_steps(&delay_matrix(length_mat, signal_v), dt)
}

/// Largest delay in steps, 0 for an empty matrix
pub fn max_delay(delay_steps: &Array2<usize>) -> usize {
    delay_steps.iter().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_connectivity() {
        let cmat = array![[3.0, 2.0, 0.0], [4.0, 9.0, 1.0], [0.0, 0.5, 1.0]];
        let norm = normalize_connectivity(&cmat).unwrap();
        assert_eq!(norm.diag().to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(norm[[1, 0]], 1.0);
        assert_eq!(norm[[0, 1]], 0.5);
        assert_eq!(norm[[2, 1]], 0.125);
    }

    #[test]
    fn test_normalize_keeps_zero_and_single_node() {
        let zero = normalize_connectivity(&Array2::zeros((3, 3))).unwrap();
        assert!(zero.iter().all(|&w| w == 0.0));

        let identity = normalize_connectivity(&Array2::eye(3)).unwrap();
        assert!(identity.iter().all(|&w| w == 0.0));

        let single = normalize_connectivity(&array![[7.0]]).unwrap();
        assert_eq!(single[[0, 0]], 0.0);
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        assert!(normalize_connectivity(&array![[0.0, -1.0], [1.0, 0.0]]).is_err());
        assert!(normalize_connectivity(&array![[0.0, f64::NAN], [1.0, 0.0]]).is_err());
        assert!(normalize_connectivity(&Array2::zeros((2, 3))).is_err());
    }

    #[test]
    fn test_delay_steps() {
        // 40 mm at 20 m/s = 2 ms = 20 steps of 0.1 ms
        let lengths = array![[0.0, 40.0], [14.0, 5.0]];
        let steps = network_delay_steps(&lengths, 20.0, 0.1).unwrap();
        assert_eq!(steps, array![[0, 20], [7, 0]]);
        assert_eq!(max_delay(&steps), 20);
    }

    #[test]
    fn test_unrepresentable_delay_rejected() {
        let lengths = array![[0.0, 1e300], [1.0, 0.0]];
        let err = network_delay_steps(&lengths, 20.0, 0.1).unwrap_err();
        assert!(matches!(err, NmmError::Configuration(_)));
        assert!(delay_steps(&array![[0.0, 1.0], [1.0, 0.0]], 1e-320).is_err());
    }

    #[test]
    fn test_delay_disabled() {
        let lengths = array![[0.0, 40.0], [40.0, 0.0]];
        let steps = network_delay_steps(&lengths, 0.0, 0.1).unwrap();
        assert_eq!(max_delay(&steps), 0);
        assert_eq!(network_delay_steps(&array![[12.0]], 20.0, 0.1).unwrap(), array![[0]]);
    }
}
