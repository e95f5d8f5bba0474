//! Flow past each sensor of the chain.
//!
//! The estimator needs the speed of the water moving past every sensor to
//! convert temporal gradients into spatial ones. Retrieval of that speed is
//! pluggable: a current-profiler grid interpolated in time and depth, or a
//! constant passthrough that disables the correction.

use chrono::{DateTime, Utc};

use crate::error::{SpectraError, SpectraResult};
use crate::types::seconds_between;

/// Capability to query flow speed past a sensor.
pub trait FlowPastSensor {
    /// Flow speed at the given times and positions.
    ///
    /// `z` holds height (negative below the surface) per (time, sensor) in
    /// row-major order with the sensor axis fastest; `time` is broadcast
    /// across the sensor axis. The output has the shape of `z`.
    fn flow_past_sensor(&self, time: &[DateTime<Utc>], z: &[f64], nsensors: usize) -> Vec<f64>;
}

/// Unit flow speed everywhere. Makes the spatial gradient equal the plain
/// time-derivative, disabling flow correction.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformFlow;

impl FlowPastSensor for UniformFlow {
    fn flow_past_sensor(&self, _time: &[DateTime<Utc>], z: &[f64], _nsensors: usize) -> Vec<f64> {
        vec![1.0; z.len()]
    }
}

/// Flow speed from a shipboard current profiler.
///
/// Holds an in-memory (time, depth) grid of ship-relative water velocities.
/// Queries are interpolated bilinearly; coordinates outside the grid are
/// clamped to the nearest edge instead of erroring, since tow sections
/// routinely overhang the profiler's range by a bin or two.
#[derive(Clone, Debug)]
pub struct AdcpFlow {
    t0: DateTime<Utc>,
    seconds: Vec<f64>,
    depths: Vec<f64>,
    u: Vec<f64>, // [time * depth] eastward minus ship
    v: Vec<f64>, // [time * depth] northward minus ship
}

impl AdcpFlow {
    /// Build from a profiler grid of `u`/`v` water velocities relative to the
    /// ship, shaped (time, depth) row-major.
    ///
    /// Duplicate timestamps are dropped (first occurrence wins). Gaps (NaN)
    /// in a depth bin are filled linearly along time, and runs at either end
    /// take the nearest valid value; a bin with no valid samples is rejected.
    pub fn new(
        time: &[DateTime<Utc>],
        depths: Vec<f64>,
        u: Vec<f64>,
        v: Vec<f64>,
    ) -> SpectraResult<Self> {
        if time.is_empty() || depths.is_empty() {
            return Err(SpectraError::InvalidParameter(
                "profiler grid must have at least one time and one depth".into(),
            ));
        }
        if depths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpectraError::InvalidParameter(
                "profiler depths must be strictly increasing".into(),
            ));
        }
        if time.windows(2).any(|w| w[1] < w[0]) {
            return Err(SpectraError::InvalidParameter(
                "profiler timestamps must be non-decreasing".into(),
            ));
        }
        let ndepth = depths.len();
        let n = time.len() * ndepth;
        if u.len() != n {
            return Err(SpectraError::ShapeMismatch {
                name: "u",
                expected: n,
                actual: u.len(),
            });
        }
        if v.len() != n {
            return Err(SpectraError::ShapeMismatch {
                name: "v",
                expected: n,
                actual: v.len(),
            });
        }

        // Drop duplicate timestamps, keeping the first row of each run.
        let mut keep = Vec::with_capacity(time.len());
        for (i, t) in time.iter().enumerate() {
            if i == 0 || *t != time[i - 1] {
                keep.push(i);
            }
        }
        let t0 = time[0];
        let seconds: Vec<f64> = keep.iter().map(|&i| seconds_between(t0, time[i])).collect();
        let gather = |src: &[f64]| -> Vec<f64> {
            keep.iter()
                .flat_map(|&i| src[i * ndepth..(i + 1) * ndepth].iter().copied())
                .collect()
        };
        let mut u = gather(&u);
        let mut v = gather(&v);

        fill_gaps_along_time(&seconds, ndepth, &mut u)?;
        fill_gaps_along_time(&seconds, ndepth, &mut v)?;

        Ok(Self {
            t0,
            seconds,
            depths,
            u,
            v,
        })
    }
}

impl FlowPastSensor for AdcpFlow {
    fn flow_past_sensor(&self, time: &[DateTime<Utc>], z: &[f64], nsensors: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(z.len());
        for (i, t) in time.iter().enumerate() {
            let s = seconds_between(self.t0, *t);
            for sensor in 0..nsensors {
                let depth = -z[i * nsensors + sensor];
                let ue = interp2(&self.seconds, &self.depths, &self.u, s, depth);
                let vn = interp2(&self.seconds, &self.depths, &self.v, s, depth);
                out.push(ue.hypot(vn));
            }
        }
        out
    }
}

/// Linearly interpolate over interior NaN runs of each depth bin along the
/// time coordinate; extend edge runs with the nearest valid value.
fn fill_gaps_along_time(seconds: &[f64], ndepth: usize, grid: &mut [f64]) -> SpectraResult<()> {
    let ntime = seconds.len();
    for j in 0..ndepth {
        let valid: Vec<usize> = (0..ntime).filter(|&i| grid[i * ndepth + j].is_finite()).collect();
        if valid.is_empty() {
            return Err(SpectraError::InvalidParameter(format!(
                "profiler depth bin {j} has no valid samples"
            )));
        }
        if valid.len() == ntime {
            continue;
        }
        for i in 0..ntime {
            if grid[i * ndepth + j].is_finite() {
                continue;
            }
            let next = valid.partition_point(|&k| k < i);
            grid[i * ndepth + j] = if next == 0 {
                grid[valid[0] * ndepth + j]
            } else if next == valid.len() {
                grid[valid[valid.len() - 1] * ndepth + j]
            } else {
                let (a, b) = (valid[next - 1], valid[next]);
                let w = (seconds[i] - seconds[a]) / (seconds[b] - seconds[a]);
                let (ya, yb) = (grid[a * ndepth + j], grid[b * ndepth + j]);
                ya + w * (yb - ya)
            };
        }
    }
    Ok(())
}

/// Bilinear interpolation on a (time-seconds, depth) grid with coordinates
/// clamped to the grid bounds.
fn interp2(seconds: &[f64], depths: &[f64], grid: &[f64], s: f64, d: f64) -> f64 {
    let ndepth = depths.len();
    let (i, ws) = bracket(seconds, s);
    let (j, wd) = bracket(depths, d);
    // Single-point axes bracket with weight zero, so the clamp is harmless.
    let i1 = (i + 1).min(seconds.len() - 1);
    let j1 = (j + 1).min(ndepth - 1);
    let at = |ii: usize, jj: usize| grid[ii * ndepth + jj];
    let lo = at(i, j) * (1.0 - wd) + at(i, j1) * wd;
    let hi = at(i1, j) * (1.0 - wd) + at(i1, j1) * wd;
    lo * (1.0 - ws) + hi * ws
}

/// Index of the lower bracketing grid point and the interpolation weight for
/// a clamped coordinate. Weight is 0 on or below the grid, 1 at or above it.
fn bracket(coords: &[f64], x: f64) -> (usize, f64) {
    let n = coords.len();
    if n == 1 || x <= coords[0] {
        return (0, 0.0);
    }
    if x >= coords[n - 1] {
        return (n - 2, 1.0);
    }
    let i = coords.partition_point(|&c| c <= x) - 1;
    let w = (x - coords[i]) / (coords[i + 1] - coords[i]);
    (i, w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn times(n: usize, step_s: i64) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|i| Utc.timestamp_opt(1_700_000_000 + i as i64 * step_s, 0).unwrap())
            .collect()
    }

    #[test]
    fn test_uniform_flow_is_unity() {
        let t = times(3, 1);
        let z = vec![-5.0, -10.0, -5.0, -10.0, -5.0, -10.0];
        let u = UniformFlow.flow_past_sensor(&t, &z, 2);
        assert_eq!(u, vec![1.0; 6]);
    }

    #[test]
    fn test_adcp_bilinear_interpolation() {
        // 2 times x 2 depths, u grows linearly in both axes, v = 0
        let t = times(2, 10);
        let flow = AdcpFlow::new(
            &t,
            vec![5.0, 15.0],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![0.0; 4],
        )
        .unwrap();

        // Midpoint of both axes: mean of all four corners
        let q = vec![Utc.timestamp_opt(1_700_000_005, 0).unwrap()];
        let got = flow.flow_past_sensor(&q, &[-10.0], 1);
        assert!((got[0] - 2.5).abs() < 1e-12, "expected 2.5, got {}", got[0]);

        // Exactly on a grid node
        let got = flow.flow_past_sensor(&t[..1], &[-5.0], 1);
        assert!((got[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_adcp_speed_combines_components() {
        let t = times(1, 1);
        let flow = AdcpFlow::new(&t, vec![10.0], vec![3.0], vec![4.0]).unwrap();
        let got = flow.flow_past_sensor(&t, &[-10.0], 1);
        assert!((got[0] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_adcp_clamps_outside_grid() {
        let t = times(2, 10);
        let flow = AdcpFlow::new(
            &t,
            vec![5.0, 15.0],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![0.0; 4],
        )
        .unwrap();

        // Shallower than the grid and before the first profile: corner value
        let early = vec![Utc.timestamp_opt(1_699_999_000, 0).unwrap()];
        let got = flow.flow_past_sensor(&early, &[0.0], 1);
        assert!((got[0] - 1.0).abs() < 1e-12);

        // Deeper and later than the grid: opposite corner
        let late = vec![Utc.timestamp_opt(1_700_099_000, 0).unwrap()];
        let got = flow.flow_past_sensor(&late, &[-100.0], 1);
        assert!((got[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_adcp_fills_gaps() {
        // Interior NaN interpolates, edge NaN takes nearest valid value
        let t = times(4, 10);
        let flow = AdcpFlow::new(
            &t,
            vec![10.0],
            vec![f64::NAN, 1.0, f64::NAN, 3.0],
            vec![0.0; 4],
        )
        .unwrap();
        assert!((flow.u[0] - 1.0).abs() < 1e-12);
        assert!((flow.u[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_adcp_rejects_all_nan_bin() {
        let t = times(2, 10);
        let err = AdcpFlow::new(
            &t,
            vec![5.0, 15.0],
            vec![f64::NAN, 1.0, f64::NAN, 2.0],
            vec![0.0; 4],
        );
        assert!(matches!(err, Err(SpectraError::InvalidParameter(_))));
    }

    #[test]
    fn test_adcp_drops_duplicate_timestamps() {
        let mut t = times(3, 10);
        t[1] = t[0];
        let flow = AdcpFlow::new(&t, vec![10.0], vec![1.0, 9.0, 2.0], vec![0.0; 3]).unwrap();
        assert_eq!(flow.seconds.len(), 2);
        assert_eq!(flow.u, vec![1.0, 2.0]);
    }
}
