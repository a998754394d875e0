// Copyright (c) 2022-2024, Richard Lincoln. All rights reserved.

use num_complex::Complex64;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Computes the infinity norm: `max(abs(a))`
pub fn norm_inf(a: &[f64]) -> Option<f64> {
    if a.is_empty() {
        return None;
    }
    let mut max = f64::NEG_INFINITY;
    a.iter().for_each(|v| {
        let absvi = v.abs();
        if absvi > max {
            max = absvi
        }
    });
    Some(max)
}

/// Element-wise `a / b` that yields zero wherever `b` is zero.
pub fn div_or_zero(a: Complex64, b: Complex64) -> Complex64 {
    if b == Complex64::default() {
        Complex64::default()
    } else {
        a / b
    }
}

/// Largest element-wise `|a - b| / |scale|`.
pub(crate) fn max_relative_change(a: &[Complex64], b: &[Complex64], scale: &[Complex64]) -> f64 {
    a.iter()
        .zip(b)
        .zip(scale)
        .map(|((a, b), s)| {
            let s = s.norm();
            let d = (a - b).norm();
            if s > 0.0 {
                d / s
            } else {
                d
            }
        })
        .fold(0.0, f64::max)
}

/// Largest element-wise `||a| - |b||`.
pub(crate) fn max_magnitude_change(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(a, b)| (a.norm() - b.norm()).abs())
        .fold(0.0, f64::max)
}
