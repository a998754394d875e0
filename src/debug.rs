use crate::flows::OperatingPoint;
use crate::model::GridModel;

use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;
use std::fmt::Write;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

const SHORT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(true)
    .max_significant_digits(6);

pub fn format_complex(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.signum() < 0.0 { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
}

pub fn format_rect_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_complex).collect();
    format!("[{}]", a.join(", "))
}

pub fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_polar).collect();
    format!("[{}]", a.join(", "))
}

/// Per node-phase voltage and per branch-phase flow table of a solved
/// operating point.
pub fn format_operating_point(model: &GridModel, op: &OperatingPoint) -> String {
    let mut s = String::new();
    let vm_pu = op.voltage_magnitude_per_unit(model);

    let _ = writeln!(s, "{:<16} {:>12} {:>12} {:>10}", "node-phase", "|V|", "angle(deg)", "|V| (pu)");
    for (i, v) in op.voltage.iter().enumerate() {
        let _ = writeln!(
            s,
            "{:<16} {:>12} {:>12} {:>10}",
            model.node_phase_label(i),
            dtoa(v.norm(), SHORT_CONFIG),
            dtoa(v.arg() * 180.0 / PI, SHORT_CONFIG),
            dtoa(vm_pu[i], SHORT_CONFIG),
        );
    }

    let _ = writeln!(s);
    let _ = writeln!(s, "{:<16} {:>24} {:>24}", "branch-phase", "S from", "S to");
    for (b, (s_f, s_t)) in op
        .branch_power_from
        .iter()
        .zip(&op.branch_power_to)
        .enumerate()
    {
        let _ = writeln!(
            s,
            "{:<16} {:>24} {:>24}",
            model.branch_phase_label(b),
            format_complex(s_f),
            format_complex(s_t),
        );
    }

    let loss = op.total_loss();
    let _ = writeln!(
        s,
        "\ntotal loss {} ({} iterations)",
        format_complex(&loss),
        op.iterations
    );
    s
}
