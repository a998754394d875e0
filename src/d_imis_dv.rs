use crate::error::GridResult;
use crate::math::div_or_zero;
use crate::sbus::Injection;
use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

/// Computes partial derivatives of current balance w.r.t. cartesian voltage.
///
/// The current mismatch is
///
/// ```text
///     Imis = Ybus * V - conj(Sw ./ V) - H' * conj(Sd ./ (H * V))
/// ```
///
/// where `Sw` is wye and `Sd` delta power injection. Returns the complex
/// derivatives w.r.t. the real and imaginary parts of voltage, for all
/// node-phases:
///
/// ```text
///     dImis/dVr = Ybus + M
///     dImis/dVi = 1j * (Ybus - M)
///     M = diag(conj(Sw ./ V.^2)) + H' * diag(conj(Sd ./ (H * V).^2)) * H
/// ```
pub fn d_imis_dv(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    s: &Injection,
    delta_pairs: &[Option<(usize, usize)>],
) -> GridResult<(CSR<usize, Complex64>, CSR<usize, Complex64>)> {
    let n = v.len();

    let mut m = Coo::with_size(n, n);
    for (i, (s_w, v)) in s.wye.iter().zip(v).enumerate() {
        m.push(i, i, div_or_zero(*s_w, v * v).conj());
    }
    for (k, pair) in delta_pairs.iter().enumerate() {
        if let Some((p, q)) = *pair {
            let v_pq = v[p] - v[q];
            let d = div_or_zero(s.delta[k], v_pq * v_pq).conj();
            if d == Complex64::default() {
                continue;
            }
            m.push(p, p, d);
            m.push(p, q, -d);
            m.push(q, p, -d);
            m.push(q, q, d);
        }
    }
    let m = m.to_csr();

    let d_imis_dvr = y_bus + &m;
    let d_imis_dvi = Complex64::i() * (y_bus - m);

    Ok((d_imis_dvr, d_imis_dvi))
}
