//! Krylov subspace solvers.
//!
//! Every method starts from `x₀ = 0` and stops once the residual norm drops
//! to `tolerance · ‖b‖`, or fails after `max_iterations` iterations. A zero
//! right-hand side returns the zero vector without iterating.
//!
//! | method     | matrix requirement          | preconditioning |
//! |------------|-----------------------------|-----------------|
//! | `cg`       | symmetric positive definite | left            |
//! | `bicg`     | general                     | left            |
//! | `bicgstab` | general                     | right           |
//! | `cgs`      | general                     | right           |
//! | `gmres`    | general                     | right           |
//! | `minres`   | symmetric                   | SPD `M` only    |
//! | `qmr`      | general                     | right           |
//! | `gcrotmk`  | general                     | right, flexible |
//! | `lgmres`   | general                     | right, flexible |

use super::preconditioner::{self, Preconditioner};
use super::config::{Method, PreconditionerKind, SolverSpec};
use super::{check_dimensions, Backend, Solution, SolveStats, Solver, SolverFamily};
use crate::error::{Error, Result};
use crate::sparse::{axpy, dot, norm2, residual, spmv, spmv_transpose, CsrMatrix};
use nalgebra::DMatrix;

/// Krylov basis size between GMRES restarts. Also the inner cycle length
/// of LGMRES and GCROT(m, k).
pub const DEFAULT_RESTART: usize = 30;

/// Error approximations LGMRES carries between cycles.
pub const LGMRES_OUTER: usize = 3;

/// Correction pairs GCROT(m, k) retains between cycles.
pub const GCROT_KEEP: usize = 20;

/// Stopping rule for one solve.
#[derive(Debug, Clone, Copy)]
pub struct StopCriteria {
    /// Absolute residual norm to reach.
    pub target: f64,
    pub max_iterations: usize,
}

impl StopCriteria {
    /// `tolerance · ‖b‖`
    pub fn relative(tolerance: f64, b: &[f64], max_iterations: usize) -> Self {
        Self {
            target: tolerance * norm2(b),
            max_iterations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    Converged,
    MaxIterations,
    /// A recurrence divided by zero or lost definiteness.
    Breakdown,
}

#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub x: Vec<f64>,
    pub iterations: usize,
    /// Residual norm as tracked by the method.
    pub residual: f64,
    pub status: IterationStatus,
}

fn outcome(x: Vec<f64>, iterations: usize, residual: f64, status: IterationStatus) -> IterationOutcome {
    IterationOutcome {
        x,
        iterations,
        residual,
        status,
    }
}

fn usable(v: f64) -> bool {
    v != 0.0 && v.is_finite()
}

/// Preconditioned conjugate gradients.
pub fn cg(a: &CsrMatrix, b: &[f64], m: &dyn Preconditioner, stop: StopCriteria) -> IterationOutcome {
    let n = b.len();
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let mut z = vec![0.0; n];
    m.apply(&r, &mut z);
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz = dot(&r, &z);

    for iter in 0..stop.max_iterations {
        spmv(a, &p, &mut ap);
        let pap = dot(&p, &ap);
        if !usable(pap) || !usable(rz) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        let alpha = rz / pap;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &ap, &mut r);

        res = norm2(&r);
        log::trace!("cg iter {}: residual = {:.6e}", iter + 1, res);
        if res <= stop.target {
            return outcome(x, iter + 1, res, IterationStatus::Converged);
        }

        m.apply(&r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        for (pi, zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
        rz = rz_new;
    }
    outcome(x, stop.max_iterations, res, IterationStatus::MaxIterations)
}

/// Preconditioned biconjugate gradients. Uses products with `Aᵀ`.
pub fn bicg(a: &CsrMatrix, b: &[f64], m: &dyn Preconditioner, stop: StopCriteria) -> IterationOutcome {
    let n = b.len();
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let mut rt = r.clone();
    let mut z = vec![0.0; n];
    let mut zt = vec![0.0; n];
    m.apply(&r, &mut z);
    m.apply(&rt, &mut zt);
    let mut p = z.clone();
    let mut pt = zt.clone();
    let mut q = vec![0.0; n];
    let mut qt = vec![0.0; n];
    let mut rho = dot(&z, &rt);

    for iter in 0..stop.max_iterations {
        spmv(a, &p, &mut q);
        spmv_transpose(a, &pt, &mut qt);
        let ptq = dot(&pt, &q);
        if !usable(rho) || !usable(ptq) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        let alpha = rho / ptq;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &q, &mut r);
        axpy(-alpha, &qt, &mut rt);

        res = norm2(&r);
        log::trace!("bicg iter {}: residual = {:.6e}", iter + 1, res);
        if res <= stop.target {
            return outcome(x, iter + 1, res, IterationStatus::Converged);
        }

        m.apply(&r, &mut z);
        m.apply(&rt, &mut zt);
        let rho_new = dot(&z, &rt);
        let beta = rho_new / rho;
        for (pi, zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
        for (pi, zi) in pt.iter_mut().zip(&zt) {
            *pi = zi + beta * *pi;
        }
        rho = rho_new;
    }
    outcome(x, stop.max_iterations, res, IterationStatus::MaxIterations)
}

/// Right-preconditioned BiCGSTAB.
pub fn bicgstab(
    a: &CsrMatrix,
    b: &[f64],
    m: &dyn Preconditioner,
    stop: StopCriteria,
) -> IterationOutcome {
    let n = b.len();
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let r0 = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);

    for iter in 0..stop.max_iterations {
        let rho_new = dot(&r0, &r);
        if !usable(rho_new) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        if iter == 0 {
            p.copy_from_slice(&r);
        } else {
            let beta = (rho_new / rho) * (alpha / omega);
            for ((pi, ri), vi) in p.iter_mut().zip(&r).zip(&v) {
                *pi = ri + beta * (*pi - omega * vi);
            }
        }

        m.apply(&p, &mut p_hat);
        spmv(a, &p_hat, &mut v);
        let r0v = dot(&r0, &v);
        if !usable(r0v) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        alpha = rho_new / r0v;

        for ((si, ri), vi) in s.iter_mut().zip(&r).zip(&v) {
            *si = ri - alpha * vi;
        }
        let s_norm = norm2(&s);
        if s_norm <= stop.target {
            axpy(alpha, &p_hat, &mut x);
            log::trace!("bicgstab iter {}: residual = {:.6e}", iter + 1, s_norm);
            return outcome(x, iter + 1, s_norm, IterationStatus::Converged);
        }

        m.apply(&s, &mut s_hat);
        spmv(a, &s_hat, &mut t);
        let tt = dot(&t, &t);
        if !usable(tt) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        omega = dot(&t, &s) / tt;

        axpy(alpha, &p_hat, &mut x);
        axpy(omega, &s_hat, &mut x);
        for ((ri, si), ti) in r.iter_mut().zip(&s).zip(&t) {
            *ri = si - omega * ti;
        }

        res = norm2(&r);
        log::trace!("bicgstab iter {}: residual = {:.6e}", iter + 1, res);
        if res <= stop.target {
            return outcome(x, iter + 1, res, IterationStatus::Converged);
        }
        if !usable(omega) {
            return outcome(x, iter + 1, res, IterationStatus::Breakdown);
        }
        rho = rho_new;
    }
    outcome(x, stop.max_iterations, res, IterationStatus::MaxIterations)
}

/// Right-preconditioned conjugate gradients squared.
pub fn cgs(a: &CsrMatrix, b: &[f64], m: &dyn Preconditioner, stop: StopCriteria) -> IterationOutcome {
    let n = b.len();
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let rt = r.clone();
    let mut u = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut v_hat = vec![0.0; n];
    let mut u_hat = vec![0.0; n];
    let mut q_hat = vec![0.0; n];
    let mut sum = vec![0.0; n];
    let mut rho_prev = 1.0;

    for iter in 0..stop.max_iterations {
        let rho = dot(&rt, &r);
        if !usable(rho) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        if iter == 0 {
            u.copy_from_slice(&r);
            p.copy_from_slice(&u);
        } else {
            let beta = rho / rho_prev;
            for ((ui, ri), qi) in u.iter_mut().zip(&r).zip(&q) {
                *ui = ri + beta * qi;
            }
            for ((pi, ui), qi) in p.iter_mut().zip(&u).zip(&q) {
                *pi = ui + beta * (qi + beta * *pi);
            }
        }

        m.apply(&p, &mut p_hat);
        spmv(a, &p_hat, &mut v_hat);
        let sigma = dot(&rt, &v_hat);
        if !usable(sigma) {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        let alpha = rho / sigma;

        for ((qi, ui), vi) in q.iter_mut().zip(&u).zip(&v_hat) {
            *qi = ui - alpha * vi;
        }
        for ((si, ui), qi) in sum.iter_mut().zip(&u).zip(&q) {
            *si = ui + qi;
        }
        m.apply(&sum, &mut u_hat);
        axpy(alpha, &u_hat, &mut x);
        spmv(a, &u_hat, &mut q_hat);
        axpy(-alpha, &q_hat, &mut r);

        res = norm2(&r);
        log::trace!("cgs iter {}: residual = {:.6e}", iter + 1, res);
        if res <= stop.target {
            return outcome(x, iter + 1, res, IterationStatus::Converged);
        }
        rho_prev = rho;
    }
    outcome(x, stop.max_iterations, res, IterationStatus::MaxIterations)
}

/// Result of one flexible GMRES cycle.
struct Cycle {
    /// Correction to add to the iterate.
    update: Vec<f64>,
    steps: usize,
    breakdown: bool,
}

/// One cycle of flexible GMRES started from residual `r`.
///
/// The first `steps` search directions are `M⁻¹ vⱼ`, followed by the
/// `augment` vectors. Each `(u, c)` pair in `deflate` satisfies `A u = c`
/// with orthonormal `c`; the `c` are projected out of every new Arnoldi
/// vector and the update is corrected through the matching `u`.
#[allow(clippy::too_many_arguments)]
fn flexible_cycle(
    a: &CsrMatrix,
    m: &dyn Preconditioner,
    r: &[f64],
    steps: usize,
    augment: &[Vec<f64>],
    deflate: &[(Vec<f64>, Vec<f64>)],
    stop: StopCriteria,
    total: &mut usize,
    label: &str,
) -> Cycle {
    let n = r.len();
    let dim = steps + augment.len();
    let beta = norm2(r);
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
    basis.push(r.iter().map(|ri| ri / beta).collect());
    let mut directions: Vec<Vec<f64>> = Vec::with_capacity(dim);
    let mut h = DMatrix::<f64>::zeros(dim + 1, dim);
    let mut projections = DMatrix::<f64>::zeros(deflate.len(), dim);
    let mut cs = vec![0.0; dim];
    let mut sn = vec![0.0; dim];
    let mut g = vec![0.0; dim + 1];
    g[0] = beta;

    let mut w = vec![0.0; n];
    let mut k = 0;
    let mut breakdown = false;
    while k < dim && *total < stop.max_iterations {
        let z = if k < steps {
            let mut z = vec![0.0; n];
            m.apply(&basis[k], &mut z);
            z
        } else {
            augment[k - steps].clone()
        };
        spmv(a, &z, &mut w);
        directions.push(z);

        for (i, (_, c)) in deflate.iter().enumerate() {
            let bik = dot(&w, c);
            projections[(i, k)] = bik;
            axpy(-bik, c, &mut w);
        }
        for (i, v) in basis.iter().enumerate() {
            let hik = dot(&w, v);
            h[(i, k)] = hik;
            axpy(-hik, v, &mut w);
        }
        let h_next = norm2(&w);
        h[(k + 1, k)] = h_next;

        for i in 0..k {
            let t = cs[i] * h[(i, k)] + sn[i] * h[(i + 1, k)];
            h[(i + 1, k)] = -sn[i] * h[(i, k)] + cs[i] * h[(i + 1, k)];
            h[(i, k)] = t;
        }
        let denom = h[(k, k)].hypot(h[(k + 1, k)]);
        if !usable(denom) {
            directions.pop();
            breakdown = true;
            break;
        }
        cs[k] = h[(k, k)] / denom;
        sn[k] = h[(k + 1, k)] / denom;
        h[(k, k)] = denom;
        h[(k + 1, k)] = 0.0;
        g[k + 1] = -sn[k] * g[k];
        g[k] *= cs[k];

        k += 1;
        *total += 1;
        let estimate = g[k].abs();
        log::trace!("{} iter {}: residual = {:.6e}", label, total, estimate);
        if estimate <= stop.target || h_next == 0.0 {
            break;
        }
        basis.push(w.iter().map(|wi| wi / h_next).collect());
    }

    // Solve the k x k upper-triangular system H y = g.
    let mut y = vec![0.0; k];
    for i in (0..k).rev() {
        let mut s = g[i];
        for j in i + 1..k {
            s -= h[(i, j)] * y[j];
        }
        y[i] = s / h[(i, i)];
    }
    let mut update = vec![0.0; n];
    for (yj, z) in y.iter().zip(&directions) {
        axpy(*yj, z, &mut update);
    }
    for (i, (u, _)) in deflate.iter().enumerate() {
        let coef: f64 = (0..k).map(|j| projections[(i, j)] * y[j]).sum();
        axpy(-coef, u, &mut update);
    }
    Cycle {
        update,
        steps: k,
        breakdown,
    }
}

/// Right-preconditioned restarted GMRES with Givens rotations.
///
/// Each inner step counts as one iteration. The true residual is recomputed
/// at every restart.
pub fn gmres(
    a: &CsrMatrix,
    b: &[f64],
    m: &dyn Preconditioner,
    stop: StopCriteria,
    restart: usize,
) -> IterationOutcome {
    let n = b.len();
    let restart = restart.clamp(1, n.max(1));
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let mut total = 0;
    while total < stop.max_iterations {
        let cycle = flexible_cycle(a, m, &r, restart, &[], &[], stop, &mut total, "gmres");
        axpy(1.0, &cycle.update, &mut x);

        residual(a, &x, b, &mut r);
        res = norm2(&r);
        if res <= stop.target {
            return outcome(x, total, res, IterationStatus::Converged);
        }
        if cycle.breakdown || cycle.steps == 0 {
            return outcome(x, total, res, IterationStatus::Breakdown);
        }
    }
    outcome(x, total, res, IterationStatus::MaxIterations)
}

/// LGMRES: restarted GMRES whose search space also holds the corrections
/// of the last `outer` cycles.
pub fn lgmres(
    a: &CsrMatrix,
    b: &[f64],
    m: &dyn Preconditioner,
    stop: StopCriteria,
    inner: usize,
    outer: usize,
) -> IterationOutcome {
    let n = b.len();
    let inner = inner.clamp(1, n.max(1));
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let mut augment: Vec<Vec<f64>> = Vec::with_capacity(outer + 1);
    let mut total = 0;
    while total < stop.max_iterations {
        let cycle = flexible_cycle(a, m, &r, inner, &augment, &[], stop, &mut total, "lgmres");
        axpy(1.0, &cycle.update, &mut x);

        residual(a, &x, b, &mut r);
        res = norm2(&r);
        if res <= stop.target {
            return outcome(x, total, res, IterationStatus::Converged);
        }
        if cycle.breakdown || cycle.steps == 0 {
            return outcome(x, total, res, IterationStatus::Breakdown);
        }

        // Newest correction first, oldest dropped.
        let size = norm2(&cycle.update);
        if outer > 0 && usable(size) {
            let scaled = cycle.update.iter().map(|ui| ui / size).collect();
            augment.insert(0, scaled);
            augment.truncate(outer);
        }
    }
    outcome(x, total, res, IterationStatus::MaxIterations)
}

/// GCROT(m, k): flexible GMRES cycles of `inner` steps that keep up to
/// `keep` correction pairs `(u, c = A u)` between restarts.
///
/// The residual is projected out of the retained `c` before every cycle and
/// the Arnoldi vectors stay orthogonal to them. The oldest pair is dropped
/// once more than `keep` are held.
pub fn gcrotmk(
    a: &CsrMatrix,
    b: &[f64],
    m: &dyn Preconditioner,
    stop: StopCriteria,
    inner: usize,
    keep: usize,
) -> IterationOutcome {
    let n = b.len();
    let inner = inner.clamp(1, n.max(1));
    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let mut pairs: Vec<(Vec<f64>, Vec<f64>)> = Vec::with_capacity(keep + 1);
    let mut total = 0;
    while total < stop.max_iterations {
        if !pairs.is_empty() {
            for (u, c) in &pairs {
                let coef = dot(c, &r);
                axpy(coef, u, &mut x);
            }
            residual(a, &x, b, &mut r);
            res = norm2(&r);
            if res <= stop.target {
                return outcome(x, total, res, IterationStatus::Converged);
            }
        }
        let projected = r.clone();

        let cycle = flexible_cycle(a, m, &r, inner, &[], &pairs, stop, &mut total, "gcrotmk");
        axpy(1.0, &cycle.update, &mut x);

        residual(a, &x, b, &mut r);
        res = norm2(&r);
        if res <= stop.target {
            return outcome(x, total, res, IterationStatus::Converged);
        }
        if cycle.breakdown || cycle.steps == 0 {
            return outcome(x, total, res, IterationStatus::Breakdown);
        }
        if keep == 0 {
            continue;
        }

        // A u = c holds exactly for u = update, c = r_before - r_after.
        let mut u = cycle.update;
        let mut c: Vec<f64> = projected.iter().zip(&r).map(|(p, q)| p - q).collect();
        for (ui, ci) in &pairs {
            let coef = dot(&c, ci);
            axpy(-coef, ci, &mut c);
            axpy(-coef, ui, &mut u);
        }
        let size = norm2(&c);
        if usable(size) {
            u.iter_mut().for_each(|v| *v /= size);
            c.iter_mut().for_each(|v| *v /= size);
            pairs.push((u, c));
            if pairs.len() > keep {
                pairs.remove(0);
            }
        }
    }
    outcome(x, total, res, IterationStatus::MaxIterations)
}

/// Preconditioned MINRES (Paige–Saunders) for symmetric matrices.
///
/// The preconditioner must be symmetric positive definite. The reported
/// residual is the true 2-norm, carried along through `A w` recurrences.
pub fn minres(
    a: &CsrMatrix,
    b: &[f64],
    m: &dyn Preconditioner,
    stop: StopCriteria,
) -> IterationOutcome {
    let n = b.len();
    let mut x = vec![0.0; n];
    let mut r_true = b.to_vec();
    let mut res = norm2(&r_true);
    if res <= stop.target {
        return outcome(x, 0, res, IterationStatus::Converged);
    }

    let mut r1 = b.to_vec();
    let mut r2 = b.to_vec();
    let mut y = vec![0.0; n];
    m.apply(&r1, &mut y);
    let beta1_sq = dot(&r1, &y);
    if !(beta1_sq > 0.0 && beta1_sq.is_finite()) {
        return outcome(x, 0, res, IterationStatus::Breakdown);
    }
    let mut beta = beta1_sq.sqrt();
    let mut oldb = 0.0;
    let mut dbar = 0.0;
    let mut epsln = 0.0;
    let mut phibar = beta;
    let mut cs = -1.0;
    let mut sn = 0.0;

    let mut v = vec![0.0; n];
    let mut av = vec![0.0; n];
    let mut w = vec![0.0; n];
    let mut w1 = vec![0.0; n];
    let mut w2 = vec![0.0; n];
    let mut aw = vec![0.0; n];
    let mut aw1 = vec![0.0; n];
    let mut aw2 = vec![0.0; n];

    for iter in 0..stop.max_iterations {
        let s = 1.0 / beta;
        for (vi, yi) in v.iter_mut().zip(&y) {
            *vi = s * yi;
        }
        spmv(a, &v, &mut av);
        y.copy_from_slice(&av);
        if iter > 0 {
            axpy(-beta / oldb, &r1, &mut y);
        }
        let alfa = dot(&v, &y);
        axpy(-alfa / beta, &r2, &mut y);
        std::mem::swap(&mut r1, &mut r2);
        r2.copy_from_slice(&y);
        m.apply(&r2, &mut y);
        oldb = beta;
        let beta_sq = dot(&r2, &y);
        if beta_sq < 0.0 || !beta_sq.is_finite() {
            return outcome(x, iter, res, IterationStatus::Breakdown);
        }
        beta = beta_sq.sqrt();

        let oldeps = epsln;
        let delta = cs * dbar + sn * alfa;
        let gbar = sn * dbar - cs * alfa;
        epsln = sn * beta;
        dbar = -cs * beta;

        let gamma = gbar.hypot(beta).max(f64::EPSILON);
        cs = gbar / gamma;
        sn = beta / gamma;
        let phi = cs * phibar;
        phibar *= sn;

        // w = (v - oldeps·w1 - delta·w2) / gamma, and the same for A w.
        std::mem::swap(&mut w1, &mut w2);
        std::mem::swap(&mut w2, &mut w);
        std::mem::swap(&mut aw1, &mut aw2);
        std::mem::swap(&mut aw2, &mut aw);
        let g_inv = 1.0 / gamma;
        for i in 0..n {
            w[i] = (v[i] - oldeps * w1[i] - delta * w2[i]) * g_inv;
            aw[i] = (av[i] - oldeps * aw1[i] - delta * aw2[i]) * g_inv;
        }
        axpy(phi, &w, &mut x);
        axpy(-phi, &aw, &mut r_true);

        res = norm2(&r_true);
        log::trace!("minres iter {}: residual = {:.6e}", iter + 1, res);
        if res <= stop.target {
            return outcome(x, iter + 1, res, IterationStatus::Converged);
        }
        if beta == 0.0 {
            // Exact Krylov space exhausted without reaching the target.
            return outcome(x, iter + 1, res, IterationStatus::Breakdown);
        }
    }
    outcome(x, stop.max_iterations, res, IterationStatus::MaxIterations)
}

/// Quasi-minimal residual (Freund–Nachtigal), without look-ahead.
///
/// Runs on the right-preconditioned operator `A M⁻¹`, whose transpose is
/// `M⁻¹ Aᵀ` for the symmetric preconditioners of this crate. The iterate is
/// mapped back through `M⁻¹` once the residual target is met.
pub fn qmr(a: &CsrMatrix, b: &[f64], m: &dyn Preconditioner, stop: StopCriteria) -> IterationOutcome {
    let n = b.len();
    let mut r = b.to_vec();
    let mut res = norm2(&r);
    if res <= stop.target {
        return outcome(vec![0.0; n], 0, res, IterationStatus::Converged);
    }

    // Iterate of the preconditioned system; x = M⁻¹ u.
    let mut u = vec![0.0; n];
    let finish = |u: &[f64]| {
        let mut x = vec![0.0; n];
        m.apply(u, &mut x);
        x
    };

    let mut v_tld = r.clone();
    let mut w_tld = r.clone();
    let mut rho = norm2(&v_tld);
    let mut xi = norm2(&w_tld);
    let (mut gamma, mut eta, mut theta) = (1.0, -1.0, 0.0);
    let mut eps = 1.0;

    let mut v = vec![0.0; n];
    let mut w = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    let mut p_tld = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut tmp = vec![0.0; n];
    let mut atq = vec![0.0; n];

    for iter in 0..stop.max_iterations {
        if !usable(rho) || !usable(xi) {
            return outcome(finish(&u), iter, res, IterationStatus::Breakdown);
        }
        for (vi, ti) in v.iter_mut().zip(&v_tld) {
            *vi = ti / rho;
        }
        for (wi, ti) in w.iter_mut().zip(&w_tld) {
            *wi = ti / xi;
        }
        let delta = dot(&w, &v);
        if !usable(delta) {
            return outcome(finish(&u), iter, res, IterationStatus::Breakdown);
        }
        if iter == 0 {
            p.copy_from_slice(&v);
            q.copy_from_slice(&w);
        } else {
            let pc = xi * delta / eps;
            let qc = rho * delta / eps;
            for (pi, vi) in p.iter_mut().zip(&v) {
                *pi = vi - pc * *pi;
            }
            for (qi, wi) in q.iter_mut().zip(&w) {
                *qi = wi - qc * *qi;
            }
        }

        // p̃ = A M⁻¹ p
        m.apply(&p, &mut tmp);
        spmv(a, &tmp, &mut p_tld);
        eps = dot(&q, &p_tld);
        if !usable(eps) {
            return outcome(finish(&u), iter, res, IterationStatus::Breakdown);
        }
        let beta = eps / delta;
        if !usable(beta) {
            return outcome(finish(&u), iter, res, IterationStatus::Breakdown);
        }

        for ((ti, pi), vi) in v_tld.iter_mut().zip(&p_tld).zip(&v) {
            *ti = pi - beta * vi;
        }
        let rho_prev = rho;
        rho = norm2(&v_tld);

        // w̃ = M⁻¹ Aᵀ q - β w
        spmv_transpose(a, &q, &mut atq);
        m.apply(&atq, &mut w_tld);
        axpy(-beta, &w, &mut w_tld);
        xi = norm2(&w_tld);

        let gamma_prev = gamma;
        let theta_prev = theta;
        theta = rho / (gamma_prev * beta.abs());
        gamma = 1.0 / (1.0 + theta * theta).sqrt();
        if !usable(gamma) {
            return outcome(finish(&u), iter, res, IterationStatus::Breakdown);
        }
        eta = -eta * rho_prev * gamma * gamma / (beta * gamma_prev * gamma_prev);

        let carry = (theta_prev * gamma) * (theta_prev * gamma);
        for (di, pi) in d.iter_mut().zip(&p) {
            *di = eta * pi + carry * *di;
        }
        for (si, pi) in s.iter_mut().zip(&p_tld) {
            *si = eta * pi + carry * *si;
        }
        axpy(1.0, &d, &mut u);
        axpy(-1.0, &s, &mut r);

        res = norm2(&r);
        log::trace!("qmr iter {}: residual = {:.6e}", iter + 1, res);
        if res <= stop.target {
            return outcome(finish(&u), iter + 1, res, IterationStatus::Converged);
        }
    }
    outcome(finish(&u), stop.max_iterations, res, IterationStatus::MaxIterations)
}

/// A configured Krylov method with its preconditioner choice.
#[derive(Debug, Clone)]
pub struct KrylovSolver {
    method: Method,
    label: String,
    tolerance: f64,
    max_iterations: usize,
    restart: usize,
    preconditioner: PreconditionerKind,
}

impl KrylovSolver {
    /// # Errors
    ///
    /// Returns a configuration error if `method` is not a Krylov method.
    pub fn new(method: Method, spec: &SolverSpec) -> Result<Self> {
        if method.native_family() != SolverFamily::Krylov {
            return Err(Error::Configuration(format!(
                "'{}' is not a Krylov method",
                method
            )));
        }
        Ok(Self {
            method,
            label: method.name().to_string(),
            tolerance: spec.tolerance(),
            max_iterations: spec.max_iterations(),
            restart: DEFAULT_RESTART,
            preconditioner: spec.preconditioner(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_preconditioner(mut self, preconditioner: PreconditionerKind) -> Self {
        self.preconditioner = preconditioner;
        self
    }

    /// Inner cycle length of `gmres`, `lgmres` and `gcrotmk`; ignored by the
    /// other methods.
    pub fn with_restart(mut self, restart: usize) -> Self {
        self.restart = restart;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn preconditioner(&self) -> PreconditionerKind {
        self.preconditioner
    }
}

impl Solver for KrylovSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Solution> {
        check_dimensions(matrix, rhs)?;
        let m = preconditioner::build(self.preconditioner, matrix)?;
        let stop = StopCriteria::relative(self.tolerance, rhs, self.max_iterations);

        let result = match self.method {
            Method::Cg => cg(matrix, rhs, m.as_ref(), stop),
            Method::Bicg => bicg(matrix, rhs, m.as_ref(), stop),
            Method::Bicgstab => bicgstab(matrix, rhs, m.as_ref(), stop),
            Method::Cgs => cgs(matrix, rhs, m.as_ref(), stop),
            Method::Gmres => gmres(matrix, rhs, m.as_ref(), stop, self.restart),
            Method::Minres => minres(matrix, rhs, m.as_ref(), stop),
            Method::Qmr => qmr(matrix, rhs, m.as_ref(), stop),
            Method::Gcrotmk => gcrotmk(matrix, rhs, m.as_ref(), stop, self.restart, GCROT_KEEP),
            Method::Lgmres => lgmres(matrix, rhs, m.as_ref(), stop, self.restart, LGMRES_OUTER),
            other => {
                return Err(Error::Configuration(format!(
                    "'{}' is not a Krylov method",
                    other
                )))
            }
        };

        match result.status {
            IterationStatus::Converged => Ok(Solution {
                x: result.x,
                stats: SolveStats::iterative(&self.label, result.iterations, result.residual),
            }),
            IterationStatus::MaxIterations | IterationStatus::Breakdown => {
                Err(Error::Convergence {
                    solver: self.label.clone(),
                    iterations: result.iterations,
                    residual: result.residual,
                    tolerance: self.tolerance,
                })
            }
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Built-in Krylov family.
#[derive(Debug, Clone, Copy, Default)]
pub struct KrylovBackend;

impl Backend for KrylovBackend {
    fn family(&self) -> SolverFamily {
        SolverFamily::Krylov
    }

    fn name(&self) -> &str {
        "builtin-krylov"
    }

    fn configure(&self, spec: &SolverSpec) -> Result<Box<dyn Solver>> {
        Ok(Box::new(KrylovSolver::new(spec.method(), spec)?))
    }
}
