//! GMRES against the direct LU on small random systems, and the Newton
//! correction context switching between the two.

use approx::assert_abs_diff_eq;
use faer::Mat;
use knox::config::{LinearSolverKind, LinearSolverOptions};
use knox::context::KspContext;
use knox::solver::{GmresSolver, LinearSolver, LuSolver};
use rand::Rng;

/// Random matrix made diagonally dominant so both solvers are well posed.
fn random_dominant(n: usize) -> (Mat<f64>, Vec<f64>) {
    let mut rng = rand::thread_rng();
    let data: Vec<f64> = (0..n * n).map(|_| rng.r#gen()).collect();
    let a = Mat::from_fn(n, n, |i, j| data[j * n + i] + if i == j { n as f64 } else { 0.0 });
    let b: Vec<f64> = (0..n).map(|_| rng.r#gen()).collect();
    (a, b)
}

#[test]
fn gmres_vs_direct_on_nonsymmetric() {
    let n = 10;
    let (a, b) = random_dominant(n);
    let mut x_gmres = vec![0.0; n];
    let mut gmres = GmresSolver::new(n, 1e-10, 1000);
    let stats = gmres.solve(&a, None, &b, &mut x_gmres).unwrap();
    assert!(stats.converged);

    let mut x_lu = vec![0.0; n];
    let mut lu = LuSolver::new();
    lu.solve(&a, None, &b, &mut x_lu).unwrap();
    for i in 0..n {
        assert_abs_diff_eq!(x_gmres[i], x_lu[i], epsilon = 1e-6);
    }
}

#[test]
fn restarted_gmres_still_converges() {
    let n = 12;
    let (a, b) = random_dominant(n);
    let mut x = vec![0.0; n];
    let stats = GmresSolver::new(3, 1e-10, 2000).solve(&a, None, &b, &mut x).unwrap();
    assert!(stats.converged);
    let mut x_lu = vec![0.0; n];
    LuSolver::new().solve(&a, None, &b, &mut x_lu).unwrap();
    for i in 0..n {
        assert_abs_diff_eq!(x[i], x_lu[i], epsilon = 1e-6);
    }
}

#[test]
fn context_solves_agree_across_kinds() {
    let n = 8;
    let (a, b) = random_dominant(n);
    let mut direct = KspContext::new(LinearSolverOptions::default());
    let mut x_direct = Vec::new();
    direct.solve(&a, &b, &mut x_direct, false).unwrap();

    let options = LinearSolverOptions {
        kind: LinearSolverKind::Gmres { restart: n, tol: 1e-12, max_iters: 500 },
        ..LinearSolverOptions::default()
    };
    let mut iterative = KspContext::new(options);
    let mut x_iter = Vec::new();
    let stats = iterative.solve(&a, &b, &mut x_iter, false).unwrap();
    assert!(stats.converged);
    for i in 0..n {
        assert_abs_diff_eq!(x_direct[i], x_iter[i], epsilon = 1e-8);
    }
}
