//! Dense kernels under the Newton solve: matvec, transposed matvec, inner
//! products, Jacobian row/diagonal access and the distributed norms used by
//! the convergence battery.

use approx::assert_abs_diff_eq;
use faer::Mat;
use knox::core::traits::{DiagonalAccess, InnerProduct, MatTransVec, MatVec};
use knox::core::wrappers::DistributedNorms;
use knox::parallel::UniverseComm;
use rand::Rng;

#[test]
fn matvec_random_small() {
    let n = 5;
    let mut rng = rand::thread_rng();
    let vals: Vec<f64> = (0..n * n).map(|_| rng.r#gen()).collect();
    let a = Mat::from_fn(n, n, |i, j| vals[j * n + i]);
    let x: Vec<f64> = (0..n).map(|_| rng.r#gen()).collect();
    let mut y = vec![0.0; n];
    a.matvec(&x, &mut y);

    for i in 0..n {
        let expected = (0..n).map(|j| vals[j * n + i] * x[j]).sum::<f64>();
        assert_abs_diff_eq!(y[i], expected, epsilon = 1e-12);
    }
}

#[test]
fn transposed_matvec_matches_explicit_transpose() {
    let n = 4;
    let mut rng = rand::thread_rng();
    let a = Mat::from_fn(n, n, |_, _| rng.r#gen::<f64>() - 0.5);
    let at = Mat::from_fn(n, n, |i, j| a[(j, i)]);
    let x: Vec<f64> = (0..n).map(|_| rng.r#gen()).collect();
    let mut y1 = vec![0.0; n];
    let mut y2 = vec![0.0; n];
    a.mattransvec(&x, &mut y1);
    at.matvec(&x, &mut y2);
    for i in 0..n {
        assert_abs_diff_eq!(y1[i], y2[i], epsilon = 1e-12);
    }
}

#[test]
fn dot_and_norm() {
    let x = vec![1.0, 2.0, 3.0];
    let y = vec![4.0, -5.0, 6.0];
    let ip = ();
    let dot = ip.dot(&x, &y);
    assert_abs_diff_eq!(dot, 1.0 * 4.0 + 2.0 * (-5.0) + 3.0 * 6.0, epsilon = 1e-12);
    assert_abs_diff_eq!(ip.norm(&x), 14.0f64.sqrt(), epsilon = 1e-12);
}

#[test]
fn serial_norms_agree_with_inner_product() {
    let mut rng = rand::thread_rng();
    let x: Vec<f64> = (0..50).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let comm = UniverseComm::Serial;
    let norms = DistributedNorms::new(&comm);
    assert_abs_diff_eq!(norms.norm_2(&x), ().norm(&x), epsilon = 1e-12);
    assert_abs_diff_eq!(norms.dot(&x, &x), ().dot(&x, &x), epsilon = 1e-12);
    let (m, i) = norms.max_abs(&x);
    assert_eq!(m, x[i].abs());
    assert!(x.iter().all(|v| v.abs() <= m));
}

#[test]
fn gmin_style_diagonal_update() {
    let mut j = Mat::from_fn(3, 3, |i, k| if i == k { 2.0 } else { -1.0 });
    for i in 0..3 {
        let d = j.diagonal_entry(i);
        j.set_diagonal_entry(i, d + 1e-3);
    }
    assert_abs_diff_eq!(j[(1, 1)], 2.001, epsilon = 1e-15);
    assert_eq!(j[(0, 1)], -1.0);
}
