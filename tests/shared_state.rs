//! Ownership and caching of the shared residual/Jacobian storage across
//! several solver states.

mod common;

use approx::assert_abs_diff_eq;
use common::{system, Ladder};
use knox::group::Quantity;
use knox::{ContinuationState, KError, SolverState};

#[test]
fn residual_loads_once_per_solution_and_owner() {
    let (ladder, recorder) = Ladder::new(3);
    let mut sys = system(ladder);
    let mut a = SolverState::new(&mut sys, vec![0.1, 0.2, 0.3]).unwrap();
    let mut b = SolverState::new(&mut sys, vec![1.0, 1.0, 1.0]).unwrap();

    assert!(a.compute_residual(&mut sys).unwrap());
    assert!(a.compute_residual(&mut sys).unwrap());
    assert_eq!(recorder.residual_loads.get(), 1);

    // b takes the storage over; a's cached residual no longer counts.
    assert!(b.compute_residual(&mut sys).unwrap());
    assert!(!a.is_valid(&sys, Quantity::RESIDUAL));
    assert!(matches!(a.residual(&sys), Err(KError::Stale(q)) if q == Quantity::RESIDUAL));

    assert!(a.compute_residual(&mut sys).unwrap());
    assert_eq!(recorder.residual_loads.get(), 3);
    // row 0: 3·0.1 − 0.2 − 1
    assert_abs_diff_eq!(a.residual(&sys).unwrap()[0], -0.9, epsilon = 1e-15);
}

#[test]
fn jacobian_reloads_the_residual_when_aux_state_moved() {
    let (ladder, recorder) = Ladder::new(3);
    let mut sys = system(ladder);
    let mut a = SolverState::new(&mut sys, vec![0.0; 3]).unwrap();
    let mut b = SolverState::new(&mut sys, vec![1.0; 3]).unwrap();

    a.compute_residual(&mut sys).unwrap();
    b.compute_residual(&mut sys).unwrap();
    assert_eq!(recorder.residual_loads.get(), 2);

    assert!(a.compute_jacobian(&mut sys).unwrap());
    assert_eq!(recorder.residual_loads.get(), 3);
    assert_eq!(recorder.jacobian_loads.get(), 1);
    assert!(a.is_jacobian_owner(&sys));
    assert!(!b.is_valid(&sys, Quantity::RESIDUAL));
}

#[test]
fn newton_needs_residual_then_jacobian() {
    let (ladder, _) = Ladder::new(2);
    let mut sys = system(ladder);
    let mut s = SolverState::zeros(&mut sys);

    let err = s.compute_newton(&mut sys, false).unwrap_err();
    assert!(matches!(err, KError::Prerequisite { requires, .. } if requires == Quantity::RESIDUAL));

    s.compute_residual(&mut sys).unwrap();
    let err = s.compute_newton(&mut sys, false).unwrap_err();
    assert!(matches!(err, KError::Prerequisite { requires, .. } if requires == Quantity::JACOBIAN));

    s.compute_jacobian(&mut sys).unwrap();
    assert!(s.compute_newton(&mut sys, false).unwrap());
    // 3x − y = 1, −x + 3y = 1 → x = y = 0.5
    for d in s.newton(&sys).unwrap() {
        assert_abs_diff_eq!(*d, 0.5, epsilon = 1e-12);
    }
}

#[test]
fn gradient_is_jacobian_transpose_times_residual() {
    let (ladder, _) = Ladder::new(2);
    let mut sys = system(ladder);
    let mut s = SolverState::zeros(&mut sys);
    s.compute_jacobian(&mut sys).unwrap();
    s.compute_gradient(&mut sys).unwrap();
    // F = [−1, −1], Jᵀ F = [−2, −2]
    assert_eq!(s.gradient(&sys).unwrap(), &[-2.0, -2.0]);

    let mut r = vec![0.0; 2];
    s.apply_jacobian(&sys, &[1.0, 0.0], &mut r).unwrap();
    assert_eq!(r, vec![3.0, -1.0]);
    s.apply_jacobian_transpose(&sys, &[0.0, 1.0], &mut r).unwrap();
    assert_eq!(r, vec![-1.0, 3.0]);
}

#[test]
fn moving_x_makes_every_quantity_stale() {
    let (ladder, _) = Ladder::new(2);
    let mut sys = system(ladder);
    let mut s = SolverState::zeros(&mut sys);
    s.compute_jacobian(&mut sys).unwrap();
    s.compute_newton(&mut sys, false).unwrap();
    let generation = s.generation();

    let dir = s.newton(&sys).unwrap().to_vec();
    let base = s.x().to_vec();
    s.compute_x(&base, &dir, 0.5).unwrap();
    assert!(s.generation() > generation);
    for q in [Quantity::RESIDUAL, Quantity::JACOBIAN, Quantity::NEWTON] {
        assert!(!s.is_valid(&sys, q));
    }
    let mut r = vec![0.0; 2];
    assert!(matches!(s.apply_jacobian(&sys, &[1.0, 1.0], &mut r), Err(KError::Stale(_))));
}

#[test]
fn deep_clone_takes_ownership_without_reloading() {
    let (ladder, recorder) = Ladder::new(3);
    let mut sys = system(ladder);
    let mut s = SolverState::new(&mut sys, vec![0.5; 3]).unwrap();
    s.compute_jacobian(&mut sys).unwrap();
    let loads = (recorder.residual_loads.get(), recorder.jacobian_loads.get());

    let mut copy = s.deep_clone(&mut sys);
    assert_eq!(copy.x(), s.x());
    assert!(copy.is_valid(&sys, Quantity::JACOBIAN));
    assert!(!s.is_valid(&sys, Quantity::JACOBIAN));
    assert!(copy.compute_jacobian(&mut sys).unwrap());
    assert_eq!((recorder.residual_loads.get(), recorder.jacobian_loads.get()), loads);

    let shallow = copy.shallow_clone(&mut sys);
    assert_eq!(shallow.x(), &[0.0; 3]);
    assert!(!shallow.is_valid(&sys, Quantity::RESIDUAL));
    copy.retire(&mut sys);
    s.retire(&mut sys);
}

#[test]
fn wrong_length_solution_is_rejected() {
    let (ladder, _) = Ladder::new(3);
    let mut sys = system(ladder);
    assert!(matches!(
        SolverState::new(&mut sys, vec![0.0; 2]),
        Err(KError::DimensionMismatch { expected: 3, found: 2 })
    ));
}

#[test]
fn continuation_clone_of_a_non_owner_is_not_the_jacobian_owner() {
    let (ladder, _) = Ladder::new(2);
    let mut sys = system(ladder);
    let mut owner = ContinuationState::new(SolverState::zeros(&mut sys));
    let bystander = ContinuationState::new(SolverState::new(&mut sys, vec![1.0, 1.0]).unwrap());
    owner.compute_jacobian(&mut sys).unwrap();

    let mut copy = bystander.deep_clone(&mut sys);
    assert!(!copy.is_jacobian_owner(&sys));
    assert!(owner.is_jacobian_owner(&sys));

    assert!(copy.compute_jacobian(&mut sys).unwrap());
    assert!(copy.is_jacobian_owner(&sys));
    assert!(!owner.is_jacobian_owner(&sys));
    assert_eq!(copy.x(), &[1.0, 1.0]);
}
