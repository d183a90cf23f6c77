use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faer::Mat;
use knox::config::{NewtonMethod, SolverOptions};
use knox::{LoadProvider, SolveType, SolverOrchestrator, UniverseComm};

const VT: f64 = 0.02585;
const IS: f64 = 1e-14;

/// Norton source into node 0, 1 kΩ between neighbours, a diode from every
/// node to ground.
struct DiodeLadder {
    n: usize,
}

impl LoadProvider for DiodeLadder {
    fn num_unknowns(&self) -> usize {
        self.n
    }

    fn load_residual(&mut self, x: &[f64], _prev: &[f64], f: &mut [f64]) -> bool {
        for i in 0..self.n {
            f[i] = IS * ((x[i] / VT).exp() - 1.0);
            if i > 0 {
                f[i] += 1e-3 * (x[i] - x[i - 1]);
            }
            if i + 1 < self.n {
                f[i] += 1e-3 * (x[i] - x[i + 1]);
            }
        }
        f[0] += 1e-3 * x[0] - 5e-3;
        true
    }

    fn load_jacobian(&mut self, x: &[f64], _prev: &[f64], jac: &mut Mat<f64>) -> bool {
        for i in 0..self.n {
            jac[(i, i)] = IS * (x[i] / VT).exp() / VT;
            if i > 0 {
                jac[(i, i)] += 1e-3;
                jac[(i, i - 1)] = -1e-3;
            }
            if i + 1 < self.n {
                jac[(i, i)] += 1e-3;
                jac[(i, i + 1)] = -1e-3;
            }
        }
        jac[(0, 0)] += 1e-3;
        true
    }
}

fn solve(options: &SolverOptions, x0: f64) -> i32 {
    let n = 40;
    let mut o = SolverOrchestrator::new(Box::new(DiodeLadder { n }), UniverseComm::Serial, options.clone())
        .expect("valid options");
    o.set_solution(&vec![x0; n]).expect("length matches");
    o.solve().expect("consistent configuration")
}

fn bench_strategies(c: &mut Criterion) {
    let full = SolverOptions::default();
    c.bench_function("full newton from 0.6 V", |b| b.iter(|| black_box(solve(&full, 0.6))));

    let mut chord = SolverOptions::default();
    chord.dc_op.nonlinear.method = NewtonMethod::Chord { refresh_every: 4 };
    c.bench_function("chord newton from 0.6 V", |b| b.iter(|| black_box(solve(&chord, 0.6))));

    let mut gmin = SolverOptions::default();
    gmin.dc_op.continuation.solve_type = SolveType::GminStepping;
    gmin.dc_op.continuation.gmin.end = -6.0;
    c.bench_function("gmin stepping from 0 V", |b| b.iter(|| black_box(solve(&gmin, 0.0))));
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
