use faer::Mat;

/// Artificial-parameter homotopy `H(x, λ) = λF(x) + (1 − λ)(x − x₀)`.
///
/// At λ = 0 the solution is the start point x₀; at λ = 1 it is a root of F.
#[derive(Debug, Clone)]
pub struct HomotopyBlend {
    start: Vec<f64>,
    lambda: f64,
}

impl HomotopyBlend {
    pub fn new(start: Vec<f64>) -> Self {
        Self { start, lambda: 0.0 }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn set_lambda(&mut self, lambda: f64) {
        self.lambda = lambda.clamp(0.0, 1.0);
    }

    pub fn start(&self) -> &[f64] {
        &self.start
    }

    pub fn augment_residual(&self, x: &[f64], f: &mut [f64]) {
        let l = self.lambda;
        for ((fi, &xi), &si) in f.iter_mut().zip(x).zip(&self.start) {
            *fi = l * *fi + (1.0 - l) * (xi - si);
        }
    }

    /// Applied once to a freshly loaded Jacobian.
    pub fn augment_jacobian(&self, jac: &mut Mat<f64>) {
        let l = self.lambda;
        if l == 1.0 {
            return;
        }
        for j in 0..jac.ncols() {
            for i in 0..jac.nrows() {
                jac[(i, j)] *= l;
            }
        }
        for i in 0..jac.nrows().min(jac.ncols()) {
            jac[(i, i)] += 1.0 - l;
        }
    }
}
