use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::classifier::BinaryClassifier;
use crate::error::{OrangeError, Result};

/// Squared norm a candidate column must keep, relative to its raw squared
/// norm, after projecting out the current basis.
const INDEPENDENCE_TOLERANCE: f64 = 1e-8;

/// Residual sum of squares (relative to the total) treated as a perfect fit.
const PERFECT_FIT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarsConfig {
    /// Cap on basis functions, intercept included.
    pub max_terms: usize,
    /// Cap on the number of hinge factors in one basis function.
    pub max_degree: usize,
    /// Cost per knot in the GCV criterion.
    pub penalty: f64,
    /// Forward pass stops once a step explains less than this share of the
    /// total sum of squares.
    pub threshold: f64,
    pub pruning: bool,
    /// Significance level behind the default minspan and endspan.
    pub alpha: f64,
    pub minspan: Option<usize>,
    pub endspan: Option<usize>,
}

impl Default for MarsConfig {
    fn default() -> Self {
        Self {
            max_terms: 21,
            max_degree: 2,
            penalty: 3.0,
            threshold: 1e-3,
            pruning: true,
            alpha: 0.05,
            minspan: None,
            endspan: None,
        }
    }
}

impl MarsConfig {
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn endspan(&self, n_features: usize) -> usize {
        self.endspan.unwrap_or_else(|| {
            (3.0 - (self.alpha / n_features as f64).log2())
                .ceil()
                .max(0.0) as usize
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn minspan(&self, n_features: usize, count: usize) -> usize {
        self.minspan
            .unwrap_or_else(|| {
                let rate = -(1.0 - self.alpha).ln() / (n_features * count.max(1)) as f64;
                (-rate.log2() / 2.5).floor().max(1.0) as usize
            })
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HingeDirection {
    /// `max(0, x - knot)`
    Positive,
    /// `max(0, knot - x)`
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hinge {
    pub variable: usize,
    pub knot: f64,
    pub direction: HingeDirection,
}

impl Hinge {
    pub fn evaluate(&self, value: f64) -> f64 {
        match self.direction {
            HingeDirection::Positive => (value - self.knot).max(0.0),
            HingeDirection::Negative => (self.knot - value).max(0.0),
        }
    }
}

impl fmt::Display for Hinge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            HingeDirection::Positive => write!(f, "h(x{}-{:.4})", self.variable, self.knot),
            HingeDirection::Negative => write!(f, "h({:.4}-x{})", self.knot, self.variable),
        }
    }
}

/// Product of hinge factors; no factors is the intercept.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasisFunction {
    factors: Vec<Hinge>,
}

impl BasisFunction {
    pub fn intercept() -> Self {
        Self::default()
    }

    pub fn factors(&self) -> &[Hinge] {
        &self.factors
    }

    pub fn degree(&self) -> usize {
        self.factors.len()
    }

    pub fn uses(&self, variable: usize) -> bool {
        self.factors.iter().any(|hinge| hinge.variable == variable)
    }

    fn with(&self, hinge: Hinge) -> Self {
        let mut factors = self.factors.clone();
        factors.push(hinge);
        Self { factors }
    }

    fn evaluate_with(&self, value: impl Fn(usize) -> f64) -> f64 {
        self.factors
            .iter()
            .map(|hinge| hinge.evaluate(value(hinge.variable)))
            .product()
    }

    pub fn evaluate(&self, features: &DVector<f64>) -> f64 {
        self.evaluate_with(|variable| features[variable])
    }
}

impl fmt::Display for BasisFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.factors.is_empty() {
            return write!(f, "1");
        }
        for (k, hinge) in self.factors.iter().enumerate() {
            if k > 0 {
                write!(f, "*")?;
            }
            write!(f, "{hinge}")?;
        }
        Ok(())
    }
}

/// Diagnostics from one fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarsSummary {
    pub forward_terms: usize,
    pub terms: usize,
    pub rss: f64,
    pub gcv: f64,
}

/// Generalised cross-validation score of a model with `terms` basis
/// functions.
pub fn gcv(rss: f64, terms: usize, samples: usize, penalty: f64) -> f64 {
    let n = samples as f64;
    let effective_parameters = terms as f64 + penalty * (terms as f64 - 1.0) / 2.0;
    if effective_parameters >= n {
        return f64::INFINITY;
    }

    (rss / n) / (1.0 - effective_parameters / n).powi(2)
}

/// Multivariate adaptive regression splines, used as a classifier by
/// thresholding the fitted surface at zero.
pub struct Mars {
    config: MarsConfig,
    basis: Vec<BasisFunction>,
    coefficients: DVector<f64>,
}

impl Mars {
    pub fn new(config: MarsConfig) -> Self {
        Self {
            config,
            basis: Vec::new(),
            coefficients: DVector::zeros(0),
        }
    }

    pub fn basis(&self) -> &[BasisFunction] {
        &self.basis
    }

    pub fn coefficients(&self) -> &DVector<f64> {
        &self.coefficients
    }

    /// Value of the fitted surface at `features`.
    pub fn evaluate(&self, features: &DVector<f64>) -> f64 {
        self.basis
            .iter()
            .zip(self.coefficients.iter())
            .map(|(basis, coefficient)| coefficient * basis.evaluate(features))
            .sum()
    }

    pub fn solve(&mut self, samples: &DMatrix<f64>, targets: &DVector<f64>) -> Result<MarsSummary> {
        let n = samples.nrows();
        if n == 0 {
            return Err(OrangeError::EmptyInput);
        }
        if targets.len() != n {
            return Err(OrangeError::LengthMismatch {
                what: "targets",
                expected: n,
                got: targets.len(),
            });
        }
        if self.config.max_terms == 0 {
            return Err(OrangeError::InvalidConfig(
                "MARS max_terms must be at least 1".to_string(),
            ));
        }

        let mut forward = ForwardPass::new(samples, targets);
        forward.run(&self.config);
        let forward_terms = forward.basis.len();

        let kept: Vec<usize> = if self.config.pruning {
            prune(&forward.columns, targets, self.config.penalty)
        } else {
            (0..forward_terms).collect()
        };

        let columns: Vec<DVector<f64>> = kept.iter().map(|&k| forward.columns[k].clone()).collect();
        let (coefficients, rss) = least_squares(&columns, targets)
            .ok_or(OrangeError::SingularSystem("MARS coefficient fit"))?;

        self.basis = kept.iter().map(|&k| forward.basis[k].clone()).collect();
        self.coefficients = coefficients;

        let summary = MarsSummary {
            forward_terms,
            terms: self.basis.len(),
            rss,
            gcv: gcv(rss, self.basis.len(), n, self.config.penalty),
        };
        debug!(
            forward_terms,
            terms = summary.terms,
            gcv = summary.gcv,
            "MARS fit finished"
        );

        Ok(summary)
    }
}

impl BinaryClassifier for Mars {
    fn fit(&mut self, samples: &DMatrix<f64>, labels: &DVector<f64>) -> Result<()> {
        self.solve(samples, labels).map(|_| ())
    }

    fn predict(&self, features: &DVector<f64>) -> f64 {
        if self.evaluate(features) > 0.0 {
            1.0
        } else {
            -1.0
        }
    }
}

/// Running sums over the observations on one side of a knot, weighted by
/// the parent basis function `w`.
#[derive(Clone)]
struct SideSums {
    ww: f64,
    wwx: f64,
    wwxx: f64,
    rw: f64,
    rwx: f64,
    qw: Vec<f64>,
    qwx: Vec<f64>,
}

impl SideSums {
    fn zeros(m: usize) -> Self {
        Self {
            ww: 0.0,
            wwx: 0.0,
            wwxx: 0.0,
            rw: 0.0,
            rwx: 0.0,
            qw: vec![0.0; m],
            qwx: vec![0.0; m],
        }
    }

    fn add(&mut self, w: f64, x: f64, r: f64, q: &[DVector<f64>], i: usize) {
        let ww = w * w;
        self.ww += ww;
        self.wwx += ww * x;
        self.wwxx += ww * x * x;
        self.rw += r * w;
        self.rwx += r * w * x;
        for (k, q_k) in q.iter().enumerate() {
            self.qw[k] += q_k[i] * w;
            self.qwx[k] += q_k[i] * w * x;
        }
    }

    fn complement(&self, part: &SideSums) -> SideSums {
        SideSums {
            ww: self.ww - part.ww,
            wwx: self.wwx - part.wwx,
            wwxx: self.wwxx - part.wwxx,
            rw: self.rw - part.rw,
            rwx: self.rwx - part.rwx,
            qw: self.qw.iter().zip(&part.qw).map(|(a, b)| a - b).collect(),
            qwx: self.qwx.iter().zip(&part.qwx).map(|(a, b)| a - b).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    parent: usize,
    variable: usize,
    knot: f64,
    use_positive: bool,
    use_negative: bool,
    reduction: f64,
}

/// RSS reduction from adding the orthogonalised hinge pair, and which halves
/// of the pair take part.
fn pair_reduction(
    (aa, aa_raw, ar): (f64, f64, f64),
    (bb, bb_raw, br): (f64, f64, f64),
    ab: f64,
    allow_pair: bool,
) -> (f64, bool, bool) {
    let a_ok = aa_raw > 0.0 && aa > INDEPENDENCE_TOLERANCE * aa_raw;
    let b_ok = bb_raw > 0.0 && bb > INDEPENDENCE_TOLERANCE * bb_raw;

    if allow_pair && a_ok && b_ok {
        let det = aa * bb - ab * ab;
        if det > INDEPENDENCE_TOLERANCE * aa * bb {
            let reduction = (bb * ar * ar - 2.0 * ab * ar * br + aa * br * br) / det;
            return (reduction, true, true);
        }
    }

    let single_a = if a_ok { ar * ar / aa } else { 0.0 };
    let single_b = if b_ok { br * br / bb } else { 0.0 };
    if a_ok && single_a >= single_b {
        (single_a, true, false)
    } else if b_ok {
        (single_b, false, true)
    } else {
        (0.0, false, false)
    }
}

struct ForwardPass<'a> {
    samples: &'a DMatrix<f64>,
    basis: Vec<BasisFunction>,
    columns: Vec<DVector<f64>>,
    orthonormal: Vec<DVector<f64>>,
    residual: DVector<f64>,
}

impl<'a> ForwardPass<'a> {
    fn new(samples: &'a DMatrix<f64>, targets: &DVector<f64>) -> Self {
        let n = samples.nrows();
        let ones = DVector::from_element(n, 1.0);
        let mean = targets.mean();

        Self {
            samples,
            basis: vec![BasisFunction::intercept()],
            columns: vec![ones.clone()],
            orthonormal: vec![ones / (n as f64).sqrt()],
            residual: targets.map(|y| y - mean),
        }
    }

    fn run(&mut self, config: &MarsConfig) {
        let total = self.residual.norm_squared();
        if total <= 0.0 {
            return;
        }

        while self.basis.len() < config.max_terms {
            let allow_pair = config.max_terms - self.basis.len() >= 2;

            let mut best: Option<Candidate> = None;
            for parent in 0..self.basis.len() {
                if self.basis[parent].degree() >= config.max_degree {
                    continue;
                }
                for variable in 0..self.samples.ncols() {
                    if self.basis[parent].uses(variable) {
                        continue;
                    }
                    if let Some(candidate) = self.best_knot(parent, variable, config, allow_pair) {
                        if best.map_or(true, |b| candidate.reduction > b.reduction) {
                            best = Some(candidate);
                        }
                    }
                }
            }

            let Some(candidate) = best else {
                break;
            };
            if candidate.reduction / total < config.threshold {
                break;
            }

            let mut added = false;
            for (used, direction) in [
                (candidate.use_positive, HingeDirection::Positive),
                (candidate.use_negative, HingeDirection::Negative),
            ] {
                if used {
                    added |= self.add_term(
                        candidate.parent,
                        candidate.variable,
                        candidate.knot,
                        direction,
                    );
                }
            }
            if !added {
                break;
            }

            if self.residual.norm_squared() / total < PERFECT_FIT {
                break;
            }
        }
    }

    /// Best knot for extending `parent` with hinges on `variable`, scored in
    /// closed form against the orthonormal basis.
    #[allow(clippy::similar_names)]
    fn best_knot(
        &self,
        parent: usize,
        variable: usize,
        config: &MarsConfig,
        allow_pair: bool,
    ) -> Option<Candidate> {
        let parent_column = &self.columns[parent];
        let mut order: Vec<usize> = (0..self.samples.nrows())
            .filter(|&i| parent_column[i] > 0.0)
            .collect();
        order.sort_by(|&a, &b| {
            self.samples[(a, variable)].total_cmp(&self.samples[(b, variable)])
        });
        let values: Vec<f64> = order.iter().map(|&i| self.samples[(i, variable)]).collect();

        let count = values.len();
        let endspan = config.endspan(self.samples.ncols());
        let minspan = config.minspan(self.samples.ncols(), count);
        if count <= 2 * endspan {
            return None;
        }

        let m = self.orthonormal.len();
        let mut totals = SideSums::zeros(m);
        for &i in &order {
            totals.add(
                parent_column[i],
                self.samples[(i, variable)],
                self.residual[i],
                &self.orthonormal,
                i,
            );
        }

        // observations strictly above the current knot
        let mut above = SideSums::zeros(m);
        let mut pointer = count;
        let mut previous_knot: Option<f64> = None;
        let mut best: Option<Candidate> = None;

        let positions: Vec<usize> = (endspan..count - endspan).step_by(minspan).collect();
        for &position in positions.iter().rev() {
            let t = values[position];
            #[allow(clippy::float_cmp)]
            if previous_knot == Some(t) {
                continue;
            }
            previous_knot = Some(t);

            while pointer > 0 && values[pointer - 1] > t {
                pointer -= 1;
                let i = order[pointer];
                above.add(
                    parent_column[i],
                    values[pointer],
                    self.residual[i],
                    &self.orthonormal,
                    i,
                );
            }
            let below = totals.complement(&above);

            // a = w * max(0, x - t)
            let aa_raw = t.mul_add(t * above.ww, above.wwxx - 2.0 * t * above.wwx);
            let ar = above.rwx - t * above.rw;
            // b = w * max(0, t - x)
            let bb_raw = t.mul_add(t * below.ww, below.wwxx - 2.0 * t * below.wwx);
            let br = t * below.rw - below.rwx;

            let mut qa_norm = 0.0;
            let mut qb_norm = 0.0;
            let mut qa_qb = 0.0;
            for k in 0..m {
                let qa = above.qwx[k] - t * above.qw[k];
                let qb = t * below.qw[k] - below.qwx[k];
                qa_norm += qa * qa;
                qb_norm += qb * qb;
                qa_qb += qa * qb;
            }

            let (reduction, use_positive, use_negative) = pair_reduction(
                (aa_raw - qa_norm, aa_raw, ar),
                (bb_raw - qb_norm, bb_raw, br),
                -qa_qb,
                allow_pair,
            );

            if (use_positive || use_negative)
                && best.map_or(true, |b| reduction > b.reduction)
            {
                best = Some(Candidate {
                    parent,
                    variable,
                    knot: t,
                    use_positive,
                    use_negative,
                    reduction,
                });
            }
        }

        best
    }

    fn add_term(
        &mut self,
        parent: usize,
        variable: usize,
        knot: f64,
        direction: HingeDirection,
    ) -> bool {
        let hinge = Hinge {
            variable,
            knot,
            direction,
        };
        let parent_column = &self.columns[parent];
        let column = DVector::from_fn(self.samples.nrows(), |i, _| {
            parent_column[i] * hinge.evaluate(self.samples[(i, variable)])
        });

        let raw_norm = column.norm();
        if raw_norm <= 0.0 {
            return false;
        }

        // Gram-Schmidt, twice for stability
        let mut direction_vector = column.clone();
        for _ in 0..2 {
            for q in &self.orthonormal {
                let projection = q.dot(&direction_vector);
                direction_vector.axpy(-projection, q, 1.0);
            }
        }
        let norm = direction_vector.norm();
        if norm <= INDEPENDENCE_TOLERANCE.sqrt() * raw_norm {
            return false;
        }
        direction_vector /= norm;

        let projection = direction_vector.dot(&self.residual);
        self.residual.axpy(-projection, &direction_vector, 1.0);

        self.basis.push(self.basis[parent].with(hinge));
        self.columns.push(column);
        self.orthonormal.push(direction_vector);
        true
    }
}

/// Least-squares coefficients and residual sum of squares for the design
/// made of `columns`.
fn least_squares(columns: &[DVector<f64>], targets: &DVector<f64>) -> Option<(DVector<f64>, f64)> {
    let design = DMatrix::from_columns(columns);

    // X = QR, R beta = Q^T y
    let qr = design.clone().qr();
    let coefficients = qr.r().solve_upper_triangular(&(qr.q().transpose() * targets))?;

    let residual = targets - &design * &coefficients;
    Some((coefficients, residual.norm_squared()))
}

/// Backward deletion: drop the term whose removal costs least, keeping the
/// subset with the lowest GCV seen. The intercept (index 0) always stays.
fn prune(columns: &[DVector<f64>], targets: &DVector<f64>, penalty: f64) -> Vec<usize> {
    let n = targets.len();
    let rss_of = |subset: &[usize]| -> f64 {
        let selected: Vec<DVector<f64>> = subset.iter().map(|&k| columns[k].clone()).collect();
        least_squares(&selected, targets).map_or(f64::INFINITY, |(_, rss)| rss)
    };

    let mut active: Vec<usize> = (0..columns.len()).collect();
    let mut best_subset = active.clone();
    let mut best_gcv = gcv(rss_of(&active), active.len(), n, penalty);

    while active.len() > 1 {
        let mut best_removal: Option<(usize, f64)> = None;
        for position in 1..active.len() {
            let mut candidate = active.clone();
            candidate.remove(position);
            let rss = rss_of(&candidate);
            if best_removal.map_or(true, |(_, best)| rss < best) {
                best_removal = Some((position, rss));
            }
        }

        let Some((position, rss)) = best_removal else {
            break;
        };
        active.remove(position);

        let score = gcv(rss, active.len(), n, penalty);
        if score <= best_gcv {
            best_gcv = score;
            best_subset = active.clone();
        }
    }

    best_subset
}
