// approx.rs - Approximate distributions for very large item counts

use super::{check_probability, merge_atoms, CumulativeDistribution, Distribution, APPROX_TOLERANCE};
use crate::core::table::Aggregate;
use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::str::FromStr;

/// Approximation strategy for the aggregate of N independent items
///
/// Products are handled on the log scale, with zero-valued items carried as a
/// separate point mass at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproxMethod {
    /// Normal law matching the mean and variance of the (log-)sum.
    /// Absolute error O(1/sqrt(N)); relative error in the far tail is unbounded.
    Normal,
    /// Lugannani-Rice tail from the items' exact cumulant generating function.
    /// Matches every cumulant to leading order; relative tail error O(1/N).
    /// Lattice supports (e.g. match counts) get a continuity correction and
    /// quantiles on the lattice.
    Saddlepoint,
    /// Repeated squaring of each item on an equal-width grid of `bins` points.
    /// Mean preserved exactly; cost O(bins^2 log N).
    Binned { bins: usize },
}

impl FromStr for ApproxMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.as_str() {
            "normal" => Ok(ApproxMethod::Normal),
            "saddlepoint" | "spa" => Ok(ApproxMethod::Saddlepoint),
            "binned" => Ok(ApproxMethod::Binned { bins: 1000 }),
            _ => {
                if let Some(bins) = lower.strip_prefix("binned:") {
                    let bins = bins
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid bin count in '{}'", s))?;
                    return Ok(ApproxMethod::Binned { bins });
                }
                Err(format!(
                    "Unknown approximation '{}'. Use: normal, saddlepoint, binned[:BINS]",
                    s
                ))
            }
        }
    }
}

/// One item kind on the additive scale, repeated `count` times
#[derive(Debug, Clone, PartialEq)]
struct Component {
    /// Normalized, ascending atoms (raw values for sums, logs of positive values for products)
    atoms: Vec<(f64, f64)>,
    count: f64,
}

impl Component {
    fn mean(&self) -> f64 {
        self.atoms.iter().map(|(x, p)| x * p).sum()
    }

    fn variance(&self) -> f64 {
        let mean = self.mean();
        self.atoms.iter().map(|(x, p)| p * (x - mean) * (x - mean)).sum()
    }

    fn min(&self) -> f64 {
        self.atoms[0].0
    }

    fn max(&self) -> f64 {
        self.atoms[self.atoms.len() - 1].0
    }

    /// K(s), K'(s), K''(s) of a single item
    fn cgf(&self, s: f64) -> (f64, f64, f64) {
        let shift = self
            .atoms
            .iter()
            .map(|(x, _)| s * x)
            .fold(f64::NEG_INFINITY, f64::max);
        let (mut w0, mut w1, mut w2) = (0.0, 0.0, 0.0);
        for (x, p) in &self.atoms {
            let w = p * (s * x - shift).exp();
            w0 += w;
            w1 += w * x;
            w2 += w * x * x;
        }
        let k1 = w1 / w0;
        (shift + w0.ln(), k1, (w2 / w0 - k1 * k1).max(0.0))
    }
}

/// Map an item to the additive scale; returns the component and, for
/// products, P(item = 0)
fn additive(item: &Distribution, count: u64, combine: Aggregate) -> Result<(Component, f64)> {
    let kept = item.kept_mass();
    match combine {
        Aggregate::Sum => Ok((
            Component {
                atoms: item.atoms().map(|(x, p)| (x, p / kept)).collect(),
                count: count as f64,
            },
            0.0,
        )),
        Aggregate::Product => {
            if item.min() < 0.0 {
                return Err(KinError::invalid_parameter(
                    "product approximation needs non-negative item values",
                ));
            }
            let zero: f64 = item.atoms().filter(|(x, _)| *x == 0.0).map(|(_, p)| p).sum();
            let positive = kept - zero;
            let atoms = if positive > 0.0 {
                item.atoms()
                    .filter(|(x, _)| *x > 0.0)
                    .map(|(x, p)| (x.ln(), p / positive))
                    .collect()
            } else {
                vec![(0.0, 1.0)]
            };
            Ok((
                Component {
                    atoms,
                    count: count as f64,
                },
                zero / kept,
            ))
        }
    }
}

/// Grids finer than this many steps per item are treated as continuous
const MAX_LATTICE_STEPS: f64 = 1e6;

/// Euclid on positive reals, remainders below a relative tolerance count as zero
fn float_gcd(mut a: f64, mut b: f64) -> Option<f64> {
    let tol = 1e-9 * a;
    for _ in 0..100 {
        if b <= tol {
            return Some(a);
        }
        let r = a % b;
        if r <= tol || b - r <= tol {
            return Some(b);
        }
        a = b;
        b = r;
    }
    None
}

/// Common grid spacing of all components' supports, each relative to its own
/// minimum; `None` when the supports do not sit on a shared grid
fn lattice_span(components: &[Component]) -> Option<f64> {
    let mut span: Option<f64> = None;
    for c in components {
        for &(x, _) in &c.atoms[1..] {
            let d = x - c.min();
            span = Some(match span {
                None => d,
                Some(h) => float_gcd(h.max(d), h.min(d))?,
            });
        }
    }
    let h = span.filter(|h| *h > 0.0 && h.is_finite())?;
    for c in components {
        if (c.max() - c.min()) / h > MAX_LATTICE_STEPS {
            return None;
        }
        for &(x, _) in &c.atoms {
            let m = (x - c.min()) / h;
            if (m - m.round()).abs() > 1e-6 {
                return None;
            }
        }
    }
    Some(h)
}

/// Smallest integer m in [0, len] with `pred(m)`, for a monotone predicate
fn first_step(len: f64, pred: impl Fn(f64) -> bool) -> Option<f64> {
    if !pred(len) {
        return None;
    }
    let (mut lo, mut hi) = (0.0, len);
    while lo < hi {
        let mid = ((lo + hi) / 2.0).floor();
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid + 1.0;
        }
    }
    Some(lo)
}

/// Maps queries on the statistic to queries on the additive scale
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scale {
    log: bool,
    /// P(product = 0) over all items
    zero_mass: f64,
}

impl Scale {
    fn cdf(&self, t: f64, cdf_s: impl Fn(f64) -> f64) -> f64 {
        if !self.log {
            return cdf_s(t);
        }
        if t < 0.0 {
            0.0
        } else if t == 0.0 {
            self.zero_mass
        } else {
            self.zero_mass + (1.0 - self.zero_mass) * cdf_s(t.ln())
        }
    }

    fn tail(&self, t: f64, tail_s: impl Fn(f64) -> f64) -> f64 {
        if !self.log {
            return tail_s(t);
        }
        if t <= 0.0 {
            1.0
        } else {
            (1.0 - self.zero_mass) * tail_s(t.ln())
        }
    }

    fn quantile(&self, p: f64, quantile_s: impl Fn(f64) -> f64) -> f64 {
        if !self.log {
            return quantile_s(p);
        }
        if p <= self.zero_mass {
            0.0
        } else {
            quantile_s((p - self.zero_mass) / (1.0 - self.zero_mass)).exp()
        }
    }

    fn tail_quantile(&self, alpha: f64, tail_quantile_s: impl Fn(f64) -> f64) -> f64 {
        if !self.log {
            return tail_quantile_s(alpha);
        }
        let positive = 1.0 - self.zero_mass;
        if positive <= alpha {
            0.0
        } else {
            tail_quantile_s(alpha / positive).exp()
        }
    }
}

/// Normal approximation of the (log-)sum
#[derive(Debug, Clone, PartialEq)]
pub struct NormalApprox {
    location: f64,
    sd: f64,
    mean: f64,
    scale: Scale,
}

impl NormalApprox {
    fn cdf_s(&self, t: f64) -> f64 {
        if self.sd == 0.0 {
            return if t >= self.location { 1.0 } else { 0.0 };
        }
        Normal::standard().cdf((t - self.location) / self.sd)
    }

    fn tail_s(&self, t: f64) -> f64 {
        if self.sd == 0.0 {
            return if t <= self.location { 1.0 } else { 0.0 };
        }
        Normal::standard().cdf((self.location - t) / self.sd)
    }

    fn quantile_s(&self, p: f64) -> f64 {
        if self.sd == 0.0 {
            return self.location;
        }
        if p <= 0.0 {
            return f64::NEG_INFINITY;
        }
        if p >= 1.0 {
            return f64::INFINITY;
        }
        self.location + self.sd * Normal::standard().inverse_cdf(p)
    }

    /// Standard deviation of the (log-)sum
    pub fn sd(&self) -> f64 {
        self.sd
    }
}

/// Saddlepoint approximation of the (log-)sum
#[derive(Debug, Clone, PartialEq)]
pub struct SaddlepointApprox {
    components: Vec<Component>,
    lower: f64,
    upper: f64,
    /// Grid spacing when every attainable value is `lower + m * h`
    lattice: Option<f64>,
    fallback: NormalApprox,
    mean: f64,
    scale: Scale,
}

impl SaddlepointApprox {
    /// K, K', K'' of the whole (log-)sum
    fn cgf(&self, s: f64) -> (f64, f64, f64) {
        self.components.iter().fold((0.0, 0.0, 0.0), |acc, c| {
            let (k0, k1, k2) = c.cgf(s);
            (acc.0 + c.count * k0, acc.1 + c.count * k1, acc.2 + c.count * k2)
        })
    }

    /// Solve K'(s) = t for an interior t
    fn saddlepoint(&self, t: f64) -> f64 {
        let mean = self.fallback.location;
        let (mut lo, mut hi) = if t > mean { (0.0, 1.0) } else { (-1.0, 0.0) };
        // Expand the bracket
        for _ in 0..200 {
            if t > mean && self.cgf(hi).1 < t {
                lo = hi;
                hi *= 2.0;
            } else if t <= mean && self.cgf(lo).1 > t {
                hi = lo;
                lo *= 2.0;
            } else {
                break;
            }
        }
        // Newton steps kept inside the bracket, bisection otherwise
        let mut s = 0.5 * (lo + hi);
        for _ in 0..200 {
            let (_, k1, k2) = self.cgf(s);
            let diff = k1 - t;
            if diff.abs() < 1e-14 * t.abs().max(1.0) {
                break;
            }
            if diff > 0.0 {
                hi = s;
            } else {
                lo = s;
            }
            let newton = s - diff / k2;
            s = if k2 > 0.0 && newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
            if hi - lo < 1e-15 * s.abs().max(1.0) {
                break;
            }
        }
        s
    }

    fn upper_mass(&self) -> f64 {
        self.components
            .iter()
            .map(|c| c.atoms[c.atoms.len() - 1].1.powf(c.count))
            .product()
    }

    /// Number of grid steps between `lower` and `upper`
    fn grid_len(&self, h: f64) -> f64 {
        ((self.upper - self.lower) / h).round()
    }

    fn tail_s(&self, t: f64) -> f64 {
        if let Some(h) = self.lattice {
            // P(X >= t) = P(X >= first grid point at or above t)
            let m = ((t - self.lower) / h - 1e-9).ceil();
            let len = self.grid_len(h);
            return if m <= 0.0 {
                1.0
            } else if m > len {
                0.0
            } else if m == len {
                self.upper_mass()
            } else {
                self.smooth_tail(self.lower + (m - 0.5) * h, Some(h))
            };
        }
        if t <= self.lower {
            return 1.0;
        }
        if t > self.upper {
            return 0.0;
        }
        if t == self.upper {
            return self.upper_mass();
        }
        self.smooth_tail(t, None)
    }

    /// Saddlepoint tail at an interior point; with a lattice spacing `h` the
    /// point is half a step below a grid value (Daniels' second correction)
    fn smooth_tail(&self, x: f64, lattice: Option<f64>) -> f64 {
        let sd = self.fallback.sd;
        if sd == 0.0 || (x - self.fallback.location).abs() < 1e-6 * sd {
            return self.fallback.tail_s(x);
        }
        let s = self.saddlepoint(x);
        let (k, _, k2) = self.cgf(s);
        let exponent = 2.0 * (s * x - k);
        let u = match lattice {
            Some(h) => 2.0 * (0.5 * s * h).sinh() / h * k2.sqrt(),
            None => s * k2.sqrt(),
        };
        if exponent <= 0.0 || u == 0.0 {
            return self.fallback.tail_s(x);
        }
        let w = s.signum() * exponent.sqrt();
        let ratio = u / w;
        if ratio <= 0.0 || !ratio.is_finite() {
            return self.fallback.tail_s(x);
        }
        let r_star = w + ratio.ln() / w;
        let normal = Normal::standard();
        if r_star.is_finite() {
            normal.cdf(-r_star)
        } else {
            // Lugannani-Rice
            (normal.cdf(-w) + normal.pdf(w) * (1.0 / u - 1.0 / w)).clamp(0.0, 1.0)
        }
    }

    fn cdf_s(&self, t: f64) -> f64 {
        match self.lattice {
            Some(h) => {
                if t < self.lower {
                    return 0.0;
                }
                // P(X <= t) = 1 - P(X >= next grid point above t)
                let m = ((t - self.lower) / h + 1e-9).floor();
                1.0 - self.tail_s(self.lower + (m + 1.0) * h)
            }
            None => 1.0 - self.tail_s(t),
        }
    }

    /// Invert a monotone function of the additive value by bisection
    fn invert(&self, target: f64, decreasing: bool, f: impl Fn(f64) -> f64) -> f64 {
        let (mut lo, mut hi) = (self.lower, self.upper);
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            let v = f(mid);
            let go_right = if decreasing { v > target } else { v < target };
            if go_right {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= 1e-12 * hi.abs().max(1.0) {
                break;
            }
        }
        hi
    }

    fn quantile_s(&self, p: f64) -> f64 {
        if p <= 0.0 {
            return self.lower;
        }
        match self.lattice {
            Some(h) => first_step(self.grid_len(h), |m| self.cdf_s(self.lower + m * h) >= p)
                .map_or(self.upper, |m| self.lower + m * h),
            None => self.invert(p, false, |x| self.cdf_s(x)),
        }
    }

    /// Infinite on a lattice when even the largest value has tail mass above `alpha`
    fn tail_quantile_s(&self, alpha: f64) -> f64 {
        if alpha >= 1.0 {
            return self.lower;
        }
        match self.lattice {
            Some(h) => first_step(self.grid_len(h), |m| self.tail_s(self.lower + m * h) <= alpha)
                .map_or(f64::INFINITY, |m| self.lower + m * h),
            None => self.invert(alpha, true, |x| self.tail_s(x)),
        }
    }
}

/// Approximate distribution of an aggregate of many items
#[derive(Debug, Clone, PartialEq)]
pub enum Approximation {
    Normal(NormalApprox),
    Saddlepoint(SaddlepointApprox),
    Binned(Distribution),
}

impl CumulativeDistribution for Approximation {
    fn cdf(&self, t: f64) -> f64 {
        match self {
            Approximation::Normal(a) => a.scale.cdf(t, |x| a.cdf_s(x)),
            Approximation::Saddlepoint(a) => a.scale.cdf(t, |x| a.cdf_s(x)),
            Approximation::Binned(d) => d.cdf(t),
        }
    }

    fn tail(&self, t: f64) -> f64 {
        match self {
            Approximation::Normal(a) => a.scale.tail(t, |x| a.tail_s(x)),
            Approximation::Saddlepoint(a) => a.scale.tail(t, |x| a.tail_s(x)),
            Approximation::Binned(d) => d.tail(t),
        }
    }

    fn quantile(&self, p: f64) -> Result<f64> {
        check_probability(p, "quantile level")?;
        Ok(match self {
            Approximation::Normal(a) => a.scale.quantile(p, |x| a.quantile_s(x)),
            Approximation::Saddlepoint(a) => a.scale.quantile(p, |x| a.quantile_s(x)),
            Approximation::Binned(d) => return d.quantile(p),
        })
    }

    fn tail_quantile(&self, alpha: f64) -> Result<f64> {
        check_probability(alpha, "tail probability")?;
        Ok(match self {
            Approximation::Normal(a) => a.scale.tail_quantile(alpha, |x| a.quantile_s(1.0 - x)),
            Approximation::Saddlepoint(a) => a.scale.tail_quantile(alpha, |x| a.tail_quantile_s(x)),
            Approximation::Binned(d) => return d.tail_quantile(alpha),
        })
    }

    fn mean(&self) -> f64 {
        match self {
            Approximation::Normal(a) => a.mean,
            Approximation::Saddlepoint(a) => a.mean,
            Approximation::Binned(d) => d.mean(),
        }
    }
}

/// Approximate the aggregate of `n` independent copies of `item`
pub fn approximate(
    item: &Distribution,
    n: u64,
    combine: Aggregate,
    method: ApproxMethod,
) -> Result<Approximation> {
    approximate_multiset(&[(item.clone(), n)], combine, method)
}

/// Approximate the aggregate over `count` independent copies of each listed item
pub fn approximate_multiset(
    items: &[(Distribution, u64)],
    combine: Aggregate,
    method: ApproxMethod,
) -> Result<Approximation> {
    let items: Vec<&(Distribution, u64)> = items.iter().filter(|(_, n)| *n > 0).collect();
    if items.is_empty() {
        return Ok(Approximation::Binned(Distribution::point(combine.identity())));
    }

    let mut components = Vec::with_capacity(items.len());
    let mut log_positive = 0.0;
    let mut exact_mean = combine.identity();
    for (item, n) in &items {
        let (component, zero) = additive(item, *n, combine)?;
        if zero > 0.0 {
            log_positive += *n as f64 * (-zero).ln_1p();
        }
        exact_mean = match combine {
            Aggregate::Sum => exact_mean + *n as f64 * item.mean(),
            Aggregate::Product => exact_mean * item.mean().powf(*n as f64),
        };
        components.push(component);
    }
    let scale = Scale {
        log: combine == Aggregate::Product,
        zero_mass: -log_positive.exp_m1(),
    };
    let normal = NormalApprox {
        location: components.iter().map(|c| c.count * c.mean()).sum(),
        sd: components.iter().map(|c| c.count * c.variance()).sum::<f64>().sqrt(),
        mean: exact_mean,
        scale,
    };

    match method {
        ApproxMethod::Normal => Ok(Approximation::Normal(normal)),
        ApproxMethod::Saddlepoint => Ok(Approximation::Saddlepoint(SaddlepointApprox {
            lower: components.iter().map(|c| c.count * c.min()).sum(),
            upper: components.iter().map(|c| c.count * c.max()).sum(),
            lattice: lattice_span(&components),
            components,
            fallback: normal,
            mean: exact_mean,
            scale,
        })),
        ApproxMethod::Binned { bins } => {
            let counts: Vec<u64> = items.iter().map(|(_, n)| *n).collect();
            binned(&components, &counts, scale, bins).map(Approximation::Binned)
        }
    }
}

/// Equal-width rebinning; each bin keeps its mass at its mass-weighted mean
fn rebin(atoms: Vec<(f64, f64)>, bins: usize) -> Vec<(f64, f64)> {
    let atoms = merge_atoms(atoms);
    if atoms.len() <= bins {
        return atoms;
    }
    let lo = atoms[0].0;
    let hi = atoms[atoms.len() - 1].0;
    let width = (hi - lo) / bins as f64;
    let mut mass = vec![0.0; bins];
    let mut moment = vec![0.0; bins];
    for (x, p) in atoms {
        let idx = (((x - lo) / width) as usize).min(bins - 1);
        mass[idx] += p;
        moment[idx] += p * x;
    }
    mass.into_iter()
        .zip(moment)
        .filter(|(m, _)| *m > 0.0)
        .map(|(m, mx)| (mx / m, m))
        .collect()
}

fn pairwise_sums(a: &[(f64, f64)], b: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(a.len() * b.len());
    for &(x, p) in a {
        for &(y, q) in b {
            out.push((x + y, p * q));
        }
    }
    out
}

/// `n`-fold sum of one component by repeated squaring
fn binned_power(atoms: &[(f64, f64)], n: u64, bins: usize) -> Vec<(f64, f64)> {
    let mut power = rebin(atoms.to_vec(), bins);
    let mut result: Option<Vec<(f64, f64)>> = None;
    let mut k = n;
    while k > 0 {
        if k & 1 == 1 {
            result = Some(match result {
                None => power.clone(),
                Some(r) => rebin(pairwise_sums(&r, &power), bins),
            });
        }
        k >>= 1;
        if k > 0 {
            power = rebin(pairwise_sums(&power, &power), bins);
        }
    }
    result.unwrap_or_else(|| vec![(0.0, 1.0)])
}

fn binned(
    components: &[Component],
    counts: &[u64],
    scale: Scale,
    bins: usize,
) -> Result<Distribution> {
    if bins < 2 {
        return Err(KinError::invalid_parameter("binned approximation needs at least 2 bins"));
    }
    let mut atoms = vec![(0.0, 1.0)];
    for (component, &n) in components.iter().zip(counts) {
        let power = binned_power(&component.atoms, n, bins);
        atoms = rebin(pairwise_sums(&atoms, &power), bins);
    }

    let (mut values, mut probs): (Vec<f64>, Vec<f64>) = if scale.log {
        let positive = 1.0 - scale.zero_mass;
        atoms.into_iter().map(|(x, p)| (x.exp(), p * positive)).unzip()
    } else {
        atoms.into_iter().unzip()
    };
    if scale.log && scale.zero_mass > 0.0 {
        values.push(0.0);
        probs.push(scale.zero_mass);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(KinError::invalid_parameter(
            "binned product overflows the floating-point range; use normal or saddlepoint",
        ));
    }
    let total: f64 = probs.iter().sum();
    if (total - 1.0).abs() > APPROX_TOLERANCE {
        return Err(KinError::NormalizationError {
            total,
            tolerance: APPROX_TOLERANCE,
        });
    }
    probs.iter_mut().for_each(|p| *p /= total);
    Distribution::with_tolerance(values, probs, APPROX_TOLERANCE)
}
