//! Numeric kernels shared by the metric catalog.
//!
//! Population formulas throughout; percentiles interpolate linearly between
//! nearest ranks; l-moments use the standard unbiased plotting-position
//! estimators for the first four orders.

use crate::metric::SENTINEL;

/// Arithmetic mean. Caller guarantees a non-empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
	values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
	let m = mean(values);
	values.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
#[must_use]
pub fn stddev(values: &[f64]) -> f64 {
	variance(values).sqrt()
}

/// Second, third and fourth central moments.
#[must_use]
pub fn central_moments(values: &[f64]) -> (f64, f64, f64) {
	let m = mean(values);
	let n = values.len() as f64;
	let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
	for x in values {
		let d = x - m;
		let d2 = d * d;
		m2 += d2;
		m3 += d2 * d;
		m4 += d2 * d2;
	}
	(m2 / n, m3 / n, m4 / n)
}

#[must_use]
pub fn min(values: &[f64]) -> f64 {
	values.iter().copied().fold(f64::INFINITY, f64::min)
}

#[must_use]
pub fn max(values: &[f64]) -> f64 {
	values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Sorted ascending copy.
#[must_use]
pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
	let mut sorted = values.to_vec();
	sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
	sorted
}

/// Percentile of an already sorted slice, `q` in `[0, 100]`, with linear
/// interpolation between nearest ranks.
#[must_use]
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
	let n = sorted.len();
	if n == 1 {
		return sorted[0];
	}
	let h = (n - 1) as f64 * q / 100.0;
	let lo = h.floor() as usize;
	let hi = h.ceil() as usize;
	sorted[lo] + (sorted[hi] - sorted[lo]) * (h - lo as f64)
}

/// Percentile of an unsorted slice.
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> f64 {
	percentile_sorted(&sorted_copy(values), q)
}

#[must_use]
pub fn median(values: &[f64]) -> f64 {
	percentile(values, 50.0)
}

/// Mode of a floating-point sample, following the FUSION convention:
/// partition the value range into 64 equal bins, take the bin with the
/// highest count, and report `min + bin·(max−min)/(nbins−1)`. A constant
/// sample returns its value.
#[must_use]
pub fn histogram_mode(values: &[f64]) -> f64 {
	const NBINS: usize = 64;

	let minv = min(values);
	let maxv = max(values);
	if minv == maxv {
		return minv;
	}

	let scale = NBINS as f64 / (maxv - minv);
	let mut counts = [0u32; NBINS];
	for x in values {
		// the maximum value falls into the last bin
		let bin = (((x - minv) * scale) as usize).min(NBINS - 1);
		counts[bin] += 1;
	}

	let mut best = 0;
	for (bin, &count) in counts.iter().enumerate() {
		if count > counts[best] {
			best = bin;
		}
	}

	minv + best as f64 * (maxv - minv) / (NBINS as f64 - 1.0)
}

/// First four l-moments via unbiased probability-weighted moments over the
/// ascending order statistics. Caller guarantees at least 4 values.
#[must_use]
pub fn lmom4(values: &[f64]) -> [f64; 4] {
	let sorted = sorted_copy(values);
	let n = sorted.len() as f64;

	let (mut b0, mut b1, mut b2, mut b3) = (0.0, 0.0, 0.0, 0.0);
	for (i, x) in sorted.iter().enumerate() {
		let r = i as f64;
		b0 += x;
		b1 += x * r;
		b2 += x * r * (r - 1.0);
		b3 += x * r * (r - 1.0) * (r - 2.0);
	}
	b0 /= n;
	b1 /= n * (n - 1.0);
	b2 /= n * (n - 1.0) * (n - 2.0);
	b3 /= n * (n - 1.0) * (n - 2.0) * (n - 3.0);

	[
		b0,
		2.0 * b1 - b0,
		6.0 * b2 - 6.0 * b1 + b0,
		20.0 * b3 - 30.0 * b2 + 12.0 * b1 - b0,
	]
}

/// Area under the normalized percentile height curve (composite trapezoidal
/// rule over percentiles 1..99, normalized by the 99th percentile).
/// Returns the sentinel unless the sample and its 99th percentile are
/// strictly positive.
#[must_use]
pub fn profile_area(values: &[f64]) -> f64 {
	if max(values) <= 0.0 {
		return SENTINEL;
	}

	let sorted = sorted_copy(values);
	let p: Vec<f64> = (1..100).map(|q| percentile_sorted(&sorted, f64::from(q))).collect();
	let p99 = p[98];
	if p99 <= 0.0 {
		return SENTINEL;
	}

	let mut pa = sorted[0].max(0.0) / p99;
	for ip in &p[..97] {
		pa += 2.0 * ip / p99;
	}
	pa += 1.0;

	pa * 0.5
}
