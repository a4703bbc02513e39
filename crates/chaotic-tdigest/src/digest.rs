//! Merging t-digest.
//!
//! Centroids live in one flat vector. The prefix `[0, merged)` is the
//! merged, sorted summary; everything after it is the unmerged buffer
//! filled by [`Digest::add`] and [`Digest::merge`]. Once the buffer
//! reaches the batch size, a progressive merge pass sorts the whole vector
//! and folds neighbouring centroids together under the arcsine scale
//! function, which keeps groups near `q = 0` and `q = 1` small and lets
//! groups around the median grow.
//!
//! The aggregates (`min`, `max`, `sum`, `count`) are tracked exactly and
//! never approximated.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::f64::consts::PI;
use std::mem::size_of;

use crate::error::{DigestError, DigestResult};

/// Compression adopted when raw points are added to an undetermined digest.
pub const DEFAULT_COMPRESSION: f64 = 100.0;

/// Upper bound applied to every requested compression.
pub const MAX_COMPRESSION: f64 = 1e6;

/// A `(mean, count)` pair summarizing a cluster of nearby values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    mean: f64,
    count: i64,
}

impl Centroid {
    #[inline]
    pub fn new(mean: f64, count: i64) -> Self {
        Self { mean, count }
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    #[inline]
    pub fn count(&self) -> i64 {
        self.count
    }

    /// Fold `other` into this centroid, keeping the mean between the two inputs.
    #[inline]
    fn absorb(&mut self, other: &Centroid) {
        let lo = self.mean.min(other.mean);
        let hi = self.mean.max(other.mean);
        self.mean = interpolate(self.mean, other.mean, self.count as f64, other.count as f64)
            .clamp(lo, hi);
        self.count += other.count;
    }
}

/// Ascending by mean; equal means put the heavier centroid first.
#[inline]
pub(crate) fn centroid_order(a: &Centroid, b: &Centroid) -> Ordering {
    a.mean
        .partial_cmp(&b.mean)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.count.cmp(&a.count))
}

/// Weighted average of two values. Equal values come back bit-exact.
#[inline]
fn interpolate(v1: f64, v2: f64, w1: f64, w2: f64) -> f64 {
    if v1 == v2 {
        return v1;
    }
    let total = w1 + w2;
    if total <= 0.0 {
        return v1;
    }
    (v1 * w1 + v2 * w2) / total
}

#[inline]
fn bounded_compression(compression: f64) -> f64 {
    if compression.is_nan() {
        return 0.0;
    }
    compression.clamp(0.0, MAX_COMPRESSION)
}

/// Most centroids a merge pass can leave behind for `compression`.
#[inline]
pub fn max_centroids(compression: f64) -> usize {
    2 * bounded_compression(compression).ceil() as usize
}

/// Streaming, mergeable quantile estimator.
///
/// Not internally synchronized: share it behind a lock or keep it owned
/// by a single snapshot.
#[derive(Debug, Clone)]
pub struct Digest {
    compression: f64,
    batch_size: usize,
    centroids: Vec<Centroid>,
    merged: usize,
    min: f64,
    max: f64,
    sum: f64,
    count: i64,
}

impl Default for Digest {
    /// An undetermined digest that inherits its compression from the
    /// first digest merged into it.
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Digest {
    /// Create an empty digest. A compression of `0` means "to be determined".
    pub fn new(compression: f64) -> Self {
        let mut digest = Self {
            compression: 0.0,
            batch_size: 0,
            centroids: Vec::new(),
            merged: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        };
        digest.reset(compression);
        digest
    }

    /// Drop all data and start over with `compression`.
    pub fn reset(&mut self, compression: f64) {
        self.set_compression(compression);
        self.centroids.clear();
        self.merged = 0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.sum = 0.0;
        self.count = 0;
    }

    fn set_compression(&mut self, compression: f64) {
        self.compression = bounded_compression(compression);
        self.batch_size = 4 * max_centroids(self.compression);
    }

    /// Add `value` with weight `count`.
    ///
    /// Non-finite values, non-positive counts and samples that would
    /// overflow `count` or `sum` are dropped; use [`Digest::try_add`] to
    /// have them reported.
    pub fn add(&mut self, value: f64, count: i64) {
        let _ = self.try_add(value, count);
    }

    /// Add a single observation.
    #[inline]
    pub fn add_one(&mut self, value: f64) {
        self.add(value, 1);
    }

    /// Like [`Digest::add`], but rejects what `add` silently drops. A
    /// rejected sample leaves the digest unchanged.
    pub fn try_add(&mut self, value: f64, count: i64) -> DigestResult<()> {
        if !value.is_finite() {
            return Err(DigestError::NonFinite(value));
        }
        if count <= 0 {
            return Err(DigestError::InvalidCount(count));
        }
        let totals = self.checked_totals(value * count as f64, count)?;
        if self.compression == 0.0 {
            self.set_compression(DEFAULT_COMPRESSION);
        }
        self.commit_stats(value, value, totals);
        self.push_unmerged(Centroid::new(value, count));
        Ok(())
    }

    /// Merge `other` into this digest.
    ///
    /// An undetermined digest adopts `other`'s compression first. The
    /// aggregates accumulate exactly; the centroids are re-merged. A merge
    /// that would overflow `count` or `sum` is dropped.
    pub fn merge(&mut self, other: &Digest) {
        let _ = self.try_merge(other);
    }

    /// Like [`Digest::merge`], but reports an overflowing merge.
    pub fn try_merge(&mut self, other: &Digest) -> DigestResult<()> {
        if self.compression == 0.0 {
            self.reset(other.compression);
        }
        if other.count == 0 {
            return Ok(());
        }
        let totals = self.checked_totals(other.sum, other.count)?;
        if self.compression == 0.0 {
            self.set_compression(DEFAULT_COMPRESSION);
        }
        self.commit_stats(other.min, other.max, totals);
        for centroid in &other.centroids {
            self.push_unmerged(*centroid);
        }
        self.do_merge();
        Ok(())
    }

    /// Fold the unmerged buffer into the summary now instead of at the next
    /// batch boundary.
    pub fn flush(&mut self) {
        self.do_merge();
    }

    /// A view with an empty unmerged buffer. Borrows when already flushed.
    pub fn compacted(&self) -> Cow<'_, Digest> {
        if self.unmerged() == 0 {
            Cow::Borrowed(self)
        } else {
            let mut digest = self.clone();
            digest.do_merge();
            Cow::Owned(digest)
        }
    }

    #[inline]
    fn unmerged(&self) -> usize {
        self.centroids.len() - self.merged
    }

    /// `(sum, count)` after absorbing more weight. Both stay finite and
    /// in range so that the text record can always be read back.
    fn checked_totals(&self, sum: f64, count: i64) -> DigestResult<(f64, i64)> {
        let count = self
            .count
            .checked_add(count)
            .ok_or(DigestError::Overflow("count"))?;
        let sum = self.sum + sum;
        if !sum.is_finite() {
            return Err(DigestError::Overflow("sum"));
        }
        Ok((sum, count))
    }

    fn commit_stats(&mut self, min: f64, max: f64, (sum, count): (f64, i64)) {
        self.min = self.min.min(min);
        self.max = self.max.max(max);
        self.sum = sum;
        self.count = count;
    }

    fn push_unmerged(&mut self, centroid: Centroid) {
        self.centroids.push(centroid);
        if self.unmerged() >= self.batch_size {
            self.do_merge();
        }
    }

    /// Scale function `k(q)`: arcsine, `[0, 1] → [0, compression]`.
    #[inline]
    pub(crate) fn quantile_to_centroid(&self, quantile: f64) -> f64 {
        let q = quantile.clamp(0.0, 1.0);
        self.compression * ((2.0 * q - 1.0).asin() + PI / 2.0) / PI
    }

    /// Inverse scale function `q(k)`, saturating at `compression`.
    #[inline]
    pub(crate) fn centroid_to_quantile(&self, centroid: f64) -> f64 {
        let k = centroid.min(self.compression);
        ((k * PI / self.compression - PI / 2.0).sin() + 1.0) / 2.0
    }

    /// Progressive merge pass over the summary and the unmerged buffer.
    fn do_merge(&mut self) {
        if self.unmerged() == 0 {
            return;
        }

        self.centroids.sort_unstable_by(centroid_order);

        let total = self.count as f64;
        let mut k0 = 0.0;
        let mut limit = total * self.centroid_to_quantile(k0 + 1.0);
        let mut cumulative = self.centroids[0].count;
        let mut merged = 1;

        for i in 1..self.centroids.len() {
            let next = self.centroids[i];
            let next_cumulative = cumulative + next.count;
            if next_cumulative as f64 <= limit {
                self.centroids[merged - 1].absorb(&next);
            } else {
                // Open a new group starting at the current quantile.
                k0 = self.quantile_to_centroid(cumulative as f64 / total);
                limit = total * self.centroid_to_quantile(k0 + 1.0);
                self.centroids[merged] = next;
                merged += 1;
            }
            cumulative = next_cumulative;
        }

        self.centroids.truncate(merged);
        self.merged = merged;
    }

    /// Estimated value below which a `quantile` fraction of the weight lies.
    ///
    /// NaN for an empty digest or a NaN `quantile`; `quantile` is clamped
    /// to `[0, 1]`.
    pub fn quantile(&self, quantile: f64) -> f64 {
        self.compacted().merged_quantile(quantile)
    }

    fn merged_quantile(&self, quantile: f64) -> f64 {
        if self.merged == 0 || quantile.is_nan() {
            return f64::NAN;
        }
        let centroids = &self.centroids[..self.merged];
        let total = self.count as f64;
        let target = quantile.clamp(0.0, 1.0) * total;

        let mut prev_count = 0.0;
        let mut prev_val = self.min;
        let mut this_count = centroids[0].count as f64 / 2.0;
        let mut this_val = centroids[0].mean;

        for i in 0..centroids.len() {
            if target < this_count {
                break;
            }
            prev_count = this_count;
            prev_val = this_val;
            if i == centroids.len() - 1 {
                // Between the last centroid and max.
                this_count = total;
                this_val = self.max;
            } else {
                this_count += (centroids[i].count + centroids[i + 1].count) as f64 / 2.0;
                this_val = centroids[i + 1].mean;
            }
        }

        interpolate(prev_val, this_val, this_count - target, target - prev_count)
    }

    /// Estimated fraction of the weight strictly below `value`.
    ///
    /// `0` below and at `min`, `1` at and above `max`, NaN when empty.
    pub fn cdf(&self, value: f64) -> f64 {
        self.compacted().merged_cdf(value)
    }

    fn merged_cdf(&self, value: f64) -> f64 {
        if self.merged == 0 || value.is_nan() {
            return f64::NAN;
        }
        if value < self.min {
            return 0.0;
        }
        if value >= self.max {
            return 1.0;
        }
        if value == self.min {
            return 0.0;
        }

        let centroids = &self.centroids[..self.merged];
        let total = self.count as f64;
        if centroids.len() == 1 {
            return (value - self.min) / (self.max - self.min);
        }

        let first = centroids[0];
        if value < first.mean {
            return interpolate(
                0.0,
                first.count as f64 / total / 2.0,
                first.mean - value,
                value - self.min,
            );
        }
        let last = centroids[centroids.len() - 1];
        if value >= last.mean {
            return interpolate(
                1.0 - last.count as f64 / total / 2.0,
                1.0,
                self.max - value,
                value - last.mean,
            );
        }

        let mut accum = first.count as f64 / 2.0;
        for i in 0..centroids.len() - 1 {
            let lo = centroids[i];
            let hi = centroids[i + 1];
            if lo.mean == value {
                // A run of equal means answers with the middle of the run.
                let start = accum;
                let mut j = i;
                while j + 1 < centroids.len() && centroids[j + 1].mean == value {
                    accum += (centroids[j].count + centroids[j + 1].count) as f64 / 2.0;
                    j += 1;
                }
                return (start + accum) / 2.0 / total;
            }
            if lo.mean < value && value < hi.mean {
                let ratio = (value - lo.mean) / (hi.mean - lo.mean);
                let delta = (lo.count + hi.count) as f64 / 2.0;
                return (accum + delta * ratio) / total;
            }
            accum += (lo.count + hi.count) as f64 / 2.0;
        }
        f64::NAN
    }

    #[inline]
    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Smallest value added, or `0` when empty.
    #[inline]
    pub fn min(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.min }
    }

    /// Largest value added, or `0` when empty.
    #[inline]
    pub fn max(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.max }
    }

    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Total weight added, independent of how many centroids hold it.
    #[inline]
    pub fn count(&self) -> i64 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of centroids after a merge pass.
    pub fn num_centroids(&self) -> usize {
        self.compacted().merged
    }

    /// Merged centroids in sort order. Only meaningful after a flush.
    #[inline]
    pub(crate) fn merged_centroids(&self) -> &[Centroid] {
        &self.centroids[..self.merged]
    }

    /// Approximate heap plus inline footprint.
    pub fn mem_usage_bytes(&self) -> usize {
        size_of::<Self>() + self.centroids.capacity() * size_of::<Centroid>()
    }

    /// Build a flushed digest from validated parts. Used by the codec.
    pub(crate) fn from_parts(
        compression: f64,
        count: i64,
        min: f64,
        max: f64,
        sum: f64,
        centroids: Vec<Centroid>,
    ) -> Self {
        let mut digest = Self::new(compression);
        if count > 0 {
            digest.min = min;
            digest.max = max;
            digest.sum = sum;
            digest.count = count;
            digest.merged = centroids.len();
            digest.centroids = centroids;
        }
        digest
    }
}
