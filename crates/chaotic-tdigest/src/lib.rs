//! chaotic-tdigest — latency distributions in bounded memory.
//!
//! A merging t-digest that summarizes a stream of latencies, a stable text
//! encoding for it, and a two-sample Kolmogorov-Smirnov comparison used to
//! decide whether two latency distributions differ.
//!
//! # Components
//!
//! - **`digest`** — [`Digest`]: add, merge, quantile, cdf
//! - **`codec`** — `compression/count/min/max/sum/centroids...` text record
//! - **`ks`** — KS statistic, threshold and test over two digests

mod codec;
pub mod digest;
pub mod error;
pub mod ks;

pub use digest::{Centroid, Digest, DEFAULT_COMPRESSION, MAX_COMPRESSION};
pub use error::{DigestError, DigestResult};
pub use ks::{
    ks_critical_value, ks_statistic, ks_statistic_in_range, ks_test, ks_threshold,
    DEFAULT_KS_SAMPLES,
};
