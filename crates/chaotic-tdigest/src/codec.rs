//! Slash-delimited text record for digests.
//!
//! ```text
//! compression/count/min/max/sum[/mean[:count]]...
//! ```
//!
//! Centroids with a count of one omit the `:count` suffix. Floats use the
//! shortest representation that parses back to the same bits, so a record
//! produced here reproduces the digest exactly. The empty undetermined
//! digest is `0/0/0/0/0`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::digest::{centroid_order, max_centroids, Centroid, Digest, MAX_COMPRESSION};
use crate::error::{DigestError, DigestResult};

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digest = self.compacted();
        write!(
            f,
            "{}/{}/{}/{}/{}",
            digest.compression(),
            digest.count(),
            digest.min(),
            digest.max(),
            digest.sum()
        )?;
        for centroid in digest.merged_centroids() {
            if centroid.count() == 1 {
                write!(f, "/{}", centroid.mean())?;
            } else {
                write!(f, "/{}:{}", centroid.mean(), centroid.count())?;
            }
        }
        Ok(())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    /// Parse a record. The empty string is accepted as "no digest" and
    /// yields an empty undetermined digest.
    fn from_str(s: &str) -> DigestResult<Self> {
        if s.is_empty() {
            return Ok(Digest::default());
        }

        let mut fields = s.split('/');
        let compression = parse_f64(fields.next(), "compression")?;
        if compression < 0.0 || compression > MAX_COMPRESSION {
            return Err(DigestError::malformed(
                "compression",
                format!("{compression} is outside [0, {MAX_COMPRESSION}]"),
            ));
        }
        let count = parse_i64(fields.next(), "count")?;
        if count < 0 {
            return Err(DigestError::malformed("count", format!("negative count {count}")));
        }
        let min = parse_f64(fields.next(), "min")?;
        let max = parse_f64(fields.next(), "max")?;
        let sum = parse_f64(fields.next(), "sum")?;

        let centroids = fields
            .map(parse_centroid)
            .collect::<DigestResult<Vec<_>>>()?;

        if centroids.is_empty() {
            if count != 0 || min != 0.0 || max != 0.0 || sum != 0.0 {
                return Err(DigestError::malformed(
                    "centroids",
                    "empty digest with non-zero min, max, sum or count",
                ));
            }
            return Ok(Digest::new(compression));
        }

        validate(compression, count, min, max, &centroids)?;
        Ok(Digest::from_parts(compression, count, min, max, sum, centroids))
    }
}

impl Digest {
    /// Replace this digest with the one encoded in `s`.
    ///
    /// On error the digest is left untouched.
    pub fn from_string(&mut self, s: &str) -> DigestResult<()> {
        *self = s.parse()?;
        Ok(())
    }
}

fn validate(
    compression: f64,
    count: i64,
    min: f64,
    max: f64,
    centroids: &[Centroid],
) -> DigestResult<()> {
    if compression == 0.0 {
        return Err(DigestError::malformed(
            "compression",
            "centroids require a positive compression",
        ));
    }
    if centroids.len() > max_centroids(compression) + 1 {
        return Err(DigestError::malformed(
            "centroids",
            format!(
                "{} centroids exceed what compression {compression} allows",
                centroids.len()
            ),
        ));
    }
    if min > max {
        return Err(DigestError::malformed("min", format!("min {min} exceeds max {max}")));
    }
    if centroids
        .windows(2)
        .any(|w| centroid_order(&w[0], &w[1]).is_gt())
    {
        return Err(DigestError::malformed("centroids", "centroids are not sorted"));
    }
    if let Some(c) = centroids.iter().find(|c| c.mean() < min || c.mean() > max) {
        return Err(DigestError::malformed(
            "centroids",
            format!("centroid mean {} outside [{min}, {max}]", c.mean()),
        ));
    }
    let total = centroids
        .iter()
        .try_fold(0i64, |acc, c| acc.checked_add(c.count()))
        .ok_or_else(|| DigestError::malformed("centroids", "centroid counts overflow"))?;
    if total != count {
        return Err(DigestError::malformed(
            "count",
            format!("centroid counts add up to {total}, header says {count}"),
        ));
    }
    Ok(())
}

fn parse_f64(field: Option<&str>, name: &'static str) -> DigestResult<f64> {
    let raw = field.ok_or_else(|| DigestError::malformed(name, "missing"))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| DigestError::malformed(name, format!("invalid number {raw:?}")))?;
    if !value.is_finite() {
        return Err(DigestError::malformed(name, format!("non-finite value {raw:?}")));
    }
    Ok(value)
}

fn parse_i64(field: Option<&str>, name: &'static str) -> DigestResult<i64> {
    let raw = field.ok_or_else(|| DigestError::malformed(name, "missing"))?;
    raw.parse()
        .map_err(|_| DigestError::malformed(name, format!("invalid integer {raw:?}")))
}

fn parse_centroid(field: &str) -> DigestResult<Centroid> {
    let (mean, count) = match field.split_once(':') {
        Some((mean, count)) => (mean, parse_i64(Some(count), "centroid count")?),
        None => (field, 1),
    };
    let mean = parse_f64(Some(mean), "centroid mean")?;
    if count <= 0 {
        return Err(DigestError::malformed(
            "centroid count",
            format!("non-positive count {count}"),
        ));
    }
    Ok(Centroid::new(mean, count))
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = String::deserialize(deserializer)?;
        record.parse().map_err(serde::de::Error::custom)
    }
}
