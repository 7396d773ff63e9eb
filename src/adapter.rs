//! Building samples from plotted vector-field data.
//!
//! Callers holding field vectors (a position plus a magnitude and direction)
//! turn them into [`Point`]s here; the rest of the crate only sees points.

use crate::error::{Error, Result};
use crate::point::{Point, SampleCollection};
use std::fmt;
use std::str::FromStr;

/// One plotted field vector. `direction` is in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldVector {
    /// Horizontal position of the vector's tail.
    pub x: f64,
    /// Vertical position of the vector's tail.
    pub y: f64,
    /// Length of the vector.
    pub magnitude: f64,
    /// Angle from the +x axis, counter-clockwise, in radians.
    pub direction: f64,
}

impl FieldVector {
    /// Vector at `(x, y)` with the given magnitude and direction.
    pub fn new(x: f64, y: f64, magnitude: f64, direction: f64) -> Self {
        Self {
            x,
            y,
            magnitude,
            direction,
        }
    }

    /// Cartesian `(u, v)` components.
    pub fn components(&self) -> (f64, f64) {
        let (s, c) = self.direction.sin_cos();
        (self.magnitude * c, self.magnitude * s)
    }

    fn is_finite(&self) -> bool {
        [self.x, self.y, self.magnitude, self.direction]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Which values of a [`FieldVector`] become point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum VectorFeature {
    /// `[magnitude, direction]`.
    #[default]
    MagnitudeDirection,
    /// `[u, v]`; no wrap-around at ±π.
    Components,
    /// `[x, y, u, v]`.
    PositionComponents,
}

impl VectorFeature {
    /// Point dimension produced.
    pub fn dimension(&self) -> usize {
        match self {
            VectorFeature::MagnitudeDirection | VectorFeature::Components => 2,
            VectorFeature::PositionComponents => 4,
        }
    }

    /// Coordinates for `v`.
    pub fn point(&self, v: &FieldVector) -> Point {
        match self {
            VectorFeature::MagnitudeDirection => Point::from([v.magnitude, v.direction]),
            VectorFeature::Components => {
                let (u, w) = v.components();
                Point::from([u, w])
            }
            VectorFeature::PositionComponents => {
                let (u, w) = v.components();
                Point::from([v.x, v.y, u, w])
            }
        }
    }
}

impl fmt::Display for VectorFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VectorFeature::MagnitudeDirection => "magnitude-direction",
            VectorFeature::Components => "components",
            VectorFeature::PositionComponents => "position-components",
        })
    }
}

impl FromStr for VectorFeature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "magnitude-direction" | "polar" => Ok(VectorFeature::MagnitudeDirection),
            "components" | "uv" => Ok(VectorFeature::Components),
            "position-components" | "xyuv" => Ok(VectorFeature::PositionComponents),
            other => Err(Error::InvalidParameter {
                name: "feature",
                message: format!("unknown vector feature '{other}'"),
            }),
        }
    }
}

/// Points for `vectors`; vectors with non-finite values are dropped.
pub fn vectors_to_points(vectors: &[FieldVector], feature: VectorFeature) -> Vec<Point> {
    let points: Vec<Point> = vectors
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| feature.point(v))
        .collect();
    let dropped = vectors.len() - points.len();
    if dropped > 0 {
        tracing::warn!(dropped, "skipped non-finite field vectors");
    }
    points
}

/// One class per `(title, vectors)` group.
pub fn collection_from_vectors<I, S>(groups: I, feature: VectorFeature) -> Result<SampleCollection>
where
    I: IntoIterator<Item = (S, Vec<FieldVector>)>,
    S: Into<String>,
{
    let mut samples = SampleCollection::new(feature.dimension());
    for (title, vectors) in groups {
        samples.push_class(title, vectors_to_points(&vectors, feature))?;
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn features_have_their_dimension() {
        let v = FieldVector::new(1.0, 2.0, 3.0, FRAC_PI_2);
        for f in [
            VectorFeature::MagnitudeDirection,
            VectorFeature::Components,
            VectorFeature::PositionComponents,
        ] {
            assert_eq!(f.point(&v).dim(), f.dimension());
        }
    }

    #[test]
    fn components_follow_direction() {
        let v = FieldVector::new(0.0, 0.0, 2.0, FRAC_PI_2);
        let p = VectorFeature::Components.point(&v);
        assert!(p[0].abs() < 1e-12);
        assert!((p[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_vectors_are_dropped() {
        let vs = [
            FieldVector::new(0.0, 0.0, 1.0, 0.0),
            FieldVector::new(0.0, 0.0, f64::NAN, 0.0),
        ];
        let samples =
            collection_from_vectors([("wind", vs.to_vec())], VectorFeature::MagnitudeDirection)
                .unwrap();
        assert_eq!(samples.n_classes(), 1);
        assert_eq!(samples.total_points(), 1);
        assert_eq!(samples.class(0).unwrap().title, "wind");
    }

    #[test]
    fn feature_parses() {
        assert_eq!("uv".parse::<VectorFeature>().unwrap(), VectorFeature::Components);
        assert!("speed".parse::<VectorFeature>().is_err());
    }
}
