//! Sample points and class-partitioned sample collections.
//!
//! A [`Point`] is a fixed-length vector of `f64`. A [`SampleCollection`]
//! groups points by class index; every point in a collection has the same
//! dimension. Collections are built once (from files or in memory) and are
//! read-only while a model is fitted.

use crate::error::{Error, Result};
use ndarray::Array2;
use std::ops::Index;

/// An immutable d-dimensional sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    coords: Box<[f64]>,
}

impl Point {
    /// Create a point from its coordinates.
    pub fn new(coords: Vec<f64>) -> Self {
        Self {
            coords: coords.into_boxed_slice(),
        }
    }

    /// Dimension.
    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    /// Coordinates as a slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.coords
    }
}

impl Index<usize> for Point {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.coords[i]
    }
}

impl From<Vec<f64>> for Point {
    fn from(coords: Vec<f64>) -> Self {
        Self::new(coords)
    }
}

impl<const N: usize> From<[f64; N]> for Point {
    fn from(coords: [f64; N]) -> Self {
        Self::new(coords.to_vec())
    }
}

/// Points belonging to one class.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassSamples {
    /// Free-text class title.
    pub title: String,
    points: Vec<Point>,
}

impl ClassSamples {
    /// Points of this class in input order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when the class has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Sample points partitioned by class index.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleCollection {
    dimension: usize,
    classes: Vec<ClassSamples>,
}

impl SampleCollection {
    /// Empty collection of `dimension`-dimensional points.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            classes: Vec::new(),
        }
    }

    /// Single unlabelled class built from raw rows.
    pub fn from_rows(dimension: usize, rows: &[Vec<f64>]) -> Result<Self> {
        let mut out = Self::new(dimension);
        out.push_class("", rows.iter().cloned().map(Point::new).collect())?;
        Ok(out)
    }

    /// Append a class; returns its index.
    ///
    /// Fails if any point's dimension differs from the collection's.
    pub fn push_class(&mut self, title: impl Into<String>, points: Vec<Point>) -> Result<usize> {
        if self.dimension == 0 {
            return Err(Error::InvalidParameter {
                name: "dimension",
                message: "must be > 0".into(),
            });
        }
        if let Some(bad) = points.iter().find(|p| p.dim() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: bad.dim(),
            });
        }
        self.classes.push(ClassSamples {
            title: title.into(),
            points,
        });
        Ok(self.classes.len() - 1)
    }

    /// Point dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of classes.
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Class by index.
    pub fn class(&self, index: usize) -> Result<&ClassSamples> {
        self.classes.get(index).ok_or(Error::UnknownClass {
            index,
            n_classes: self.classes.len(),
        })
    }

    /// All classes in index order.
    pub fn classes(&self) -> &[ClassSamples] {
        &self.classes
    }

    /// Total number of points across classes.
    pub fn total_points(&self) -> usize {
        self.classes.iter().map(ClassSamples::len).sum()
    }

    /// `(class index, point)` pairs, class-major.
    pub fn iter_labelled(&self) -> impl Iterator<Item = (usize, &Point)> + '_ {
        self.classes
            .iter()
            .enumerate()
            .flat_map(|(c, class)| class.points.iter().map(move |p| (c, p)))
    }

    /// Class points as an `n × d` matrix.
    pub fn to_array(&self, index: usize) -> Result<Array2<f64>> {
        points_to_array(self.class(index)?.points(), self.dimension)
    }
}

/// Stack points into an `n × d` matrix.
pub(crate) fn points_to_array(points: &[Point], dimension: usize) -> Result<Array2<f64>> {
    let mut flat = Vec::with_capacity(points.len() * dimension);
    for p in points {
        if p.dim() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                found: p.dim(),
            });
        }
        flat.extend_from_slice(p.as_slice());
    }
    Array2::from_shape_vec((points.len(), dimension), flat).map_err(|e| Error::InvalidParameter {
        name: "points",
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_class_checks_dimension() {
        let mut c = SampleCollection::new(2);
        let idx = c
            .push_class("a", vec![Point::from([0.0, 1.0]), Point::from([2.0, 3.0])])
            .unwrap();
        assert_eq!(idx, 0);

        let err = c.push_class("b", vec![Point::from([1.0, 2.0, 3.0])]);
        assert!(matches!(
            err,
            Err(Error::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
        assert_eq!(c.n_classes(), 1);
    }

    #[test]
    fn labelled_iteration_is_class_major() {
        let mut c = SampleCollection::new(1);
        c.push_class("a", vec![Point::from([1.0]), Point::from([2.0])])
            .unwrap();
        c.push_class("b", vec![Point::from([3.0])]).unwrap();

        let labels: Vec<usize> = c.iter_labelled().map(|(k, _)| k).collect();
        assert_eq!(labels, vec![0, 0, 1]);
        assert_eq!(c.total_points(), 3);
    }

    #[test]
    fn to_array_stacks_rows() {
        let c = SampleCollection::from_rows(2, &[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let a = c.to_array(0).unwrap();
        assert_eq!(a.dim(), (2, 2));
        assert_eq!(a[[1, 0]], 3.0);
        assert!(c.to_array(1).is_err());
    }
}
