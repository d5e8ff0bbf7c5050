#![warn(clippy::all)]

//! Core data structures for point cloud feature extraction and classification
//!
//! The [PointCloud](crate::cloud::PointCloud) type stores positions together with optional colors, normals and
//! any number of named scalar fields. Point clouds live in a [CloudStore](crate::cloud::CloudStore), which also
//! caches one [Octree](crate::index::Octree) per cloud for spatial queries.

pub extern crate nalgebra;

/// Point clouds, scalar fields and the cloud store
pub mod cloud;
/// Spatial index for neighborhood queries
pub mod index;
/// Useful mathematical tools when working with point cloud data
pub mod math;

#[cfg(test)]
pub(crate) mod test_utils;
