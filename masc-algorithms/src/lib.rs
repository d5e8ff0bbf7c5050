#![warn(clippy::all)]
//! Multi-scale feature extraction and classification of point clouds.
//!
//! Features are described by [FeatureDescriptor](crate::features::FeatureDescriptor)s and computed on a set of
//! [CorePoints](crate::core_points::CorePoints) as scalar fields. A classifier is then trained on the values of
//! these fields and used to label other clouds. The [Pipeline](crate::pipeline::Pipeline) ties these steps together.

// Selection of the points on which features and labels are computed.
pub mod core_points;
pub mod error;
// Feature descriptors and the shared computation driver.
pub mod features;
// Bookkeeping of the scalar fields created during a run.
pub mod ledger;
// Neighborhood queries with automatic selection of the octree level.
pub mod neighborhood_search;
pub mod progress;
// Where a classifier reads its input values from, and the text format to store that list.
pub mod sources;
// Statistics over the values of a neighborhood, including a Weibull fit for mode and skewness.
pub mod stats;
// Contains methods to compute various structure measures using the structure tensor. The definitions for the structure measures
// are taken from the paper 'FEATURE RELEVANCE ASSESSMENT FOR THE SEMANTIC INTERPRETATION OF 3D POINT CLOUD DATA' (Martin Weinmann, Boris Jutzi, Clément Mallet, ISPRS Annals of the Photogrammetry, Remote Sensing and Spatial Information Sciences, Volume II-5/W2, 2013)
pub mod structure_measures;
// Training, evaluation and classification with a random forest.
pub mod classifier;
pub mod pipeline;
