#![warn(clippy::all)]
//! Command line front end of the masc feature extraction and classification library

/// Reading and writing point clouds as ASCII text
pub mod ascii;
/// Feature descriptors from command line arguments
pub mod feature_list;
