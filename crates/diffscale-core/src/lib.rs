//! Scaling of X-ray diffraction intensities: smooth, parameterised inverse
//! scale factors refined so that symmetry-equivalent observations agree.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;
pub mod reflections;
