//! Algorithms of the synthesis core
//!
//! Training data is partitioned by [`segmentation`], one discrete Bayesian
//! network per segment is fitted and sampled by [`bayesnet`], microdata
//! households are weighted against marginal controls by [`allocation`], and
//! [`population`] ties allocation counts and trained models together.

pub mod allocation;
pub mod bayesnet;
pub mod population;
pub mod segmentation;
