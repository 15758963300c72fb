use docsim_index::{IvfPqParams, KMeansParams};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub fn default_dimensionality() -> usize {
    128
}

pub fn default_m() -> usize {
    4
}

pub fn default_nbits() -> u8 {
    8
}

pub fn default_nprobe() -> usize {
    8
}

pub fn default_k() -> usize {
    5
}

pub fn default_seed() -> u64 {
    1234
}

pub fn default_max_iterations() -> usize {
    25
}

pub fn default_convergence_threshold() -> f32 {
    1e-3
}

/// Index shape and search knobs.
///
/// `nlist` may be left unset, in which case it is derived from the number of
/// training vectors `n` as `4 * sqrt(n)`. `training_sample_size` caps how many
/// documents train the quantizers; unset trains on all of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_index_config"))]
pub struct IndexConfig {
    #[serde(default = "default_dimensionality")]
    #[validate(range(min = 1))]
    pub dimensionality: usize,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub nlist: Option<usize>,
    #[serde(default = "default_m")]
    #[validate(range(min = 1))]
    pub m: usize,
    #[serde(default = "default_nbits")]
    #[validate(range(min = 1, max = 8))]
    pub nbits: u8,
    #[serde(default = "default_nprobe")]
    #[validate(range(min = 1))]
    pub nprobe: usize,
    #[serde(default = "default_k")]
    #[validate(range(min = 1))]
    pub k: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_iterations")]
    #[validate(range(min = 1))]
    pub max_iterations: usize,
    #[serde(default = "default_convergence_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub convergence_threshold: f32,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub training_sample_size: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            dimensionality: default_dimensionality(),
            nlist: None,
            m: default_m(),
            nbits: default_nbits(),
            nprobe: default_nprobe(),
            k: default_k(),
            seed: default_seed(),
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            training_sample_size: None,
        }
    }
}

fn validate_index_config(config: &IndexConfig) -> Result<(), ValidationError> {
    if config.m > 0 && config.dimensionality % config.m != 0 {
        return Err(ValidationError::new("m").with_message(
            format!(
                "dimensionality {} must be divisible by m {}",
                config.dimensionality, config.m
            )
            .into(),
        ));
    }
    Ok(())
}

impl IndexConfig {
    /// Configured `nlist`, or `4 * sqrt(num_samples)` clamped to
    /// `1..=num_samples`.
    pub fn nlist_for(&self, num_samples: usize) -> usize {
        match self.nlist {
            Some(nlist) => nlist,
            None => {
                let derived = (4.0 * (num_samples as f64).sqrt()).round() as usize;
                derived.clamp(1, num_samples.max(1))
            }
        }
    }

    pub fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            max_iterations: self.max_iterations,
            convergence_threshold: self.convergence_threshold,
            seed: self.seed,
            ..KMeansParams::default()
        }
    }

    pub fn params(&self, num_samples: usize) -> IvfPqParams {
        IvfPqParams::new(
            self.dimensionality,
            self.nlist_for(num_samples),
            self.m,
            self.nbits,
        )
        .with_kmeans(self.kmeans_params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_nlist() {
        let config = IndexConfig::default();
        assert_eq!(config.nlist_for(100), 40);
        assert_eq!(config.nlist_for(4), 4);
        assert_eq!(config.nlist_for(0), 1);
        let fixed = IndexConfig {
            nlist: Some(7),
            ..IndexConfig::default()
        };
        assert_eq!(fixed.nlist_for(100), 7);
    }

    #[test]
    fn test_params() {
        let config = IndexConfig {
            seed: 9,
            ..IndexConfig::default()
        };
        let params = config.params(10_000);
        assert_eq!(params.dimension, 128);
        assert_eq!(params.nlist, 400);
        assert_eq!(params.m, 4);
        assert_eq!(params.nbits, 8);
        assert_eq!(params.kmeans.seed, 9);
        assert!(params.validate().is_ok());
        let small = IndexConfig::default().params(64);
        assert_eq!((small.nlist, small.m, small.nbits), (32, 4, 8));
    }

    #[test]
    fn test_validation() {
        assert!(IndexConfig::default().validate().is_ok());
        let indivisible = IndexConfig {
            dimensionality: 10,
            ..IndexConfig::default()
        };
        assert!(indivisible.validate().is_err());
        let too_many_bits = IndexConfig {
            nbits: 9,
            ..IndexConfig::default()
        };
        assert!(too_many_bits.validate().is_err());
        let no_probes = IndexConfig {
            nprobe: 0,
            ..IndexConfig::default()
        };
        assert!(no_probes.validate().is_err());
        let empty_nlist = IndexConfig {
            nlist: Some(0),
            ..IndexConfig::default()
        };
        assert!(empty_nlist.validate().is_err());
    }
}
