use crate::kmeans::KMeansParams;

/// Largest supported bits per sub-code. Codes are stored one byte per sub-vector.
pub const MAX_NBITS: u8 = 8;

/// Structural parameters of an IVF-PQ index. Fixed at construction; the
/// configured defaults live in `docsim-config`.
#[derive(Clone, Debug, PartialEq)]
pub struct IvfPqParams {
    pub dimension: usize,
    pub nlist: usize,
    pub m: usize,
    pub nbits: u8,
    pub kmeans: KMeansParams,
}

impl IvfPqParams {
    pub fn new(dimension: usize, nlist: usize, m: usize, nbits: u8) -> Self {
        IvfPqParams {
            dimension,
            nlist,
            m,
            nbits,
            kmeans: KMeansParams::default(),
        }
    }

    pub fn with_kmeans(mut self, kmeans: KMeansParams) -> Self {
        self.kmeans = kmeans;
        self
    }

    /// Number of sub-centroids in each sub-codebook.
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    pub fn sub_dimension(&self) -> usize {
        self.dimension / self.m.max(1)
    }

    /// Returns a description of the first violated constraint, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("dimension must be greater than 0".to_string());
        }
        if self.nlist == 0 {
            return Err("nlist must be greater than 0".to_string());
        }
        if self.m == 0 {
            return Err("m must be greater than 0".to_string());
        }
        if self.dimension % self.m != 0 {
            return Err(format!(
                "dimension {} must be divisible by m {}",
                self.dimension, self.m
            ));
        }
        if self.nbits == 0 || self.nbits > MAX_NBITS {
            return Err(format!("nbits must be in 1..={}, got {}", MAX_NBITS, self.nbits));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_params() {
        assert!(IvfPqParams::new(8, 4, 2, 4).validate().is_ok());
        assert!(IvfPqParams::new(8, 4, 3, 4).validate().is_err());
        assert!(IvfPqParams::new(8, 0, 2, 4).validate().is_err());
        assert!(IvfPqParams::new(8, 4, 2, 0).validate().is_err());
        assert!(IvfPqParams::new(8, 4, 2, 9).validate().is_err());
        assert!(IvfPqParams::new(0, 4, 2, 4).validate().is_err());
    }

    #[test]
    fn test_derived_sizes() {
        let params = IvfPqParams::new(12, 4, 3, 5);
        assert_eq!(params.ksub(), 32);
        assert_eq!(params.sub_dimension(), 4);
    }
}
