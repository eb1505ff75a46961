//! Year-pair fan-out. With the `threading` feature the jobs run on the current
//! rayon pool; otherwise they run in year order on the calling thread.
use crate::aggregate::YearPair;
use crate::error::Result;

/// Run `job` once per pair and stop at the first error.
pub fn for_each_pair<F>(pairs: &[YearPair], job: F) -> Result<()>
where
    F: Fn(YearPair) -> Result<()> + Sync + Send,
{
    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        pairs.par_iter().try_for_each(|&p| job(p))
    }
    #[cfg(not(feature = "threading"))]
    {
        pairs.iter().try_for_each(|&p| job(p))
    }
}
