use std::path::PathBuf;

use crate::{config::Config, depth, filter, merge};

/// Strategy
///
/// Get the per-base coverage table, either by running DepthOfCoverage or by
/// taking the file given with --skip-doc.  Filter it for sites where too many
/// samples are below the coverage cutoff, then merge the remaining sites
/// into intervals.  Returns the path to the interval file
pub fn run_pipeline(cfg: &Config) -> anyhow::Result<PathBuf> {
    let coverage_file = match cfg.skip_doc() {
        Some(p) => {
            info!("Using existing coverage file {}", p.display());
            p.to_owned()
        }
        None => {
            info!("Running DepthOfCoverage");
            depth::run_depth_of_coverage(cfg.doc())?
        }
    };

    info!(
        "Filtering {} for sites with > {}% of samples below {}x",
        coverage_file.display(),
        cfg.percent(),
        cfg.coverage()
    );
    let filtered = filter::filter_depth_file(&coverage_file, cfg.coverage(), f64::from(cfg.percent()))?;

    info!("Merging sites in {}", filtered.display());
    let bed = merge::merge_filtered_file(&filtered)?;
    info!("Intervals written to {}", bed.display());
    Ok(bed)
}
