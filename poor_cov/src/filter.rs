use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use utils::{get_next_line, is_blank};

/// Leading columns of a DepthOfCoverage per-base table
pub const DOC_HEADER: [&str; 3] = ["Locus", "Total_Depth", "Average_Depth_sample"];

/// Output name for the filtered table.  Any .gz suffix on the input is dropped
/// so that it does not end up in the middle of the new name
pub fn filtered_path(input: &Path, coverage: u32, percent: f64) -> PathBuf {
    let s = input.to_string_lossy();
    let stem = s.strip_suffix(".gz").unwrap_or(&s);
    PathBuf::from(format!(
        "{}.DoC.c{}.p{}.txt",
        stem,
        coverage,
        percent.trunc() as i64
    ))
}

/// Count of samples strictly below the cutoff and that count as a percentage
/// of all samples
fn below_threshold(depths: &[&str], cutoff: u32, line: usize) -> anyhow::Result<(usize, f64)> {
    let mut n = 0;
    for s in depths {
        let d = s
            .parse::<i64>()
            .with_context(|| format!("line {}: Error reading sample depth '{}'", line, s))?;
        if d < cutoff as i64 {
            n += 1
        }
    }
    Ok((n, 100.0 * (n as f64) / (depths.len() as f64)))
}

/// Check the DepthOfCoverage header, returning the number of samples
fn check_header(fields: &[&str]) -> anyhow::Result<usize> {
    if fields.len() < 3 || fields[..3] != DOC_HEADER {
        Err(anyhow!(
            "Header is not what I expected:\n\t{}",
            fields.join("\t")
        ))
    } else if fields.len() == 3 {
        Err(anyhow!("Header has no sample columns"))
    } else {
        Ok(fields.len() - 3)
    }
}

/// Copy rows from a DepthOfCoverage table to `wrt`, keeping sites where the
/// percentage of samples with depth below `cutoff` is strictly greater than
/// `percent`.  Returns (rows read, rows kept)
pub fn filter_depth<R: BufRead, W: Write>(
    rdr: &mut R,
    wrt: &mut W,
    cutoff: u32,
    percent: f64,
) -> anyhow::Result<(usize, usize)> {
    let mut buf = String::new();

    let n_samples = match get_next_line(rdr, &mut buf).with_context(|| "Error reading header")? {
        Some(fields) => {
            let n = check_header(&fields)?;
            writeln!(
                wrt,
                "Chrom\tPosition\t{}\tN_below_threshold\tPct_below_threshold",
                fields[1..].join("\t")
            )?;
            n
        }
        None => return Err(anyhow!("Empty input; no header found")),
    };
    trace!("Header found with {} samples", n_samples);

    let mut line = 1;
    let (mut n_read, mut n_kept) = (0, 0);
    while let Some(fields) = get_next_line(rdr, &mut buf)
        .with_context(|| format!("Error after reading {} lines", line))?
    {
        line += 1;
        if is_blank(&fields) {
            continue;
        }
        if fields.len() != n_samples + 3 {
            return Err(anyhow!(
                "line {}: Expected {} columns ({} samples), found {}",
                line,
                n_samples + 3,
                n_samples,
                fields.len()
            ));
        }
        n_read += 1;
        let (chrom, pos) = fields[0]
            .split_once(':')
            .ok_or_else(|| anyhow!("line {}: Locus '{}' is not chrom:pos", line, fields[0]))?;
        let (count, pct) = below_threshold(&fields[3..], cutoff, line)?;
        if pct > percent {
            n_kept += 1;
            writeln!(
                wrt,
                "{}\t{}\t{}\t{}\t{:.2}",
                chrom,
                pos,
                fields[1..].join("\t"),
                count,
                pct
            )?;
        }
    }
    Ok((n_read, n_kept))
}

/// Filter the DepthOfCoverage output file (optionally compressed), returning the
/// path to the filtered table
pub fn filter_depth_file<P: AsRef<Path>>(
    input: P,
    cutoff: u32,
    percent: f64,
) -> anyhow::Result<PathBuf> {
    let input = input.as_ref();
    let output = filtered_path(input, cutoff, percent);
    debug!(
        "Filtering {} (coverage < {}, percent > {}) to {}",
        input.display(),
        cutoff,
        percent,
        output.display()
    );

    let mut rdr = CompressIo::new()
        .path(input)
        .bufreader()
        .with_context(|| format!("Could not open {} for input", input.display()))?;
    let mut wrt = CompressIo::new()
        .path(&output)
        .bufwriter()
        .with_context(|| format!("Could not open {} for output", output.display()))?;

    let (n_read, n_kept) = filter_depth(&mut rdr, &mut wrt, cutoff, percent)
        .with_context(|| format!("Error filtering {}", input.display()))?;
    wrt.flush()
        .with_context(|| format!("Error writing to {}", output.display()))?;

    debug!("Read {} sites, kept {}", n_read, n_kept);
    Ok(output)
}
