use std::{
    fmt,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use compress_io::compress::CompressIo;
use utils::{get_next_line, is_blank};

pub const BED_HEADER: &str = "#CHROM\tSTART\tEND\tAVG_COV\tAVG_%_BELOW_THRESH";

/// Interval
///
/// A run of contiguous filtered sites on one contig.
/// start is 0-based, end is the 1-based position of the last site, so
/// end - start is the number of sites and is never zero.
/// The depth and percent values are sums over the sites and are only
/// averaged on output
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    chrom: String,
    start: usize,
    end: usize,
    total_avg_depth: f64,
    total_pct: f64,
}

impl Interval {
    fn new(site: Site<'_>) -> Self {
        Self {
            chrom: site.chrom.to_owned(),
            start: site.pos - 1,
            end: site.pos,
            total_avg_depth: site.avg_depth,
            total_pct: site.pct_below,
        }
    }

    /// Add site to interval if it is on the same contig and directly follows
    /// the current end.  Returns false (and leaves self unchanged) otherwise
    fn extend(&mut self, site: &Site<'_>) -> bool {
        if site.chrom == self.chrom && self.end.checked_add(1) == Some(site.pos) {
            self.end = site.pos;
            self.total_avg_depth += site.avg_depth;
            self.total_pct += site.pct_below;
            true
        } else {
            false
        }
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn avg_depth(&self) -> f64 {
        self.total_avg_depth / self.len() as f64
    }

    pub fn avg_pct(&self) -> f64 {
        self.total_pct / self.len() as f64
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{:.2}\t{:.2}",
            self.chrom(),
            self.start(),
            self.end(),
            self.avg_depth(),
            self.avg_pct()
        )
    }
}

/// Fields used from one row of the filtered table
#[derive(Debug)]
struct Site<'a> {
    chrom: &'a str,
    pos: usize,
    avg_depth: f64,
    pct_below: f64,
}

fn parse_site<'a>(fields: &[&'a str], line: usize) -> anyhow::Result<Site<'a>> {
    if fields.len() < 5 {
        return Err(anyhow!(
            "line {}: Expected at least 5 columns, found {}",
            line,
            fields.len()
        ));
    }
    let pos = fields[1]
        .parse::<usize>()
        .with_context(|| format!("line {}: Error reading position", line))?;
    if pos == 0 {
        return Err(anyhow!("line {}: Positions are 1-based; found 0", line));
    }
    let avg_depth = fields[3]
        .parse::<f64>()
        .with_context(|| format!("line {}: Error reading average depth", line))?;
    let pct_below = fields[fields.len() - 1]
        .parse::<f64>()
        .with_context(|| format!("line {}: Error reading percent below threshold", line))?;
    Ok(Site {
        chrom: fields[0],
        pos,
        avg_depth,
        pct_below,
    })
}

/// Any line starting with "Chrom\tPosition" is a header
fn is_header(fields: &[&str]) -> bool {
    fields.len() >= 2 && fields[0] == "Chrom" && fields[1].starts_with("Position")
}

/// Merge contiguous sites from a filtered table read from `rdr`, writing
/// one line per interval to `wrt`.  Returns the number of intervals written
pub fn merge_sites<R: BufRead, W: Write>(rdr: &mut R, wrt: &mut W) -> anyhow::Result<usize> {
    writeln!(wrt, "{}", BED_HEADER)?;

    let mut buf = String::new();
    let mut line = 0;
    let mut n_int = 0;
    let mut current: Option<Interval> = None;

    while let Some(fields) = get_next_line(rdr, &mut buf)
        .with_context(|| format!("Error after reading {} lines", line))?
    {
        line += 1;
        if is_blank(&fields) || is_header(&fields) {
            continue;
        }
        let site = parse_site(&fields, line)?;
        let extended = current.as_mut().is_some_and(|iv| iv.extend(&site));
        if !extended {
            // Close off the previous interval (if any) and start a new one
            if let Some(iv) = current.replace(Interval::new(site)) {
                writeln!(wrt, "{}", iv)?;
                n_int += 1;
            }
        }
    }

    if let Some(iv) = current {
        writeln!(wrt, "{}", iv)?;
        n_int += 1;
    }
    Ok(n_int)
}

/// Merge the filtered table at `input` into intervals, written to `<input>.bed`.
/// Returns the output path
pub fn merge_filtered_file<P: AsRef<Path>>(input: P) -> anyhow::Result<PathBuf> {
    let input = input.as_ref();
    let mut output = input.as_os_str().to_owned();
    output.push(".bed");
    let output = PathBuf::from(output);

    debug!(
        "Merging sites from {} into intervals in {}",
        input.display(),
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

    let n = merge_sites(&mut rdr, &mut wrt)
        .with_context(|| format!("Error merging sites from {}", input.display()))?;
    wrt.flush()
        .with_context(|| format!("Error writing to {}", output.display()))?;

    debug!("Wrote {} intervals", n);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HDR: &str = "Chrom\tPosition\tTotal_Depth\tAverage_Depth_sample\tS1\tS2\tN_below_threshold\tPct_below_threshold\n";

    fn row(chrom: &str, pos: usize, avg: f64, pct: f64) -> String {
        format!("{}\t{}\t0\t{}\t0\t0\t2\t{:.2}\n", chrom, pos, avg, pct)
    }

    fn run(input: &str) -> Vec<String> {
        let mut rdr = Cursor::new(input);
        let mut out = Vec::new();
        merge_sites(&mut rdr, &mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        let mut it = s.lines();
        assert_eq!(it.next(), Some(BED_HEADER));
        it.map(|l| l.to_owned()).collect()
    }

    #[test]
    fn single_site() {
        let out = run(&format!("{}{}", HDR, row("chr1", 10, 20.0, 50.0)));
        assert_eq!(out, vec!["chr1\t9\t10\t20.00\t50.00"]);
    }

    #[test]
    fn gap_splits_interval() {
        let input = format!(
            "{}{}{}{}",
            HDR,
            row("chr1", 100, 10.0, 100.0),
            row("chr1", 101, 20.0, 50.0),
            row("chr1", 105, 5.0, 100.0)
        );
        let out = run(&input);
        assert_eq!(
            out,
            vec!["chr1\t99\t101\t15.00\t75.00", "chr1\t104\t105\t5.00\t100.00"]
        );
    }

    #[test]
    fn contig_change_splits_interval() {
        let input = format!("{}{}{}", HDR, row("chr1", 50, 1.0, 100.0), row("chr2", 51, 2.0, 100.0));
        let out = run(&input);
        assert_eq!(
            out,
            vec!["chr1\t49\t50\t1.00\t100.00", "chr2\t50\t51\t2.00\t100.00"]
        );
    }

    #[test]
    fn constant_runs_keep_values() {
        let mut input = HDR.to_string();
        for p in 1..=5 {
            input.push_str(&row("chrX", p, 7.25, 66.67));
        }
        for p in 20..=22 {
            input.push_str(&row("chrX", p, 3.5, 100.0));
        }
        let out = run(&input);
        assert_eq!(
            out,
            vec!["chrX\t0\t5\t7.25\t66.67", "chrX\t19\t22\t3.50\t100.00"]
        );
    }

    #[test]
    fn headers_skipped_anywhere() {
        let input = format!(
            "{}{}{}{}",
            HDR,
            row("chr1", 1, 1.0, 100.0),
            HDR,
            row("chr1", 2, 3.0, 100.0)
        );
        assert_eq!(run(&input), vec!["chr1\t0\t2\t2.00\t100.00"]);
    }

    #[test]
    fn header_prefix_skipped() {
        assert!(run("Chrom\tPositionX\tfoo\n").is_empty());
        let input = format!("Chrom\tPosition_1\n{}", row("chr1", 3, 2.0, 100.0));
        assert_eq!(run(&input), vec!["chr1\t2\t3\t2.00\t100.00"]);
    }

    #[test]
    fn max_position_does_not_overflow() {
        let input = format!(
            "{}{}{}",
            HDR,
            row("chr1", usize::MAX, 1.0, 100.0),
            row("chr1", 5, 2.0, 100.0)
        );
        let out = run(&input);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], "chr1\t4\t5\t2.00\t100.00");
    }

    #[test]
    fn empty_input() {
        assert!(run(HDR).is_empty());
        assert!(run("").is_empty());
    }

    #[test]
    fn bad_rows() {
        let mut out = Vec::new();
        let input = format!("{}chr1\t0\t1\t1.0\t100.00\n", HDR);
        assert!(merge_sites(&mut Cursor::new(input), &mut out).is_err());
        let input = format!("{}chr1\t10\t1\n", HDR);
        assert!(merge_sites(&mut Cursor::new(input), &mut out).is_err());
        let input = format!("{}chr1\tten\t1\t1.0\t100.00\n", HDR);
        assert!(merge_sites(&mut Cursor::new(input), &mut out).is_err());
    }

    #[test]
    fn interval_len_never_zero() {
        let site = Site {
            chrom: "chr1",
            pos: 1,
            avg_depth: 4.0,
            pct_below: 100.0,
        };
        let iv = Interval::new(site);
        assert_eq!((iv.start(), iv.end(), iv.len()), (0, 1, 1));
        assert_eq!(iv.chrom(), "chr1");
        assert_eq!(iv.avg_depth(), 4.0);
    }

    #[test]
    fn merge_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("s.coverage.DoC.c20.p0.txt");
        std::fs::write(&input, format!("{}{}", HDR, row("chr1", 10, 20.0, 50.0))).unwrap();
        let out = merge_filtered_file(&input).unwrap();
        assert_eq!(out, dir.path().join("s.coverage.DoC.c20.p0.txt.bed"));
        assert_eq!(
            std::fs::read_to_string(out).unwrap(),
            format!("{}\nchr1\t9\t10\t20.00\t50.00\n", BED_HEADER)
        );
    }
}
