use std::path::{Path, PathBuf};

/// DocParams
///
/// Everything needed to run GATK DepthOfCoverage
///
/// bam_list - file with list of BAM files (one per line)
/// intervals - intervals over which coverage is calculated
/// reference - reference FASTA (with associated .dict)
/// output_basename - base name for the coverage output and log
/// coverage - coverage cutoff passed with -ct
/// min_base_qual, min_mapq - quality thresholds
/// threads - passed with -nt
/// memory - JVM heap size (as for -Xmx)
/// java, gatk_jar - executables
/// compressor - stream compressor used with a FIFO (reads stdin, writes stdout)
/// fifo - compress the coverage output as it is produced
///
#[derive(Debug, Clone)]
pub struct DocParams {
    bam_list: PathBuf,
    intervals: PathBuf,
    reference: PathBuf,
    output_basename: String,
    coverage: u32,
    min_base_qual: u8,
    min_mapq: u8,
    threads: usize,
    memory: String,
    java: PathBuf,
    gatk_jar: PathBuf,
    compressor: PathBuf,
    fifo: bool,
}

impl DocParams {
    pub fn new(
        bam_list: PathBuf,
        intervals: PathBuf,
        reference: PathBuf,
        output_basename: String,
    ) -> Self {
        Self {
            bam_list,
            intervals,
            reference,
            output_basename,
            coverage: 20,
            min_base_qual: 20,
            min_mapq: 20,
            threads: 1,
            memory: "18g".to_string(),
            java: PathBuf::from("java"),
            gatk_jar: PathBuf::from("GenomeAnalysisTK.jar"),
            compressor: PathBuf::from("gzip"),
            fifo: false,
        }
    }

    pub fn set_coverage(&mut self, x: u32) {
        self.coverage = x
    }

    pub fn set_min_base_qual(&mut self, x: u8) {
        self.min_base_qual = x
    }

    pub fn set_min_mapq(&mut self, x: u8) {
        self.min_mapq = x
    }

    pub fn set_threads(&mut self, x: usize) {
        self.threads = x
    }

    pub fn set_memory(&mut self, s: String) {
        self.memory = s
    }

    pub fn set_java<P: AsRef<Path>>(&mut self, p: P) {
        self.java = p.as_ref().to_owned()
    }

    pub fn set_gatk_jar<P: AsRef<Path>>(&mut self, p: P) {
        self.gatk_jar = p.as_ref().to_owned()
    }

    pub fn set_compressor<P: AsRef<Path>>(&mut self, p: P) {
        self.compressor = p.as_ref().to_owned()
    }

    pub fn set_fifo(&mut self, x: bool) {
        self.fifo = x
    }

    pub fn bam_list(&self) -> &Path {
        &self.bam_list
    }

    pub fn intervals(&self) -> &Path {
        &self.intervals
    }

    pub fn reference(&self) -> &Path {
        &self.reference
    }

    pub fn output_basename(&self) -> &str {
        &self.output_basename
    }

    pub fn coverage(&self) -> u32 {
        self.coverage
    }

    pub fn min_base_qual(&self) -> u8 {
        self.min_base_qual
    }

    pub fn min_mapq(&self) -> u8 {
        self.min_mapq
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn memory(&self) -> &str {
        &self.memory
    }

    pub fn java(&self) -> &Path {
        &self.java
    }

    pub fn gatk_jar(&self) -> &Path {
        &self.gatk_jar
    }

    pub fn compressor(&self) -> &Path {
        &self.compressor
    }

    pub fn fifo(&self) -> bool {
        self.fifo
    }

    /// Path DepthOfCoverage writes to (the FIFO when streaming)
    pub fn coverage_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.coverage", self.output_basename()))
    }

    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.coverage.log", self.output_basename()))
    }
}

/// Config
///
/// Configuration info for the program
/// This is generated from the command line arguments
/// Once set it is read only
///
pub struct Config {
    doc: DocParams,
    percent: u32,
    skip_doc: Option<PathBuf>,
}

impl Config {
    pub fn new(doc: DocParams) -> Self {
        Self {
            doc,
            percent: 90,
            skip_doc: None,
        }
    }

    pub fn set_percent(&mut self, x: u32) {
        self.percent = x
    }

    pub fn set_skip_doc<P: AsRef<Path>>(&mut self, p: P) {
        self.skip_doc = Some(p.as_ref().to_owned())
    }

    pub fn doc(&self) -> &DocParams {
        &self.doc
    }

    /// Individual coverage cutoff (shared by DepthOfCoverage and the filter)
    pub fn coverage(&self) -> u32 {
        self.doc.coverage()
    }

    pub fn percent(&self) -> u32 {
        self.percent
    }

    pub fn skip_doc(&self) -> Option<&Path> {
        self.skip_doc.as_deref()
    }
}
