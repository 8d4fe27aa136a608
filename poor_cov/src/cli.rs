use std::{num::NonZeroUsize, path::PathBuf};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_parser, Arg, ArgAction,
    ArgMatches, Command,
};

use anyhow::Context;

use utils::{init_log, LogLevel};

use crate::config::*;

/// Set up definition of command options for clap
fn cli_model() -> Command {
    Command::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("timestamp")
                .short('X')
                .long("timestamp")
                .value_parser(value_parser!(stderrlog::Timestamp))
                .value_name("GRANULARITY")
                .default_value("none")
                .help("Prepend log entries with a timestamp"),
        )
        .arg(
            Arg::new("loglevel")
                .short('l')
                .long("loglevel")
                .value_name("LOGLEVEL")
                .value_parser(value_parser!(LogLevel))
                .ignore_case(true)
                .default_value("warn")
                .help("Set log level"),
        )
        .arg(
            Arg::new("quiet")
                .action(ArgAction::SetTrue)
                .long("quiet")
                .conflicts_with("loglevel")
                .help("Silence all output"),
        )
        .arg(
            Arg::new("bam_files")
                .short('b')
                .long("bam-files")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required_unless_present("skip_doc")
                .help("File containing the list of BAM files to process (one per line)"),
        )
        .arg(
            Arg::new("intervals")
                .short('i')
                .long("intervals")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required_unless_present("skip_doc")
                .help("Intervals over which to calculate coverage"),
        )
        .arg(
            Arg::new("output_basename")
                .short('o')
                .long("output-basename")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .required_unless_present("skip_doc")
                .help("Base name for output files"),
        )
        .arg(
            Arg::new("reference")
                .short('r')
                .long("reference")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .required_unless_present("skip_doc")
                .help("Reference FASTA file (must have associated .dict)"),
        )
        .arg(
            Arg::new("coverage")
                .short('c')
                .long("coverage")
                .value_parser(value_parser!(u32))
                .value_name("INT")
                .default_value("20")
                .help("Cutoff for individual coverage"),
        )
        .arg(
            Arg::new("percent")
                .short('p')
                .long("percent")
                .value_parser(value_parser!(u32).range(0..=100))
                .value_name("INT")
                .default_value("90")
                .help("Only output sites where the percentage of samples with coverage below the cutoff is above this value"),
        )
        .arg(
            Arg::new("base_quality")
                .short('q')
                .long("base-quality")
                .value_parser(value_parser!(u8))
                .value_name("INT")
                .default_value("20")
                .help("Minimum base quality for coverage calculations (--minBaseQuality in DoC)"),
        )
        .arg(
            Arg::new("mapping_quality")
                .short('Q')
                .long("mapping-quality")
                .value_parser(value_parser!(u8))
                .value_name("INT")
                .default_value("20")
                .help("Minimum mapping quality for coverage calculations (--minMappingQuality in DoC)"),
        )
        .arg(
            Arg::new("memory")
                .short('m')
                .long("memory")
                .value_parser(value_parser!(String))
                .value_name("STRING")
                .default_value("18g")
                .help("Memory to allocate to java (number with suffix, as for the java -Xmx option)"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(NonZeroUsize))
                .value_name("INT")
                .default_value("1")
                .help("Set number of DepthOfCoverage threads"),
        )
        .arg(
            Arg::new("gatkjar")
                .short('g')
                .long("gatkjar")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .default_value("GenomeAnalysisTK.jar")
                .help(".jar file for the GenomeAnalysisToolkit"),
        )
        .arg(
            Arg::new("java")
                .short('j')
                .long("java")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .default_value("java")
                .help("Java executable"),
        )
        .arg(
            Arg::new("compressor")
                .long("compressor")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .default_value("gzip")
                .help("Compressor used with --fifo (must accept -c and read from stdin)"),
        )
        .arg(
            Arg::new("skip_doc")
                .short('s')
                .long("skip-doc")
                .value_parser(value_parser!(PathBuf))
                .value_name("PATH")
                .help("Skip running DepthOfCoverage, and use this file as input for the next steps"),
        )
        .arg(
            Arg::new("fifo")
                .short('f')
                .long("fifo")
                .action(ArgAction::SetTrue)
                .help("Use a FIFO to compress the DepthOfCoverage output as it is produced"),
        )
}

fn doc_params_from_matches(m: &ArgMatches) -> DocParams {
    let get_path = |s: &str| m.get_one::<PathBuf>(s).cloned().unwrap_or_default();

    let mut doc = DocParams::new(
        get_path("bam_files"),
        get_path("intervals"),
        get_path("reference"),
        m.get_one::<String>("output_basename")
            .cloned()
            .unwrap_or_default(),
    );

    if let Some(x) = m.get_one::<u32>("coverage") {
        doc.set_coverage(*x)
    }
    if let Some(x) = m.get_one::<u8>("base_quality") {
        doc.set_min_base_qual(*x)
    }
    if let Some(x) = m.get_one::<u8>("mapping_quality") {
        doc.set_min_mapq(*x)
    }
    if let Some(x) = m.get_one::<NonZeroUsize>("threads") {
        doc.set_threads(usize::from(*x))
    }
    if let Some(s) = m.get_one::<String>("memory") {
        doc.set_memory(s.clone())
    }
    if let Some(p) = m.get_one::<PathBuf>("java") {
        doc.set_java(p)
    }
    if let Some(p) = m.get_one::<PathBuf>("gatkjar") {
        doc.set_gatk_jar(p)
    }
    if let Some(p) = m.get_one::<PathBuf>("compressor") {
        doc.set_compressor(p)
    }
    doc.set_fifo(m.get_flag("fifo"));
    doc
}

fn config_from_matches(m: &ArgMatches) -> Config {
    let mut cfg = Config::new(doc_params_from_matches(m));

    if let Some(x) = m.get_one::<u32>("percent") {
        cfg.set_percent(*x)
    }
    if let Some(p) = m.get_one::<PathBuf>("skip_doc") {
        cfg.set_skip_doc(p)
    }
    cfg
}

/// Handle command line options.  Set up Config structure
pub fn handle_cli() -> anyhow::Result<Config> {
    // Get matches from command line
    let m = cli_model().get_matches();

    // Setup logging
    init_log(&m).with_context(|| "Could not initialize logging")?;

    debug!("Processing command line options");

    let cfg = config_from_matches(&m);

    if let Some(p) = cfg.skip_doc() {
        debug!("Skipping DepthOfCoverage, using {}", p.display());
    } else {
        debug!("DepthOfCoverage parameters: {:?}", cfg.doc());
    }

    Ok(cfg)
}
