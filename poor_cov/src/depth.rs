use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};

use anyhow::Context;
use nix::{fcntl::OFlag, sys::stat::Mode, unistd::mkfifo};

use crate::config::DocParams;

/// Arguments for a GATK DepthOfCoverage run writing to `target`
pub fn doc_args(p: &DocParams, target: &Path) -> Vec<OsString> {
    vec![
        format!("-Xmx{}", p.memory()).into(),
        "-jar".into(),
        p.gatk_jar().into(),
        "-T".into(),
        "DepthOfCoverage".into(),
        "-R".into(),
        p.reference().into(),
        "-I".into(),
        p.bam_list().into(),
        "-L".into(),
        p.intervals().into(),
        "-ct".into(),
        p.coverage().to_string().into(),
        "-omitIntervals".into(),
        "--minBaseQuality".into(),
        p.min_base_qual().to_string().into(),
        "--minMappingQuality".into(),
        p.min_mapq().to_string().into(),
        "-nt".into(),
        p.threads().to_string().into(),
        "-o".into(),
        target.into(),
    ]
}

pub fn compressed_path(p: &Path) -> PathBuf {
    let mut s = p.as_os_str().to_owned();
    s.push(".gz");
    PathBuf::from(s)
}

/// Named pipe that is removed when dropped
struct Fifo {
    path: PathBuf,
}

impl Fifo {
    fn create(path: &Path) -> anyhow::Result<Self> {
        debug!("Creating FIFO {}", path.display());
        mkfifo(path, Mode::from_bits_truncate(0o666))
            .with_context(|| format!("Could not create FIFO {}", path.display()))?;
        Ok(Self {
            path: path.to_owned(),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Open and immediately close the write end.  A reader still blocked
    /// in open(2) (i.e., the writer never opened the FIFO) will then see EOF.
    /// With no reader attached the non-blocking open fails, which is fine
    fn release_reader(&self) {
        match OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)
        {
            Ok(_) => trace!("Released reader of {}", self.path.display()),
            Err(e) => trace!("No reader waiting on {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        debug!("Removing FIFO {}", self.path.display());
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Could not remove FIFO {}: {}", self.path.display(), e)
        }
    }
}

/// Start `<compressor> -c < fifo > output`.  The redirections are done by sh
/// so that the blocking open of the FIFO happens in the child
fn spawn_compressor(compressor: &Path, fifo: &Path, output: &Path) -> anyhow::Result<Child> {
    debug!(
        "Starting {} to compress {} to {}",
        compressor.display(),
        fifo.display(),
        output.display()
    );
    Command::new("sh")
        .arg("-c")
        .arg(r#"exec "$0" -c < "$1" > "$2""#)
        .arg(compressor)
        .arg(fifo)
        .arg(output)
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("Could not start compressor {}", compressor.display()))
}

fn check_alive(child: &mut Child) -> anyhow::Result<()> {
    match child
        .try_wait()
        .with_context(|| "Error checking compressor process")?
    {
        Some(status) => Err(anyhow!(
            "Compressor process exited before DepthOfCoverage with {}",
            status
        )),
        None => Ok(()),
    }
}

/// Wait for the compressor to finish once DepthOfCoverage has exited.
/// If DepthOfCoverage never opened the FIFO the compressor is still blocked
/// opening it, so keep releasing the read side until the compressor exits
fn wait_compressor(fifo: &Fifo, child: &mut Child) -> anyhow::Result<ExitStatus> {
    loop {
        fifo.release_reader();
        if let Some(status) = child
            .try_wait()
            .with_context(|| "Error waiting for compressor")?
        {
            debug!("Compressor finished");
            return Ok(status);
        }
        thread::sleep(Duration::from_millis(50))
    }
}

/// Copy lines from `rdr` to both `out` and `log`, flushing after every line.
/// `check` is called after each line is read and before it is written;
/// an error from it stops the copy
fn tee_lines<R, W1, W2, F>(
    rdr: &mut R,
    out: &mut W1,
    log: &mut W2,
    mut check: F,
) -> anyhow::Result<usize>
where
    R: BufRead,
    W1: Write,
    W2: Write,
    F: FnMut() -> anyhow::Result<()>,
{
    let mut buf = Vec::new();
    let mut n = 0;
    loop {
        buf.clear();
        if rdr
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Error reading DepthOfCoverage output after {} lines", n))?
            == 0
        {
            break;
        }
        check()?;
        out.write_all(&buf)
            .with_context(|| "Error writing to stdout")?;
        out.flush().with_context(|| "Error writing to stdout")?;
        log.write_all(&buf).with_context(|| "Error writing to log file")?;
        log.flush().with_context(|| "Error writing to log file")?;
        n += 1;
    }
    Ok(n)
}

/// Run DepthOfCoverage, copying its combined stdout/stderr to our stdout and `log`.
/// The exit status of DepthOfCoverage is reported but not checked
fn run_doc<W, F>(p: &DocParams, target: &Path, log: &mut W, check: F) -> anyhow::Result<()>
where
    W: Write,
    F: FnMut() -> anyhow::Result<()>,
{
    let args = doc_args(p, target);
    info!(
        "Running {} {}",
        p.java().display(),
        args.iter()
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let (rdr, wrt) = io::pipe().with_context(|| "Could not create pipe")?;
    let wrt_err = wrt.try_clone().with_context(|| "Could not create pipe")?;

    // The Command holds our copies of the pipe write end, so it must be
    // dropped before reading or we never see EOF
    let mut child = Command::new(p.java())
        .args(&args)
        .stdin(Stdio::null())
        .stdout(wrt)
        .stderr(wrt_err)
        .spawn()
        .with_context(|| format!("Could not start {}", p.java().display()))?;

    let mut rdr = BufReader::new(rdr);
    let stdout = io::stdout();
    match tee_lines(&mut rdr, &mut stdout.lock(), log, check) {
        Ok(n) => {
            let status = child
                .wait()
                .with_context(|| "Error waiting for DepthOfCoverage")?;
            if status.success() {
                debug!("DepthOfCoverage finished after {} lines of output", n)
            } else {
                warn!("DepthOfCoverage exited with {}", status)
            }
            Ok(())
        }
        Err(e) => {
            error!("Stopping DepthOfCoverage");
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

/// Run DepthOfCoverage, returning the path to its (possibly compressed) output.
///
/// With the fifo option set the output path is a named pipe read by a compressor
/// writing `<output>.gz`.  The compressor must outlive DepthOfCoverage; it is
/// checked each time a line of DepthOfCoverage output is read, and if it has
/// gone we stop with an error.  The pipe is removed on all exit paths
pub fn run_depth_of_coverage(p: &DocParams) -> anyhow::Result<PathBuf> {
    let target = p.coverage_path();
    let log_path = p.log_path();
    let mut log = BufWriter::new(
        File::create(&log_path)
            .with_context(|| format!("Could not create log file {}", log_path.display()))?,
    );

    if !p.fifo() {
        run_doc(p, &target, &mut log, || Ok(()))?;
        return Ok(target);
    }

    let gz = compressed_path(&target);
    let fifo = Fifo::create(&target)?;
    let mut compressor = spawn_compressor(p.compressor(), fifo.path(), &gz)?;

    if let Err(e) = run_doc(p, &target, &mut log, || check_alive(&mut compressor)) {
        let _ = compressor.kill();
        let _ = compressor.wait();
        return Err(e);
    }

    let status = wait_compressor(&fifo, &mut compressor)?;
    if !status.success() {
        warn!("Compressor exited with {}", status)
    }
    drop(fifo);
    Ok(gz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Cursor, os::unix::fs::PermissionsExt};

    fn params(dir: &Path, java: &Path, fifo: bool) -> DocParams {
        let base = dir.join("run").to_string_lossy().into_owned();
        let mut p = DocParams::new(
            PathBuf::from("bams.list"),
            PathBuf::from("targets.bed"),
            PathBuf::from("ref.fa"),
            base,
        );
        p.set_java(java);
        p.set_fifo(fifo);
        p
    }

    // Stand in for java: echoes to stdout and stderr and writes a small
    // table to the path following -o (the last argument)
    fn fake_java(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake_java.sh");
        let script = format!(
            "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\n{}\n",
            body
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const TABLE: &str = "printf 'Locus\\tTotal_Depth\\tAverage_Depth_sample\\tS1\\nchr1:1\\t5\\t5.00\\t5\\n' > \"$out\"";

    #[test]
    fn gatk_arguments() {
        let mut p = DocParams::new(
            PathBuf::from("bams.list"),
            PathBuf::from("targets.bed"),
            PathBuf::from("ref.fa"),
            "run".to_string(),
        );
        p.set_threads(4);
        p.set_min_mapq(30);
        let args: Vec<_> = doc_args(&p, Path::new("run.coverage"))
            .into_iter()
            .map(|s| s.into_string().unwrap())
            .collect();
        let expected = [
            "-Xmx18g",
            "-jar",
            "GenomeAnalysisTK.jar",
            "-T",
            "DepthOfCoverage",
            "-R",
            "ref.fa",
            "-I",
            "bams.list",
            "-L",
            "targets.bed",
            "-ct",
            "20",
            "-omitIntervals",
            "--minBaseQuality",
            "20",
            "--minMappingQuality",
            "30",
            "-nt",
            "4",
            "-o",
            "run.coverage",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn tee_copies_every_line() {
        let mut rdr = Cursor::new("one\ntwo\nthree");
        let (mut out, mut log) = (Vec::new(), Vec::new());
        let n = tee_lines(&mut rdr, &mut out, &mut log, || Ok(())).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, b"one\ntwo\nthree");
        assert_eq!(log, out);
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tee_reports_stdout_errors() {
        let mut rdr = Cursor::new("one\n");
        let mut log = Vec::new();
        let err = tee_lines(&mut rdr, &mut Broken, &mut log, || Ok(())).unwrap_err();
        assert!(err.to_string().contains("Error writing to stdout"));
        assert!(log.is_empty());
    }

    #[test]
    fn tee_stops_on_failed_check() {
        let mut rdr = Cursor::new("one\ntwo\nthree\n");
        let (mut out, mut log) = (Vec::new(), Vec::new());
        let mut calls = 0;
        let res = tee_lines(&mut rdr, &mut out, &mut log, || {
            calls += 1;
            if calls > 1 {
                Err(anyhow!("gone"))
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
        assert_eq!(log, b"one\n");
    }

    #[test]
    fn run_without_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let java = fake_java(
            dir.path(),
            &format!("echo starting\necho warning >&2\n{}\nexit 3", TABLE),
        );
        let p = params(dir.path(), &java, false);
        let out = run_depth_of_coverage(&p).unwrap();
        assert_eq!(out, dir.path().join("run.coverage"));
        assert!(fs::read_to_string(&out).unwrap().starts_with("Locus\t"));
        let log = fs::read_to_string(dir.path().join("run.coverage.log")).unwrap();
        assert!(log.contains("starting\n"));
        assert!(log.contains("warning\n"));
    }

    #[test]
    fn run_with_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let java = fake_java(dir.path(), &format!("echo starting\n{}\necho done", TABLE));
        let p = params(dir.path(), &java, true);
        let out = run_depth_of_coverage(&p).unwrap();
        assert_eq!(out, dir.path().join("run.coverage.gz"));
        assert!(!dir.path().join("run.coverage").exists());
        let unzipped = Command::new("gzip").arg("-dc").arg(&out).output().unwrap();
        assert!(String::from_utf8(unzipped.stdout)
            .unwrap()
            .starts_with("Locus\tTotal_Depth"));
        let log = fs::read_to_string(dir.path().join("run.coverage.log")).unwrap();
        assert_eq!(log, "starting\ndone\n");
    }

    #[test]
    fn fifo_never_opened() {
        let dir = tempfile::tempdir().unwrap();
        let java = fake_java(dir.path(), "echo failed to start >&2\nexit 1");
        let p = params(dir.path(), &java, true);
        let out = run_depth_of_coverage(&p).unwrap();
        assert!(out.exists());
        assert!(!dir.path().join("run.coverage").exists());
    }

    #[test]
    fn compressor_dies_early() {
        let dir = tempfile::tempdir().unwrap();
        let java = fake_java(
            dir.path(),
            "(printf 'x\\n' > \"$out\") 2>/dev/null\nsleep 1\necho one\necho two",
        );
        let mut p = params(dir.path(), &java, true);
        p.set_compressor("false");
        let err = run_depth_of_coverage(&p).unwrap_err();
        assert!(err.to_string().contains("Compressor process exited"));
        assert!(!dir.path().join("run.coverage").exists());
    }
}
