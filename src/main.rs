use clap::{Parser, ValueEnum};
use cdxwrite::writer::{CdxOptions, CdxWriter, Tolerance, DEFAULT_FORMAT};
use cdxwrite::{DispatchMode, IdentityCanonicalizer, PrefixExclusion, UrlKey};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cdxwrite", about = "Generate CDX index lines from WARC/ARC web archives")]
struct Cli {
    /// Input archive (.warc, .arc, .warc.gz, .arc.gz, .warc.zst)
    input: PathBuf,

    /// Output CDX file (stdout when omitted)
    output: Option<PathBuf>,

    /// A space-separated list of field codes
    #[arg(long, default_value = DEFAULT_FORMAT)]
    format: String,

    /// Index every record, not just HTTP captures
    #[arg(long)]
    all_records: bool,

    /// Wayback screenshot-collection mode
    #[arg(long, conflicts_with = "all_records")]
    screenshot_mode: bool,

    /// Video metadata-collection mode
    #[arg(long, conflicts_with_all = ["all_records", "screenshot_mode"])]
    video_mode: bool,

    /// Use the input's full path in the file-name field
    #[arg(long)]
    use_full_path: bool,

    /// Path prefix for the file-name field (useful when the archive will be
    /// relocated after indexing)
    #[arg(long, conflicts_with = "use_full_path")]
    file_prefix: Option<String>,

    /// File containing URL prefixes to exclude
    #[arg(long)]
    exclude_list: Option<PathBuf>,

    /// Write a JSON statistics report here
    #[arg(long)]
    stats_file: Option<PathBuf>,

    /// Which errors to tolerate
    #[arg(long, value_enum, default_value_t = IgnoreErrors::Common)]
    ignore_error: IgnoreErrors,
}

#[derive(Clone, Copy, ValueEnum)]
enum IgnoreErrors {
    None,
    Common,
    All,
}

impl From<IgnoreErrors> for Tolerance {
    fn from(v: IgnoreErrors) -> Tolerance {
        match v {
            IgnoreErrors::None   => Tolerance::None,
            IgnoreErrors::Common => Tolerance::Common,
            IgnoreErrors::All    => Tolerance::All,
        }
    }
}

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("cdxwrite: {e}");
            1
        }
    });
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mode = if cli.all_records {
        DispatchMode::AllRecords
    } else if cli.screenshot_mode {
        DispatchMode::Screenshot
    } else if cli.video_mode {
        DispatchMode::Video
    } else {
        DispatchMode::Default
    };

    let basename = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.input.display().to_string());
    let warc_path = if cli.use_full_path {
        cli.input.canonicalize()?.display().to_string()
    } else if let Some(prefix) = &cli.file_prefix {
        PathBuf::from(prefix).join(&basename).display().to_string()
    } else {
        basename
    };

    let canon: Box<dyn UrlKey> = Box::new(IdentityCanonicalizer);

    let exclusion = match &cli.exclude_list {
        Some(path) => Some(Box::new(PrefixExclusion::from_file(path, canon.as_ref())?)
            as Box<dyn cdxwrite::Exclusion>),
        None => None,
    };

    let opts = CdxOptions {
        format: cli.format.clone(),
        mode,
        warc_path,
        tolerance: cli.ignore_error.into(),
        ..CdxOptions::default()
    };

    let mut writer = CdxWriter::new(opts, canon, exclusion)?;

    let result = match &cli.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            let r = writer.make_cdx(&cli.input, &mut out);
            out.flush()?;
            r
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            writer.make_cdx(&cli.input, &mut out)
        }
    };

    // The stats report is written even when the run aborts; counters are
    // accurate up to the point of failure.
    if let Some(path) = &cli.stats_file {
        let mut f = File::create(path)?;
        serde_json::to_writer_pretty(&mut f, writer.stats())?;
        f.write_all(b"\n")?;
    }

    result?;
    Ok(())
}
