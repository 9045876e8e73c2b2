use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use rusty_telluric::data::{export, loader};
use rusty_telluric::identifiers::select_hd_identifier;
use rusty_telluric::reference::{
    archive_url, prepare_reference, ReferenceIndex, ResolutionClass,
};
use rusty_telluric::{
    correct_spectrum, CorrectionConfig, CorrectionMode, TelluricCatalog, BALMER_LINES,
};

#[derive(Parser, Debug)]
#[command(
    name = "rusty-telluric",
    about = "Baseline and telluric line correction for 1D spectra",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove telluric lines from one or more spectra
    Correct {
        /// Input spectra (.fits, .fit, .fts, .csv, .json)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// JSON file with configuration overrides
        #[arg(long)]
        config: Option<PathBuf>,

        /// How each line is removed
        #[arg(long, value_enum)]
        mode: Option<CorrectionMode>,

        /// Half-width of each line window, in Å
        #[arg(long)]
        halfwidth: Option<f64>,

        /// Baseline roughness penalty
        #[arg(long)]
        smoothness: Option<f64>,

        /// Baseline asymmetry, in (0, 1)
        #[arg(long)]
        asymmetry: Option<f64>,

        /// Directory for `<name>_corrected.csv` outputs (defaults to the input's directory)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Print the header and observation summary of a spectrum
    Header {
        file: PathBuf,
    },

    /// Smooth and normalize a reference spectrum for overlay
    Reference {
        /// Two-column CSV/JSON reference spectrum
        file: PathBuf,

        /// Resolving power of the observation to compare against
        #[arg(long)]
        resolution: i64,

        /// Output CSV
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Find the reference library entry for an object's identifiers
    Locate {
        /// CSV export of the library table (Name1, ID columns)
        #[arg(long)]
        index: PathBuf,

        /// Identifiers returned by the object-id service
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    match args.command {
        Command::Correct {
            files,
            config,
            mode,
            halfwidth,
            smoothness,
            asymmetry,
            output_dir,
        } => {
            let mut cfg = match config {
                Some(path) => CorrectionConfig::from_json_path(&path)?,
                None => CorrectionConfig::default(),
            };
            if let Some(mode) = mode {
                cfg.mode = mode;
            }
            if halfwidth.is_some() {
                cfg.halfwidth = halfwidth;
            }
            if let Some(v) = smoothness {
                cfg.smoothness = v;
            }
            if let Some(v) = asymmetry {
                cfg.asymmetry = v;
            }
            run_correct(&files, &cfg, output_dir.as_deref())
        }
        Command::Header { file } => run_header(&file),
        Command::Reference {
            file,
            resolution,
            output,
        } => run_reference(&file, resolution, &output),
        Command::Locate { index, ids } => run_locate(&index, &ids),
    }
}

fn run_correct(
    files: &[PathBuf],
    config: &CorrectionConfig,
    output_dir: Option<&Path>,
) -> Result<()> {
    let mut failed = 0usize;
    for file in files {
        if let Err(e) = correct_file(file, config, output_dir) {
            log::error!("{}: {e:#}", file.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} spectra could not be corrected", files.len());
    }
    Ok(())
}

fn correct_file(
    file: &Path,
    config: &CorrectionConfig,
    output_dir: Option<&Path>,
) -> Result<()> {
    let loaded = loader::load_file(file)?;
    let output = correct_spectrum(&loaded.spectrum, config)?;

    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .context("input file has no name")?;
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| file.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let out_path = dir.join(format!("{stem}_corrected.csv"));

    export::write_corrected_csv(
        &out_path,
        &output.wavelength,
        &loaded.spectrum.intensity,
        &output.corrected,
        &output.baseline,
    )?;

    let title = loaded.info().title();
    println!(
        "{}{}: {} → {}",
        file.display(),
        if title.is_empty() {
            String::new()
        } else {
            format!(" ({title})")
        },
        output.report,
        out_path.display()
    );
    for error in output.report.failures() {
        println!("  skipped: {error}");
    }
    Ok(())
}

fn run_header(file: &Path) -> Result<()> {
    let loaded = loader::load_file(file)?;
    let info = loaded.info();

    println!("{}", info.title());
    println!(
        "{} samples, {:.3}–{:.3} Å",
        loaded.spectrum.len(),
        loaded.spectrum.wavelength.first().copied().unwrap_or(f64::NAN),
        loaded.spectrum.wavelength.last().copied().unwrap_or(f64::NAN)
    );
    if let Some(r) = info.resolution {
        println!("resolution: {r} ({})", ResolutionClass::from_resolution(r));
    }
    if let (Some(&start), Some(&end)) = (
        loaded.spectrum.wavelength.first(),
        loaded.spectrum.wavelength.last(),
    ) {
        let balmer: Vec<String> = BALMER_LINES
            .iter()
            .filter(|&&l| l >= start && l <= end)
            .map(|l| format!("{l:.0}"))
            .collect();
        let telluric = TelluricCatalog::default().within(start, end).count();
        println!(
            "markers in range: Balmer [{}], {telluric} telluric lines",
            balmer.join(", ")
        );
    }
    for (key, value) in &loaded.header.cards {
        println!("{key:<8} = {value}");
    }
    Ok(())
}

fn run_reference(file: &Path, resolution: i64, output: &Path) -> Result<()> {
    let loaded = loader::load_file(file)?;
    let class = ResolutionClass::from_resolution(resolution);
    let reference = prepare_reference(
        &loaded.spectrum.wavelength,
        &loaded.spectrum.intensity,
        class,
    )?;
    export::write_spectrum_csv(output, &reference.wavelength, &reference.flux)?;
    println!("{class} reference written to {}", output.display());
    Ok(())
}

fn run_locate(index: &Path, ids: &[String]) -> Result<()> {
    let hd = select_hd_identifier(ids).context("no HD identifier among the given ids")?;
    let index = ReferenceIndex::from_csv_path(index)?;
    let id = index
        .lookup(&hd)
        .with_context(|| format!("{hd} is not in the reference library"))?;
    println!("{hd}: {}", archive_url(id));
    Ok(())
}
