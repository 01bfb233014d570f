use std::{fs, io::Write, path::PathBuf};

use log::{LevelFilter, Log, Metadata, Record};
use psp_packer::Error;

mod cli;

/// Writes log records to stderr with the program name in front.
///
/// Filtering is left to [`log::set_max_level`].
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(
                std::io::stderr().lock(),
                "psp-packer: {}: {}",
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    let res = exec();

    if let Err(e) = res {
        eprintln!("psp-packer: {e}");
        std::process::exit(e.error_code());
    }
}

fn exec() -> Result<(), Error> {
    let cmd = cli::create_app();
    let matches = cmd.get_matches();

    // Ok to unwrap as it is required.
    let file_name = matches.get_one::<PathBuf>("FILE").unwrap();
    let output_file = matches.get_one::<PathBuf>("output");

    let dry_run = matches.get_flag("dry-run");
    let verbose = matches.get_flag("verbose");

    // Only fails if a logger is already set, which cannot happen here.
    let _ = log::set_logger(&LOGGER);
    // Errors only, unless `--verbose` asks for warnings and packing steps.
    log::set_max_level(if verbose { LevelFilter::Debug } else { LevelFilter::Error });

    let tags = matches
        .get_many::<u32>("tags")
        .and_then(|mut tags| tags.next().copied().zip(tags.next().copied()));

    let mut file = fs::read(file_name)?;
    let og_file_size = file.len();

    let kind = match tags {
        Some((psp_tag, oe_tag)) => psp_packer::pack(&mut file, |_| psp_tag, |_| oe_tag)?,
        None => psp_packer::pack_with_default_tags(&mut file)?,
    };

    if dry_run {
        log::warn!("not writing to file due to dry run");
    } else if let Some(output_file) = output_file {
        fs::write(output_file, &file)?;
    } else {
        log::warn!("`output` option not used, overwriting `{}`", file_name.display());
        fs::write(file_name, &file)?;
    }

    if verbose {
        eprintln!("psp-packer: The file is a {kind}");
        eprintln!(
            "psp-packer: Original file size: {:.2} KiB ({og_file_size} B)",
            og_file_size as f64 / 1024.0
        );
        eprintln!(
            "psp-packer: Compressed file size: {:.2} KiB ({} B)",
            file.len() as f64 / 1024.0,
            file.len()
        );
    }

    Ok(())
}
