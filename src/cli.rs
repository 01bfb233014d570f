use std::{num::ParseIntError, path::PathBuf};

use clap::{
    Arg, ArgAction, Command,
    builder::styling::{AnsiColor, Styles},
    crate_authors, crate_description, crate_name, crate_version, value_parser,
};

/// Parses a tag as decimal, or hexadecimal with a `0x` prefix.
fn parse_tag(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

pub(crate) fn create_app() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default());

    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .styles(styles)
        .arg(
            Arg::new("FILE")
                .help("The PRX or PBP file to be packed.")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("tags")
                .long("tags")
                .short('s')
                .help("The tags to use instead of the defaults for the file kind")
                .long_help(
                    "The tags to use instead of the defaults for the file kind\n\nBoth accept \
                     decimal or `0x` prefixed hexadecimal values",
                )
                .num_args(2)
                .value_names(["TAG", "OE_TAG"])
                .value_parser(parse_tag),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .short('n')
                .help("Don't actually write the compressed file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Verbose output to stderr")
                .long_help(
                    "Verbose output to stderr\n\nReports warnings, the packing steps and some \
                     compression information",
                )
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("Specify the output file")
                .long_help(
                    "Specify the output file\n\nIf this option is not specified, the program will \
                     overwrite the passed <FILE>",
                )
                .value_name("OUT_FILE")
                .value_parser(value_parser!(PathBuf)),
        )
}
