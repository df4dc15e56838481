//! Command-line argument parsing.

use std::env;
use std::path::PathBuf;

/// Parsed command line: `p6psg-play [-t TITLE] FILE`.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Display title handed to the status line (defaults to the file name).
    pub title: Option<String>,
    /// Music file to play.
    pub file: Option<PathBuf>,
    /// Set when parsing failed or help was requested.
    pub show_usage: bool,
}

impl CliArgs {
    /// Parse arguments from the environment.
    pub fn parse() -> Self {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from<I: Iterator<Item = String>>(mut iter: I) -> Self {
        let mut args = Self::default();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-t" => {
                    if let Some(value) = iter.next() {
                        args.title = Some(value);
                    } else {
                        eprintln!("-t requires a title argument");
                        args.show_usage = true;
                    }
                }
                "-h" | "--help" => {
                    args.show_usage = true;
                }
                _ if arg.starts_with('-') => {
                    eprintln!("unknown flag: {arg}");
                    args.show_usage = true;
                }
                _ => {
                    if args.file.is_none() {
                        args.file = Some(PathBuf::from(arg));
                    } else {
                        eprintln!("unexpected extra argument: {arg}");
                        args.show_usage = true;
                    }
                }
            }
        }

        if args.file.is_none() {
            args.show_usage = true;
        }
        args
    }

    /// Print usage to stderr.
    pub fn print_usage() {
        eprintln!(
            "Usage:\n  p6psg-play [-t TITLE] FILE\n\n\
             Flags:\n\
             \x20 -t TITLE    Title shown in the status line\n\
             \x20 -h, --help  Show this help\n\n\
             Keys:\n\
             \x20 q, Q        Quit\n\
             \x20 Ctrl-L      Redraw the status line\n\n\
             Environment:\n\
             \x20 P6PSG_BACKEND=stub   Use the register-shadow stub instead of GPIO\n\
             \x20 RUST_LOG=debug       Diagnostics on stderr\n"
        );
    }
}
