//! Command-line argument parsing and processing.
//!
//! The daemon takes a handful of flags: a config path, debug output, a single
//! iteration mode and an optional log file. Help and version take precedence
//! over everything else; any unknown option shows the help text.

/// Settings for a normal run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub debug_enabled: bool,
    pub config_path: Option<String>,
    /// Run a single iteration, print the result as JSON and exit.
    pub once: bool,
    pub log_file: Option<String>,
}

/// Represents the parsed command-line arguments and their intended actions.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the engine with these settings
    Run(RunOptions),
    /// Display help information and exit
    ShowHelp,
    /// Display version information and exit
    ShowVersion,
    /// Show help due to unknown or incomplete arguments and exit
    ShowHelpDueToError,
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

impl ParsedArgs {
    /// Parse command-line arguments. The first item is the program name.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        if args_vec
            .iter()
            .any(|arg| arg == "--version" || arg == "-V" || arg == "-v")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }
        if args_vec.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }

        let mut options = RunOptions::default();
        let mut unknown_arg_found = false;
        let mut iter = args_vec.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--debug" | "-d" => options.debug_enabled = true,
                "--once" | "-1" => options.once = true,
                "--config" | "-c" => match iter.next() {
                    Some(path) => options.config_path = Some(path),
                    None => unknown_arg_found = true,
                },
                "--log" | "-l" => match iter.next() {
                    Some(path) => options.log_file = Some(path),
                    None => unknown_arg_found = true,
                },
                _ => unknown_arg_found = true,
            }
        }

        let action = if unknown_arg_found {
            CliAction::ShowHelpDueToError
        } else {
            CliAction::Run(options)
        };
        ParsedArgs { action }
    }

    /// Convenience method to parse from std::env::args()
    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

/// Displays version information using custom logging style.
pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Displays custom help message using logger methods.
pub fn display_help() {
    log_version!();
    log_block_start!(env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage:");
    log_indented!("lightcycle [OPTIONS]");
    log_block_start!("Options:");
    log_indented!("-c, --config <path>    Use a specific configuration file");
    log_indented!("-d, --debug            Enable detailed debug output");
    log_indented!("-1, --once             Run one iteration, print the result as JSON and exit");
    log_indented!("-l, --log <file>       Also write the log to a file");
    log_indented!("-h, --help             Print help information");
    log_indented!("-V, --version          Print version information");
    log_end!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_args() {
        let parsed = ParsedArgs::parse(vec!["lightcycle"]);
        assert_eq!(parsed.action, CliAction::Run(RunOptions::default()));
    }

    #[test]
    fn test_parse_all_run_flags() {
        let parsed = ParsedArgs::parse(vec![
            "lightcycle",
            "-d",
            "--config",
            "/etc/lightcycle.toml",
            "--once",
            "-l",
            "/tmp/lightcycle.log",
        ]);
        assert_eq!(
            parsed.action,
            CliAction::Run(RunOptions {
                debug_enabled: true,
                config_path: Some("/etc/lightcycle.toml".to_string()),
                once: true,
                log_file: Some("/tmp/lightcycle.log".to_string()),
            })
        );
    }

    #[test]
    fn test_help_and_version_take_precedence() {
        let parsed = ParsedArgs::parse(vec!["lightcycle", "--debug", "--help"]);
        assert_eq!(parsed.action, CliAction::ShowHelp);

        let parsed = ParsedArgs::parse(vec!["lightcycle", "--version", "--help", "--bogus"]);
        assert_eq!(parsed.action, CliAction::ShowVersion);

        let parsed = ParsedArgs::parse(vec!["lightcycle", "-v"]);
        assert_eq!(parsed.action, CliAction::ShowVersion);
    }

    #[test]
    fn test_unknown_or_incomplete_flags() {
        let parsed = ParsedArgs::parse(vec!["lightcycle", "--debug", "--invalid"]);
        assert_eq!(parsed.action, CliAction::ShowHelpDueToError);

        let parsed = ParsedArgs::parse(vec!["lightcycle", "--config"]);
        assert_eq!(parsed.action, CliAction::ShowHelpDueToError);

        let parsed = ParsedArgs::parse(vec!["lightcycle", "status"]);
        assert_eq!(parsed.action, CliAction::ShowHelpDueToError);
    }
}
