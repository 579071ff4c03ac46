use plugsign::audit::{self, AuditConfig, LogDestination};
use plugsign::{
    read_all, Compression, KeySource, PSError, PipelineState, SignConfig, SigningPipeline,
    DEFAULT_OUTPUT_FILE,
};

use plugsign::reexports::log;
use plugsign::reexports::zeroize::Zeroizing;

use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, Command};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Environment variable holding the key passphrase when `--key-password` is absent.
const PASSWORD_ENV: &str = "PLUGSIGN_KEY_PASSWORD";

/// Environment variable overriding the number of signing workers.
const JOBS_ENV: &str = "PLUGSIGN_JOBS";

/// Helper function to open a file with better error messages
fn open_file(path: impl AsRef<Path>) -> Result<File, PSError> {
    let path = path.as_ref();
    File::open(path).map_err(|e| {
        PSError::InternalError(format!("Failed to open file '{}': {}", path.display(), e))
    })
}

/// Resolve the key passphrase: flag, then environment, then an interactive prompt.
fn resolve_passphrase(flag: Option<&String>) -> Result<Zeroizing<String>, PSError> {
    if let Some(password) = flag {
        return Ok(Zeroizing::new(password.clone()));
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        log::debug!("Using key password from {}", PASSWORD_ENV);
        return Ok(Zeroizing::new(password));
    }
    let password = rpassword::prompt_password("Please enter the password of the key: ")?;
    Ok(Zeroizing::new(password))
}

/// Parse a worker count; zero is rejected rather than silently raised to one.
fn parse_jobs(value: &str) -> Result<usize, PSError> {
    match value.trim().parse::<usize>() {
        Ok(jobs) if jobs > 0 => Ok(jobs),
        _ => Err(PSError::UsageError("the job count must be a positive integer")),
    }
}

fn resolve_jobs(flag: Option<&usize>) -> Result<usize, PSError> {
    if let Some(jobs) = flag {
        return Ok(*jobs);
    }
    match std::env::var(JOBS_ENV) {
        Ok(value) => parse_jobs(&value)
            .map_err(|_| PSError::UsageError("PLUGSIGN_JOBS must be a positive integer")),
        Err(_) => Ok(1),
    }
}

fn print_state(state: &PipelineState) {
    let line = match state {
        PipelineState::ArchiveRead { entries } => {
            format!("Reading plugin archive... done ({} entries)", entries)
        }
        PipelineState::KeyLoaded => "Unlocking signing key... done".to_string(),
        PipelineState::Finalizing => "Writing signed archive...".to_string(),
        PipelineState::Failed { stage } => format!("Failed during {}", stage),
        _ => return,
    };
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", line);
}

fn start() -> Result<(), PSError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .action(ArgAction::SetTrue)
                .help("Enable structured audit logging (JSON to stderr)"),
        )
        .arg(
            Arg::new("audit-file")
                .long("audit-file")
                .value_name("FILE")
                .help("Write audit logs to FILE instead of stderr"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("sign")
                .about("Signs a plugin zip with a specific key")
                .arg(
                    Arg::new("file")
                        .value_name("file")
                        .required(true)
                        .help("The plugin file to sign (may be - for stdin)"),
                )
                .arg(
                    Arg::new("key")
                        .value_name("key")
                        .required(true)
                        .help("The key file to sign with (may be - for stdin)"),
                )
                .arg(
                    Arg::new("key_password")
                        .value_name("password")
                        .long("key-password")
                        .short('p')
                        .help("The password to use for signing with the key"),
                )
                .arg(
                    Arg::new("out")
                        .value_name("output_file")
                        .long("output")
                        .short('o')
                        .default_value(DEFAULT_OUTPUT_FILE)
                        .help("Output file"),
                )
                .arg(
                    Arg::new("deflate")
                        .long("deflate")
                        .action(ArgAction::SetTrue)
                        .help("Compress entries in the signed archive"),
                )
                .arg(
                    Arg::new("jobs")
                        .long("jobs")
                        .short('j')
                        .value_name("count")
                        .value_parser(parse_jobs)
                        .help("Number of signing workers"),
                ),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let debug = matches.get_flag("debug");
    let audit_enabled = matches.get_flag("audit");
    let audit_file = matches.get_one::<String>("audit-file").map(|s| s.as_str());

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if audit_enabled || audit_file.is_some() {
        let destination = match audit_file {
            Some(path) => LogDestination::File(path.to_string()),
            None => LogDestination::Stderr,
        };
        audit::init(AuditConfig {
            destination,
            ..AuditConfig::default()
        })?;
    }

    if let Some(matches) = matches.subcommand_matches("sign") {
        let input_file = matches
            .get_one::<String>("file")
            .ok_or(PSError::UsageError("Missing plugin file"))?;
        let key = matches
            .get_one::<String>("key")
            .ok_or(PSError::UsageError("Missing key file"))?;
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(PSError::UsageError("Missing output file"))?;
        let key_source = KeySource::parse(key);
        if input_file == "-" && key_source.is_stdin() {
            return Err(PSError::UsageError(
                "The plugin file and the key can't both be read from stdin",
            ));
        }

        let armored = Zeroizing::new(key_source.read_armored()?);
        let passphrase = resolve_passphrase(matches.get_one::<String>("key_password"))?;
        let archive = if input_file == "-" {
            read_all(&mut io::stdin().lock())?
        } else {
            read_all(&mut open_file(input_file)?)?
        };

        let config = SignConfig::default()
            .with_output_path(output_file)
            .with_compression(if matches.get_flag("deflate") {
                Compression::Deflated
            } else {
                Compression::Stored
            })
            .with_jobs(resolve_jobs(matches.get_one::<usize>("jobs"))?);
        let pipeline = SigningPipeline::new(config).with_observer(print_state);
        let signed = pipeline.run_to_file(&archive, &armored, &passphrase)?;

        if verbose {
            println!("\n* Signed entries:\n");
            for entry in &signed.entries {
                println!("  {} ({} bytes)", entry.path, entry.size);
            }
            println!();
        }
        println!(
            "✓ Signed {} entries, saved to [{}]",
            signed.len(),
            output_file
        );
    }
    Ok(())
}

fn main() -> Result<(), PSError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jobs() {
        assert_eq!(parse_jobs("4").unwrap(), 4);
        assert_eq!(parse_jobs(" 2\n").unwrap(), 2);
    }

    #[test]
    fn test_parse_jobs_rejects_zero() {
        assert!(matches!(parse_jobs("0"), Err(PSError::UsageError(_))));
        assert!(matches!(parse_jobs(" 0 "), Err(PSError::UsageError(_))));
    }

    #[test]
    fn test_parse_jobs_rejects_garbage() {
        for value in ["", "-1", "two", "1.5"] {
            assert!(matches!(parse_jobs(value), Err(PSError::UsageError(_))));
        }
    }

    #[test]
    fn test_jobs_flag_wins() {
        assert_eq!(resolve_jobs(Some(&3)).unwrap(), 3);
    }

    #[test]
    fn test_jobs_flag_rejects_zero() {
        let cli = Command::new("plugsign").arg(
            Arg::new("jobs")
                .long("jobs")
                .short('j')
                .value_parser(parse_jobs),
        );
        assert!(cli.clone().try_get_matches_from(["plugsign", "-j", "0"]).is_err());
        let matches = cli.try_get_matches_from(["plugsign", "-j", "8"]).unwrap();
        assert_eq!(matches.get_one::<usize>("jobs"), Some(&8));
    }
}
