use clap::error::ErrorKind;
use clap::Parser;
use safepack::cli::{open_safe, pack_image, OpenOptions, PackOptions, PackReport, Target};
use safepack::pipeline::Placement;
use safepack::version::parse_guid;
use safepack::SafeError;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

/// Version info from build.rs
const VERSION: &str = env!("SAFEPACK_VERSION");
const PROFILE: &str = env!("SAFEPACK_PROFILE");
const GIT_HASH: &str = env!("SAFEPACK_GIT_HASH");

fn get_version() -> &'static str {
    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} {} ({})", PROFILE, VERSION, GIT_HASH))
}

#[derive(Parser, Debug)]
#[command(name = "pack")]
#[command(about = "Package and open authenticated firmware images", long_about = None)]
#[command(disable_version_flag = true)]
#[command(override_usage = "pack -prod  [-nocrypto] [-scramble] [-guid HEX] out.safe in.bin
       pack -ota   [-nocrypto] [-scramble] [-guid HEX] out.safe in.bin
       pack -cube  [-nocrypto] [-guid HEX] out.safe in.bin
       pack -opensafe [-cube] [-nocrypto] [-fileorder] in.safe out.bin")]
struct Cli {
    /// Print version
    #[arg(short = 'V', long)]
    version: bool,

    /// Package a main board image
    #[arg(long, conflicts_with_all = ["ota", "cube", "opensafe"])]
    prod: bool,

    /// Package a main board image and its OTA delta
    #[arg(long, conflicts_with_all = ["cube", "opensafe"])]
    ota: bool,

    /// Cube image (packages one, or opens one with -opensafe)
    #[arg(long)]
    cube: bool,

    /// Decode a safe image back into a binary
    #[arg(long)]
    opensafe: bool,

    /// Skip encryption
    #[arg(long)]
    nocrypto: bool,

    /// Write blocks forward, then again reversed
    #[arg(long, conflicts_with_all = ["cube", "opensafe"])]
    scramble: bool,

    /// Explicit GUID in hex; leaves the version sidecar alone
    #[arg(long, value_name = "HEX", value_parser = parse_guid_arg, conflicts_with = "opensafe")]
    guid: Option<u32>,

    /// Place decoded blocks in file order instead of by block index
    #[arg(long, conflicts_with_all = ["prod", "ota", "scramble", "guid"])]
    fileorder: bool,

    /// out.safe when packaging, in.safe when opening
    first: Option<PathBuf>,

    /// in.bin when packaging, out.bin when opening
    second: Option<PathBuf>,
}

fn parse_guid_arg(s: &str) -> Result<u32, String> {
    parse_guid(s).map_err(|e| format!("{}", e))
}

/// The legacy surface uses single-dash long flags (`-prod`); clap wants `--prod`
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| match arg.to_str() {
            Some(s)
                if i > 0
                    && s.len() > 2
                    && s.starts_with('-')
                    && s[1..].chars().all(|c| c.is_ascii_alphabetic()) =>
            {
                OsString::from(format!("-{}", s))
            }
            _ => arg,
        })
        .collect()
}

fn print_pack_report(report: &PackReport) {
    println!(
        "Packed {} blocks to {} (GUID {:08x})",
        report.blocks,
        report.output.display(),
        report.guid
    );
    if let Some(version) = report.version {
        println!("Build version {:04x}", version);
    }
    if let Some(ota) = &report.ota {
        println!("OTA delta written to {}", ota.display());
    }
    // Verification results are for the operator; they never change the exit code
    if report.verify.passed() {
        println!("{}", report.verify);
    } else {
        eprintln!("{}", report.verify);
    }
}

fn run(cli: Cli) -> Result<(), SafeError> {
    let (first, second) = match (cli.first, cli.second) {
        (Some(first), Some(second)) => (first, second),
        _ => return Err(SafeError::Usage("expected two file arguments".into())),
    };

    if cli.fileorder && !cli.opensafe {
        return Err(SafeError::Usage("-fileorder only applies to -opensafe".into()));
    }

    if cli.opensafe {
        let options = OpenOptions {
            cube: cli.cube,
            crypto: !cli.nocrypto,
            placement: if cli.fileorder {
                Placement::FileOrder
            } else {
                Placement::BlockIndex
            },
            ..Default::default()
        };
        let report = open_safe(&first, &second, &options)?;
        for warning in &report.warnings {
            eprintln!("Warning: {}", warning);
        }
        println!(
            "Opened {} blocks, {} bytes written to {}",
            report.blocks,
            report.bytes,
            second.display()
        );
        return Ok(());
    }

    let target = if cli.prod {
        Target::Board
    } else if cli.ota {
        Target::Ota
    } else if cli.cube {
        Target::Cube
    } else {
        return Err(SafeError::Usage(
            "one of -prod, -ota, -cube or -opensafe is required".into(),
        ));
    };

    let options = PackOptions {
        target,
        crypto: !cli.nocrypto,
        scramble: cli.scramble,
        guid: cli.guid,
        ..Default::default()
    };
    let report = pack_image(&second, &first, &options)?;
    print_pack_report(&report);
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse_from(normalize_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    if cli.version {
        println!("pack {}", get_version());
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e, SafeError::Usage(_)) {
                use clap::CommandFactory;
                let _ = Cli::command().print_help();
            }
            ExitCode::from(e.exit_code())
        }
    }
}
