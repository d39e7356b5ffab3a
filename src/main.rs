//! unrar5 command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use unrar5::extract::PasswordStatus;
use unrar5::{Archive, Extractor, RarError};

#[derive(Parser)]
#[command(name = "unrar5")]
#[command(version, about = "Extract RAR5 archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract all files into a directory
    #[command(alias = "x")]
    Extract {
        /// Archive to extract
        archive: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Password for encrypted archives
        #[arg(short, long)]
        password: Option<String>,
    },
    /// List the archive contents
    #[command(alias = "l")]
    List {
        /// Archive to list
        archive: PathBuf,
        /// Password for encrypted archives
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Report whether the archive has encrypted headers
    Probe {
        /// Archive to probe
        archive: PathBuf,
    },
}

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_BAD_PASSWORD: u8 = 2;
const EXIT_UNSUPPORTED: u8 = 3;

fn error_code(e: &RarError) -> u8 {
    match e {
        RarError::PasswordRequired | RarError::WrongPassword => EXIT_BAD_PASSWORD,
        RarError::UnsupportedArchive(_) | RarError::Decode(unrar5::DecodeError::UnsupportedFilter) => {
            EXIT_UNSUPPORTED
        }
        _ => EXIT_FAILED,
    }
}

fn run_extract(archive: PathBuf, output: PathBuf, password: Option<String>) -> u8 {
    let opened = match Archive::open(&archive, password.as_deref()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {}", e);
            return error_code(&e);
        }
    };

    let mut extractor = Extractor::new(password);
    let report = match extractor.extract(&opened, &output) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return error_code(&e);
        }
    };

    for failure in &report.failures {
        eprintln!("failed: {}: {}", failure.name, failure.error);
    }
    println!(
        "{}/{} files extracted",
        report.succeeded, report.total_files
    );

    if report.password_status == PasswordStatus::Wrong {
        return EXIT_BAD_PASSWORD;
    }
    if let Some(failure) = report.failures.first() {
        return error_code(&failure.error);
    }
    EXIT_OK
}

fn run_list(archive: PathBuf, password: Option<String>) -> u8 {
    let opened = match Archive::open(&archive, password.as_deref()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {}", e);
            return error_code(&e);
        }
    };

    println!("{:>12}  {:>12}  {}", "Size", "Packed", "Name");
    for (block, header) in opened.files() {
        let size = header
            .unpacked_size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".into());
        let packed = block.data_end - block.data_start;
        let mut name = header.name.clone();
        if header.flags.is_directory {
            name.push('/');
        }
        if header.is_encrypted() {
            name.push_str("  [encrypted]");
        }
        println!("{:>12}  {:>12}  {}", size, packed, name);
    }
    EXIT_OK
}

fn run_probe(archive: PathBuf) -> u8 {
    match Archive::is_header_encrypted(&archive) {
        Ok(true) => {
            println!("headers encrypted: password required to list");
            EXIT_OK
        }
        Ok(false) => {
            println!("headers not encrypted");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: {}", e);
            error_code(&e)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Extract {
            archive,
            output,
            password,
        } => run_extract(archive, output, password),
        Command::List { archive, password } => run_list(archive, password),
        Command::Probe { archive } => run_probe(archive),
    };
    ExitCode::from(code)
}
