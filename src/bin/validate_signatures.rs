//! Signature validation binary.
//!
//! Validates the signatures of the PDFs given on the command line and prints
//! the findings followed by a JSON report per signature.
//!
//! ```text
//! validate_signatures [--password PW] [--all-pages] file.pdf...
//! ```

use pades_triphase::signatures::params::PagesToCheck;
use pades_triphase::signatures::{analyze, validate, ValidationParams};
use std::path::PathBuf;

struct Options {
    passwords: Vec<String>,
    all_pages: bool,
    files: Vec<PathBuf>,
}

fn parse_args() -> Result<Options, String> {
    let mut options = Options {
        passwords: Vec::new(),
        all_pages: false,
        files: Vec::new(),
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--password" => options
                .passwords
                .push(args.next().ok_or("--password needs a value")?),
            "--all-pages" => options.all_pages = true,
            _ => options.files.push(PathBuf::from(arg)),
        }
    }
    if options.files.is_empty() {
        return Err("usage: validate_signatures [--password PW] [--all-pages] file.pdf...".to_string());
    }
    Ok(options)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        },
    };
    let mut params = ValidationParams {
        passwords: options.passwords.clone(),
        ..ValidationParams::default()
    };
    if options.all_pages {
        params.pages_to_check = PagesToCheck::All;
    }
    let passwords: Vec<&[u8]> = options.passwords.iter().map(String::as_bytes).collect();

    let mut all_ok = true;
    for path in &options.files {
        println!("{}", path.display());
        let data = std::fs::read(path)?;
        let findings = validate(&data, &params)?;
        for finding in &findings {
            println!("  {}", finding);
            all_ok &= finding.is_ok();
        }
        match analyze(&data, &passwords) {
            Ok(reports) => println!("{}", serde_json::to_string_pretty(&reports)?),
            Err(e) => log::warn!("Could not analyze {}: {}", path.display(), e),
        }
    }
    if !all_ok {
        std::process::exit(1);
    }
    Ok(())
}
