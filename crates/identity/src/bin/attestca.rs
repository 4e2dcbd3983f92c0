//! AttestCA CLI Tool
//!
//! Command-line interface for inspecting credentials, resolving trust chains
//! against a directory of CA credentials, and issuing attestation challenges.

use attestca_core::{logging, Config};
use attestca_identity::{
    AttestationChallenge, CaCredential, Certificate, ChainResolver, IdentityError,
    MemoryCertificateStore,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// JSON output for inspect command
#[derive(Debug, Serialize)]
struct InspectOutput {
    subject: String,
    issuer: String,
    serial_number: String,
    not_before: i64,
    not_after: i64,
    authority_key_identifier: Option<String>,
    subject_key_identifier: Option<String>,
    self_issued: bool,
    content_hash: String,
}

/// JSON output for resolve command
#[derive(Debug, Serialize)]
struct ResolveOutput {
    trusted: bool,
    chain: Vec<String>,
    error: Option<String>,
    category: Option<String>,
}

/// JSON output for challenge command
#[derive(Debug, Serialize)]
struct ChallengeOutput {
    nonce: String,
    pcr_mask: String,
    pcrs: Vec<u8>,
}

fn load_config(path: Option<PathBuf>) -> Result<Config, String> {
    match path {
        Some(path) => Config::from_file(&path).map_err(|e| format!("{}: {}", path.display(), e)),
        None => Ok(Config::default_config()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn cmd_inspect(cert: PathBuf) -> Result<(), String> {
    let ca = CaCredential::from_path(&cert).map_err(|e| e.to_string())?;
    let data = ca.data();
    print_json(&InspectOutput {
        subject: data.subject().to_string(),
        issuer: data.issuer().to_string(),
        serial_number: hex::encode(data.serial_number()),
        not_before: data.not_before(),
        not_after: data.not_after(),
        authority_key_identifier: data.authority_key_identifier().map(hex::encode),
        subject_key_identifier: ca.subject_key_identifier().map(hex::encode),
        self_issued: ca.is_self_issued(),
        content_hash: hex::encode(data.content_hash()),
    })
}

fn cmd_resolve(cert: PathBuf, store_dir: Option<PathBuf>, config: Config) -> Result<(), String> {
    let store_dir = store_dir
        .or(config.trust_store.directory.clone())
        .ok_or("Missing --store argument and no trust_store.directory configured")?;
    let store = MemoryCertificateStore::from_directory(&store_dir).map_err(|e| e.to_string())?;

    let leaf = Certificate::from_path(&cert).map_err(|e| e.to_string())?;

    let resolver = ChainResolver::from_config(&store, &config.chain);
    let output = match resolver.resolve(&leaf) {
        Ok(chain) => ResolveOutput {
            trusted: true,
            chain: chain.iter().map(|c| c.subject().to_string()).collect(),
            error: None,
            category: None,
        },
        Err(e) => ResolveOutput {
            trusted: false,
            chain: Vec::new(),
            category: Some(format!("{:?}", e.category())),
            error: Some(e.to_string()),
        },
    };
    let trusted = output.trusted;
    print_json(&output)?;
    if trusted {
        Ok(())
    } else {
        Err("certificate is not trusted".to_string())
    }
}

fn cmd_challenge(mask: Option<u32>, config: Config) -> Result<(), String> {
    let mut rng = rand::rngs::OsRng;
    let challenge = match mask {
        Some(mask) => AttestationChallenge::generate(&mut rng, config.challenge.nonce_len, mask),
        None => AttestationChallenge::from_config(&mut rng, &config.challenge),
    }
    .map_err(|e: IdentityError| e.to_string())?;

    print_json(&ChallengeOutput {
        nonce: challenge.nonce_hex(),
        pcr_mask: format!("0x{:08x}", challenge.pcr_mask()),
        pcrs: challenge.pcr_indices(),
    })
}

fn parse_mask(value: &str) -> Option<u32> {
    let digits = value.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).ok()
}

/// Options shared by every command.
#[derive(Debug, Default, PartialEq)]
struct Options {
    positional: Vec<PathBuf>,
    config_path: Option<PathBuf>,
    store_dir: Option<PathBuf>,
    mask: Option<u32>,
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("Missing value for {}", arg));
        match arg.as_str() {
            "--config" | "-c" => options.config_path = Some(PathBuf::from(value()?)),
            "--store" | "-s" => options.store_dir = Some(PathBuf::from(value()?)),
            "--mask" | "-m" => {
                let raw = value()?;
                let mask = parse_mask(raw).ok_or_else(|| format!("Invalid --mask value: {}", raw))?;
                options.mask = Some(mask);
            }
            other => options.positional.push(PathBuf::from(other)),
        }
    }
    Ok(options)
}

fn parse_args() -> Result<(String, Vec<String>), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Err("Missing command".to_string());
    }

    Ok((args[1].clone(), args[2..].to_vec()))
}

fn print_usage() {
    println!("AttestCA CLI - credential trust chains and attestation challenges");
    println!();
    println!("USAGE:");
    println!("    attestca <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    inspect <cert>                       Print the fields of a credential");
    println!("    resolve <cert> [--store <dir>]       Resolve the trust chain of a credential");
    println!("    challenge [--mask <hex>]             Issue an attestation challenge");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <file>                  TOML configuration file");
}

fn main() {
    let (command, args) = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            println!();
            print_usage();
            process::exit(1);
        }
    };

    let Options {
        mut positional,
        config_path,
        store_dir,
        mask,
    } = match parse_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            println!();
            print_usage();
            process::exit(1);
        }
    };

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    logging::init_from_config(&config.logging);

    let result = match command.as_str() {
        "inspect" => match positional.pop() {
            Some(cert) => cmd_inspect(cert),
            None => Err("Missing certificate path".to_string()),
        },
        "resolve" => match positional.pop() {
            Some(cert) => cmd_resolve(cert, store_dir, config),
            None => Err("Missing certificate path".to_string()),
        },
        "challenge" => cmd_challenge(mask, config),
        _ => {
            print_usage();
            Err(format!("Unknown command: {}", command))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
