// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use ca_signer::ca::ssh::parse_ssh_certificate;
use ca_signer::x509::format_timestamp;
use ca_signer::{
    encrypt_key_pem, render, sign_request, CaContext, CaServiceConfig, Config, DirectorySecrets,
    Error, GrantAuthorizer, ParamValue, Paths, ResponseFormat, Result, Role, SigningRequest,
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const PASSWORD_ENV: &str = "CA_SIGNER_PASSWORD";

// ============================================================================
// CLI definitions
// ============================================================================

#[derive(Parser)]
#[command(name = "ca-signer")]
#[command(about = "Issue short-lived X.509 and SSH certificates from configured CA services")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    ca-signer services
    ca-signer sign --account cucumber --service kitchen \\
        --role cucumber:host:hosts/web-01 --csr web-01.csr --ttl PT1H
    ca-signer sign --account cucumber --service bastion --role cucumber:user:alice \\
        --public-key id_rsa.pub --principal alice --ttl PT8H
    ca-signer inspect cert.pem

ENVIRONMENT:
    CA_SIGNER_ROOT      Base directory holding config.toml and secrets/
    CA_SIGNER_PASSWORD  Passphrase for encrypt-key
    RUST_LOG            Log filter (overrides --quiet/--verbose)")]
struct Cli {
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log each issued certificate
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a CSR or SSH public key with a configured CA service
    Sign {
        /// Account owning the CA service
        #[arg(long)]
        account: String,

        /// CA service id (the <id> in conjur/<id>/ca)
        #[arg(long)]
        service: String,

        /// Full id of the requesting role, <account>:<kind>:<identifier>
        #[arg(long)]
        role: String,

        /// PKCS#10 CSR file (X.509 services)
        #[arg(long, conflicts_with = "public_key")]
        csr: Option<PathBuf>,

        /// OpenSSH RSA public key file (SSH services)
        #[arg(long)]
        public_key: Option<PathBuf>,

        /// Login principal; repeat for several (SSH services)
        #[arg(long = "principal")]
        principals: Vec<String>,

        /// Requested lifetime: ISO 8601 duration (PT1H) or seconds
        #[arg(long)]
        ttl: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = ResponseFormat::Pem)]
        format: ResponseFormat,

        /// Write the certificate to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Describe an X.509 PEM certificate or an OpenSSH certificate
    Inspect {
        /// Certificate file
        file: PathBuf,
    },

    /// List configured CA services
    Services,

    /// Encrypt a PKCS#8 CA private key with a passphrase
    EncryptKey {
        /// Unencrypted PKCS#8 PEM key
        input: PathBuf,

        /// Where to write the encrypted key
        #[arg(long, short)]
        output: PathBuf,

        /// Passphrase (for automation; prefer prompt or CA_SIGNER_PASSWORD env)
        #[arg(long)]
        password: Option<String>,

        /// Overwrite the output file if it exists
        #[arg(long, short)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Output helper that respects --quiet.
#[derive(Clone, Copy)]
struct Output {
    quiet: bool,
}

impl Output {
    fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Status line on stderr, so stdout only ever carries certificates.
    fn status(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    // Reset SIGPIPE to default behavior (exit) instead of panic
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    let out = Output::new(cli.quiet);

    match cli.command {
        Commands::Sign {
            account,
            service,
            role,
            csr,
            public_key,
            principals,
            ttl,
            format,
            output,
        } => {
            let paths = Paths::new()?;
            let request = build_request(csr.as_deref(), public_key.as_deref(), principals, ttl)?;
            cmd_sign(
                &paths,
                SignArgs {
                    account: &account,
                    service: &service,
                    role: &role,
                    format,
                    output: output.as_deref(),
                },
                request,
                out,
            )
        }
        Commands::Inspect { file } => cmd_inspect(&file),
        Commands::Services => cmd_services(&Paths::new()?),
        Commands::EncryptKey {
            input,
            output,
            password,
            force,
        } => cmd_encrypt_key(&input, &output, password, force, out),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

struct SignArgs<'a> {
    account: &'a str,
    service: &'a str,
    role: &'a str,
    format: ResponseFormat,
    output: Option<&'a Path>,
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}

fn build_request(
    csr: Option<&Path>,
    public_key: Option<&Path>,
    mut principals: Vec<String>,
    ttl: String,
) -> Result<SigningRequest> {
    let mut request = SigningRequest::new().with("ttl", ttl);
    if let Some(path) = csr {
        request.insert("csr", read_text(path)?);
    }
    if let Some(path) = public_key {
        request.insert("public_key", read_text(path)?);
    }
    match principals.len() {
        0 => {}
        1 => request.insert("principals", principals.remove(0)),
        _ => request.insert("principals", ParamValue::Many(principals)),
    }
    Ok(request)
}

fn cmd_sign(paths: &Paths, args: SignArgs, request: SigningRequest, out: Output) -> Result<()> {
    let config = Config::load(&paths.config)?;
    let service = config.find_service(args.account, args.service)?;
    let role = Role::parse(args.role)?;

    let context = CaContext::new(
        Arc::new(DirectorySecrets::new(paths.secrets_dir(&config))),
        Arc::new(GrantAuthorizer::new(config.grants.clone())),
    )
    .with_spiffe_root(config.spiffe_root.clone());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| Error::Config(format!("Failed to start async runtime: {}", e)))?;
    let issued = runtime.block_on(sign_request(service, &context, &role, &request))?;

    let rendered = render(&issued, args.format)?;
    let mut body = rendered.body;
    if !body.ends_with('\n') {
        body.push('\n');
    }

    match args.output {
        Some(path) => {
            ca_signer::fs::atomic_write(path, body.as_bytes())?;
            out.status(&format!(
                "Wrote {} certificate to {}",
                issued.kind(),
                path.display()
            ));
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(body.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| Error::WriteFile {
                    path: PathBuf::from("<stdout>"),
                    source: e,
                })?;
        }
    }
    Ok(())
}

fn cmd_inspect(file: &Path) -> Result<()> {
    let content = read_text(file)?;

    if content.contains("-----BEGIN CERTIFICATE-----") {
        let info = ca_signer::parse_cert_pem(&content)?;
        println!("Certificate: {}", file.display());
        println!("Format:      X.509");
        if let Some(cn) = &info.common_name {
            println!("Subject CN:  {}", cn);
        }
        if let Some(cn) = &info.issuer_common_name {
            println!("Issuer CN:   {}", cn);
        }
        println!("Serial:      {}", info.serial_hex);
        println!("CA:          {}", if info.is_ca { "yes" } else { "no" });
        if !info.key_usages.is_empty() {
            println!("Key usage:   {}", info.key_usages.join(", "));
        }
        if !info.dns_names.is_empty() || !info.uris.is_empty() {
            println!("SANs:");
            for name in info.dns_names.iter().chain(info.uris.iter()) {
                println!("    - {}", name);
            }
        }
        println!("Not before:  {}", format_timestamp(info.not_before_timestamp));
        println!("Not after:   {}", info.expiry_string());
        println!("Lifetime:    {}s", info.lifetime_secs());
        if info.is_expired() {
            println!("Status:      EXPIRED");
        }
    } else {
        let info = parse_ssh_certificate(&content)?;
        println!("Certificate: {}", file.display());
        println!("Format:      OpenSSH ({})", info.key_type);
        println!("Type:        {}", info.cert_type);
        println!("Key id:      {}", info.key_id);
        println!("Serial:      {}", info.serial);
        println!("Signed by:   {}", info.signing_key_fingerprint);
        println!("Principals:");
        for principal in &info.principals {
            println!("    - {}", principal);
        }
        let as_ts = |secs: u64| format_timestamp(i64::try_from(secs).unwrap_or(i64::MAX));
        println!("Valid after: {}", as_ts(info.valid_after));
        println!("Valid before: {}", as_ts(info.valid_before));
        println!("Lifetime:    {}s", info.lifetime().as_secs());
    }

    Ok(())
}

fn cmd_services(paths: &Paths) -> Result<()> {
    let config = Config::load(&paths.config)?;

    if config.services.is_empty() {
        println!("No CA services configured in {}", paths.config.display());
        return Ok(());
    }

    println!("{:<16} {:<24} {:<6} MAX TTL", "ACCOUNT", "SERVICE", "KIND");
    for entry in &config.services {
        // Already validated by Config::load
        let parsed = CaServiceConfig::from_service(entry.to_service())?;
        println!(
            "{:<16} {:<24} {:<6} {}s",
            entry.account,
            entry.id,
            parsed.kind,
            parsed.max_ttl.as_secs()
        );
    }
    Ok(())
}

fn cmd_encrypt_key(
    input: &Path,
    output: &Path,
    password: Option<String>,
    force: bool,
    out: Output,
) -> Result<()> {
    if output.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists. Use --force to overwrite.",
            output.display()
        )));
    }

    let key_pem = zeroize::Zeroizing::new(read_text(input)?);
    let password = zeroize::Zeroizing::new(get_password_for_encryption(password)?);

    let encrypted = encrypt_key_pem(&key_pem, &password)?;
    ca_signer::fs::atomic_write_secret(output, encrypted.as_bytes())?;

    out.status(&format!("Encrypted key written to {}", output.display()));
    out.status("Store the passphrase in the secret named by ca/private-key-password.");
    Ok(())
}

fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "ca-signer", &mut std::io::stdout());
    Ok(())
}

/// Passphrase from the command line, the environment, or an interactive
/// prompt with confirmation.
fn get_password_for_encryption(arg: Option<String>) -> Result<String> {
    if let Some(pwd) = arg {
        if pwd.is_empty() {
            return Err(Error::Config("Password cannot be empty".to_string()));
        }
        tracing::warn!(
            "password provided on the command line is visible in the process list; consider {} or the prompt",
            PASSWORD_ENV
        );
        return Ok(pwd);
    }

    if let Ok(pwd) = std::env::var(PASSWORD_ENV) {
        if pwd.is_empty() {
            return Err(Error::Config(format!(
                "{} is set but empty. Password cannot be empty.",
                PASSWORD_ENV
            )));
        }
        return Ok(pwd);
    }

    let password = rpassword::prompt_password("Enter passphrase for CA key: ")
        .map_err(|e| Error::Config(format!("Failed to read password: {}", e)))?;
    let confirm = rpassword::prompt_password("Confirm passphrase: ")
        .map_err(|e| Error::Config(format!("Failed to read password: {}", e)))?;

    if password != confirm {
        return Err(Error::Config("Passwords do not match".to_string()));
    }
    if password.is_empty() {
        return Err(Error::Config("Password cannot be empty".to_string()));
    }
    Ok(password)
}
