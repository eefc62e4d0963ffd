use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use tokio::time::Duration;

use flowsh::sandbox::SandboxConfig;
use flowsh::shell::{ExecOptions, Shell, ShellOptions};

#[derive(Parser)]
#[command(name = "flowsh")]
#[command(about = "A sandboxed scripting shell with parallel execution")]
#[command(version)]
struct Cli {
    /// Execute the script from a command line argument
    #[arg(short = 'c')]
    script: Option<String>,

    /// Output the result as JSON
    #[arg(long = "json")]
    json: bool,

    /// Deadline for the whole execution, in seconds
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// Run independent top-level statements concurrently
    #[arg(long = "parallel")]
    parallel: bool,

    /// Worker pool size for --parallel
    #[arg(long = "workers")]
    workers: Option<usize>,

    /// Disable the compilation cache
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Directory for persisted cache entries
    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// Additional commands for the sandbox dangerous-command set
    #[arg(long = "deny", value_name = "CMD")]
    deny: Vec<String>,

    /// Commands exempted from the injection check
    #[arg(long = "trust", value_name = "CMD")]
    trust: Vec<String>,

    /// Script file to execute
    #[arg()]
    script_file: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Determine script source: -c, file, or stdin
    let source = if let Some(s) = cli.script.clone() {
        Some(s)
    } else if cli.script_file.is_some() {
        None // exec_file reads it
    } else {
        use std::io::IsTerminal;
        if std::io::stdin().is_terminal() {
            eprintln!(
                "Error: no script provided. Use -c 'script', provide a script file, or pipe via stdin."
            );
            std::process::exit(1);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).unwrap_or_default();
        Some(buf)
    };

    if let Some(s) = &source {
        if s.trim().is_empty() {
            if cli.json {
                println!("{}", serde_json::json!({"success": true, "output": ""}));
            }
            return;
        }
    }

    let sandbox = if cli.deny.is_empty() && cli.trust.is_empty() {
        None
    } else {
        Some(SandboxConfig {
            dangerous_commands: cli.deny.clone(),
            trusted_commands: cli.trust.clone(),
            ..Default::default()
        })
    };

    let shell = Shell::new(ShellOptions {
        sandbox,
        cache_dir: cli.cache_dir.clone(),
        cache_disabled: cli.no_cache,
        workers: cli.workers,
        ..Default::default()
    });

    let options = ExecOptions {
        timeout: cli.timeout.map(Duration::from_secs),
        parallel: cli.parallel,
        ..Default::default()
    };

    let result = match (&cli.script_file, &source) {
        (Some(path), _) => shell.exec_file(path, options).await,
        (None, Some(source)) => shell.exec(source, options).await,
        (None, None) => unreachable!("source resolved above"),
    };

    if cli.json {
        match serde_json::to_string(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: cannot serialize result: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print!("{}", result.output);
        if let Some(error) = &result.error {
            eprintln!("flowsh: {}", error);
        }
    }

    std::process::exit(if result.success { 0 } else { 1 });
}
