// crates/msq_cli/src/main.rs
//
// MSQ-ENGINE v1 — CLI entrypoint
// Drives one request through the fixed pipeline end-to-end and writes
// canonical artifacts (response.json, digest.txt).
// Strictly offline apart from declared effects: no OS RNG, no clock in any
// digest path.

mod args;

use args::{load_request, parse_and_validate, Args};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use msq_core::EngineConfig;
use msq_io::canonical_json::to_canonical_bytes;
use msq_io::sig::HOST_PUBLIC_KEY;
use msq_io::snapshot::Snapshot;
use msq_pipeline as pipeline;

// Filenames for emitted artifacts in the output directory.
const RESPONSE_FILE: &str = "response.json";
const DIGEST_FILE: &str = "digest.txt";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_and_validate() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("msq: error: {e}");
            return ExitCode::from(1);
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("msq: error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Run the whole orchestration. Returns the process exit code per policy:
/// 0 = completed request, 3 = request trapped (artifacts still written),
/// 1 = environment/CLI failure.
fn run(args: Args) -> anyhow::Result<ExitCode> {
    let snapshot_bytes = fs::read(&args.snapshot)
        .map_err(|e| anyhow::anyhow!("cannot read snapshot {}: {e}", args.snapshot.display()))?;

    let key: Vec<u8> = match &args.key {
        Some(hex_key) => hex::decode(hex_key)?,
        None => HOST_PUBLIC_KEY.to_vec(),
    };

    if args.verify_only {
        let snap = Snapshot::load(&snapshot_bytes, &key)
            .map_err(|e| anyhow::anyhow!("snapshot rejected: {e}"))?;
        if !args.quiet {
            println!("{}", snap.hash_hex());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let request = load_request(args.request.as_ref())?;
    let config = EngineConfig {
        db_path: args.db.clone(),
        verify_tls: !args.insecure,
        ..EngineConfig::default()
    };

    let outcome = pipeline::run_with(&snapshot_bytes, &request, args.gas, &config, &key, |_| {});

    fs::create_dir_all(&args.out)
        .map_err(|e| anyhow::anyhow!("cannot create output directory {}: {e}", args.out.display()))?;
    let envelope_bytes = to_canonical_bytes(&outcome.envelope.to_json());
    write_bytes_atomically(&args.out.join(RESPONSE_FILE), &envelope_bytes)?;
    write_bytes_atomically(
        &args.out.join(DIGEST_FILE),
        format!("{}\n", outcome.response_sha256).as_bytes(),
    )?;

    if !args.quiet {
        println!(
            "status={} gas_used={} sha256={}",
            outcome.envelope.status_code, outcome.gas_used, outcome.response_sha256
        );
    }

    Ok(if outcome.error.is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(3)
    })
}

/// Write via temp file + rename in the same directory so readers never see
/// a torn artifact.
fn write_bytes_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string())
    ));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Cross-device fallback: write directly, then drop the temp.
            fs::write(path, bytes)?;
            let _ = fs::remove_file(&tmp);
            Ok(())
        }
    }
}
