// crates/msq_cli/src/args.rs
//
// Deterministic, offline CLI argument parsing & validation.
// - No networked paths (reject any "<scheme>://" argument)
// - Gas limit validated against the protocol bounds before anything loads
// - Request files are plain JSON; absent file means an empty GET /

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use msq_core::gas::{MAX_GAS_LIMIT, MIN_GAS_LIMIT};
use msq_core::{Method, Request};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "msq", about = "Run one request against a signed .msqs snapshot")]
pub struct Args {
    /// Signed snapshot file (.msqs).
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Request JSON file; omitted means an empty GET /.
    #[arg(long)]
    pub request: Option<PathBuf>,

    /// Gas budget for the run.
    #[arg(long, default_value_t = 1_000_000)]
    pub gas: u64,

    /// Output directory for response.json and digest.txt.
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Database location for the per-request pool.
    #[arg(long, default_value = ":memory:")]
    pub db: String,

    /// Hex-encoded uncompressed P-256 key overriding the embedded one
    /// (packaging and CI use this; production hosts rely on the baked key).
    #[arg(long)]
    pub key: Option<String>,

    /// Disable TLS verification for HttpOut. Dev-only.
    #[arg(long)]
    pub insecure: bool,

    /// Stop after signature verification; print the snapshot hash.
    #[arg(long)]
    pub verify_only: bool,

    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug)]
pub enum CliError {
    BadGas(u64),
    NonLocalPath(String),
    BadKey(String),
    BadRequest(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::BadGas(n) => write!(
                f,
                "gas limit {n} outside [{MIN_GAS_LIMIT}, {MAX_GAS_LIMIT}]"
            ),
            CliError::NonLocalPath(p) => write!(f, "non-local path rejected: {p}"),
            CliError::BadKey(m) => write!(f, "bad verification key: {m}"),
            CliError::BadRequest(m) => write!(f, "bad request file: {m}"),
        }
    }
}

impl std::error::Error for CliError {}

/// Returns true if `s` looks like a URL (any `<scheme>://`, incl. file://).
fn looks_like_url(s: &str) -> bool {
    s.trim().contains("://")
}

pub fn parse_and_validate() -> Result<Args, CliError> {
    let args = Args::parse();
    validate(&args)?;
    Ok(args)
}

pub fn validate(args: &Args) -> Result<(), CliError> {
    if !(MIN_GAS_LIMIT..=MAX_GAS_LIMIT).contains(&args.gas) {
        return Err(CliError::BadGas(args.gas));
    }
    for p in [Some(&args.snapshot), args.request.as_ref(), Some(&args.out)]
        .into_iter()
        .flatten()
    {
        let text = p.to_string_lossy();
        if looks_like_url(&text) {
            return Err(CliError::NonLocalPath(text.to_string()));
        }
    }
    if let Some(key) = &args.key {
        let decoded = hex::decode(key).map_err(|e| CliError::BadKey(e.to_string()))?;
        if decoded.len() != msq_io::sig::PUBLIC_KEY_LEN {
            return Err(CliError::BadKey(format!(
                "expected {} bytes, got {}",
                msq_io::sig::PUBLIC_KEY_LEN,
                decoded.len()
            )));
        }
    }
    Ok(())
}

/// On-disk request shape. Bodies are text (the engine exposes them to guest
/// code as UTF-8 anyway).
#[derive(Debug, Deserialize)]
pub struct RequestFile {
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

impl RequestFile {
    pub fn into_request(self) -> Result<Request, CliError> {
        let method =
            Method::from_str(&self.method).map_err(CliError::BadRequest)?;
        let mut req = Request::new(method, self.path);
        for (name, value) in self.headers {
            req = req.with_header(name, value);
        }
        if let Some(body) = self.body {
            req = req.with_body(body.into_bytes());
        }
        req.content_type = self.content_type;
        Ok(req)
    }
}

/// Load a request file, or synthesize the empty GET /.
pub fn load_request(path: Option<&PathBuf>) -> Result<Request, CliError> {
    match path {
        None => Ok(Request::new(Method::Get, "/")),
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .map_err(|e| CliError::BadRequest(format!("{}: {e}", p.display())))?;
            let file: RequestFile =
                serde_json::from_str(&text).map_err(|e| CliError::BadRequest(e.to_string()))?;
            file.into_request()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            snapshot: PathBuf::from("app.msqs"),
            request: None,
            gas: 10_000,
            out: PathBuf::from("."),
            db: ":memory:".to_string(),
            key: None,
            insecure: false,
            verify_only: false,
            quiet: false,
        }
    }

    #[test]
    fn gas_bounds_enforced() {
        let mut args = base_args();
        args.gas = 0;
        assert!(matches!(validate(&args), Err(CliError::BadGas(0))));
        args.gas = MAX_GAS_LIMIT + 1;
        assert!(validate(&args).is_err());
        args.gas = MAX_GAS_LIMIT;
        assert!(validate(&args).is_ok());
    }

    #[test]
    fn url_paths_rejected() {
        let mut args = base_args();
        args.snapshot = PathBuf::from("https://evil.example/app.msqs");
        assert!(matches!(validate(&args), Err(CliError::NonLocalPath(_))));
    }

    #[test]
    fn key_must_be_65_hex_bytes() {
        let mut args = base_args();
        args.key = Some("04ab".to_string());
        assert!(matches!(validate(&args), Err(CliError::BadKey(_))));
        args.key = Some(hex::encode([4u8; 65]));
        assert!(validate(&args).is_ok());
    }

    #[test]
    fn request_file_parses() {
        let file: RequestFile = serde_json::from_str(
            r#"{"method":"POST","path":"/run","headers":[["x-request-id","r1"]],"body":"{}"}"#,
        )
        .unwrap();
        let req = file.into_request().unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.header("X-Request-Id"), Some("r1"));
        assert_eq!(req.body, b"{}");
    }
}
