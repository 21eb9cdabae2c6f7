//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::{locator::decode_pubkey, nip44, schema::DEFAULT_VIEW_KEY};

/// Relays used when `RELAYS` is unset or empty.
pub const DEFAULT_RELAYS: [&str; 3] = [
    "wss://relay.damus.io",
    "wss://relay.primal.net",
    "wss://nos.lol",
];

pub const DEFAULT_BIND_HTTP: &str = "127.0.0.1:7780";
pub const DEFAULT_LOCATOR_BASE: &str = "https://formstr.app";

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for saved forms.
    pub store_root: PathBuf,
    /// Relays to read from and publish to.
    pub relays: Vec<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// HTTP bind address for `serve`.
    pub bind_http: String,
    /// Where `watch` and `assemble --pdf` write PDFs.
    pub out_dir: PathBuf,
    /// Only accept submissions from these authors (hex); empty accepts all.
    pub allowed_authors: Vec<String>,
    /// Base URL for shareable locators.
    pub locator_base: String,
    /// Public key paired with the credential to read private templates.
    pub view_pubkey: String,
    /// How long to wait for the form template.
    pub schema_timeout: Duration,
    /// Enable Schnorr signature verification on relay events.
    pub verify_sig: bool,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT is not set")?);
        let mut relays = csv_strings(env::var("RELAYS").unwrap_or_default());
        if relays.is_empty() {
            relays = DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect();
        }
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        let bind_http = non_empty("BIND_HTTP").unwrap_or_else(|| DEFAULT_BIND_HTTP.into());
        let out_dir = non_empty("OUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| store_root.join("invoices"));
        let allowed_authors = csv_strings(env::var("ALLOWED_AUTHORS").unwrap_or_default())
            .iter()
            .map(|a| decode_pubkey(a).with_context(|| format!("ALLOWED_AUTHORS entry {a}")))
            .collect::<Result<Vec<_>>>()?;
        let locator_base = non_empty("LOCATOR_BASE")
            .unwrap_or_else(|| DEFAULT_LOCATOR_BASE.into())
            .trim_end_matches('/')
            .to_string();
        let view_key = non_empty("VIEW_KEY").unwrap_or_else(|| DEFAULT_VIEW_KEY.into());
        let view_pubkey = nip44::public_key_hex(&view_key).context("VIEW_KEY is not a secret key")?;
        let schema_timeout = Duration::from_secs(
            non_empty("SCHEMA_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "0".into()) == "1";
        Ok(Self {
            store_root,
            relays,
            tor_socks,
            bind_http,
            out_dir,
            allowed_authors,
            locator_base,
            view_pubkey,
            schema_timeout,
            verify_sig,
        })
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.trim().is_empty())
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{fs, sync::Mutex};
    use tempfile::tempdir;

    pub(crate) static ENV_MUTEX: Mutex<()> = Mutex::new(());

    pub(crate) const VARS: [&str; 10] = [
        "STORE_ROOT",
        "RELAYS",
        "TOR_SOCKS",
        "BIND_HTTP",
        "OUT_DIR",
        "ALLOWED_AUTHORS",
        "LOCATOR_BASE",
        "VIEW_KEY",
        "SCHEMA_TIMEOUT_SECS",
        "VERIFY_SIG",
    ];

    pub(crate) fn clear_env() {
        for v in VARS.iter() {
            env::remove_var(v);
        }
    }

    #[test]
    fn loads_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let author = "ab".repeat(32);
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!(
                concat!(
                    "STORE_ROOT=/tmp/forms\n",
                    "RELAYS=\"ws://r1, ws://r2\"\n",
                    "TOR_SOCKS=127.0.0.1:9050\n",
                    "BIND_HTTP=127.0.0.1:8080\n",
                    "OUT_DIR=/tmp/out\n",
                    "ALLOWED_AUTHORS={}\n",
                    "LOCATOR_BASE=https://forms.example/\n",
                    "VIEW_KEY={}\n",
                    "SCHEMA_TIMEOUT_SECS=3\n",
                    "VERIFY_SIG=1\n",
                ),
                author,
                "00".repeat(31) + "05",
            ),
        )
        .unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.store_root, PathBuf::from("/tmp/forms"));
        assert_eq!(cfg.relays, vec!["ws://r1", "ws://r2"]);
        assert_eq!(cfg.tor_socks, Some("127.0.0.1:9050".into()));
        assert_eq!(cfg.bind_http, "127.0.0.1:8080");
        assert_eq!(cfg.out_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.allowed_authors, vec![author]);
        assert_eq!(cfg.locator_base, "https://forms.example");
        assert_eq!(
            cfg.view_pubkey,
            nip44::public_key_hex(&("00".repeat(31) + "05")).unwrap()
        );
        assert_eq!(cfg.schema_timeout, Duration::from_secs(3));
        assert!(cfg.verify_sig);
    }

    #[test]
    fn csv_helpers() {
        assert_eq!(csv_strings("a, b , ,c"), vec!["a", "b", "c"]);
        assert!(csv_strings("").is_empty());
    }

    #[test]
    fn defaults_when_optional_absent() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "STORE_ROOT=/tmp/forms\nRELAYS=\nTOR_SOCKS=\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.relays.len(), 3);
        assert_eq!(cfg.relays[0], "wss://relay.damus.io");
        assert!(cfg.tor_socks.is_none());
        assert_eq!(cfg.bind_http, DEFAULT_BIND_HTTP);
        assert_eq!(cfg.out_dir, PathBuf::from("/tmp/forms/invoices"));
        assert!(cfg.allowed_authors.is_empty());
        assert_eq!(cfg.locator_base, DEFAULT_LOCATOR_BASE);
        assert_eq!(
            cfg.view_pubkey,
            nip44::public_key_hex(DEFAULT_VIEW_KEY).unwrap()
        );
        assert_eq!(cfg.schema_timeout, Duration::from_secs(10));
        assert!(!cfg.verify_sig);
    }

    #[test]
    fn missing_required_fields_error() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "BIND_HTTP=127.0.0.1:8080\n").unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn bad_allowed_author_errors() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "STORE_ROOT=/tmp\nALLOWED_AUTHORS=not-a-key\n").unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn invalid_timeout_falls_back() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, "STORE_ROOT=/tmp\nSCHEMA_TIMEOUT_SECS=soon\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.schema_timeout, Duration::from_secs(10));
    }
}
