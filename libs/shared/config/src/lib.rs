use std::env;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

const DEFAULT_CLINIC_TIMEZONE: &str = "Europe/Warsaw";
const DEFAULT_SLOT_INTERVAL_MINUTES: i64 = 30;
const DEFAULT_CANCELLATION_FEE: f64 = 50.0;
const DEFAULT_PORT: u16 = 3000;

/// Where appointment, working-hours and record data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Supabase,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(StorageBackend::Supabase),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Supabase => write!(f, "supabase"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub jwt_secret: String,
    pub storage_backend: StorageBackend,
    /// IANA zone name all clinic-local timestamps are interpreted in.
    pub clinic_timezone: String,
    pub slot_interval_minutes: i64,
    pub cancellation_fee: f64,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Missing or
    /// malformed values fall back to defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = lookup("SUPABASE_URL").unwrap_or_else(|| {
            warn!("SUPABASE_URL not set, using empty value");
            String::new()
        });
        let supabase_anon_key = lookup("SUPABASE_ANON_PUBLIC_KEY").unwrap_or_else(|| {
            warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
            String::new()
        });
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set, using empty value");
            String::new()
        });

        let supabase_configured = !supabase_url.is_empty() && !supabase_anon_key.is_empty();
        let default_backend = if supabase_configured {
            StorageBackend::Supabase
        } else {
            StorageBackend::Memory
        };
        let storage_backend = parse_or_default(&lookup, "STORAGE_BACKEND", default_backend);

        let clinic_timezone = lookup("CLINIC_TIMEZONE").unwrap_or_else(|| {
            warn!("CLINIC_TIMEZONE not set, using {}", DEFAULT_CLINIC_TIMEZONE);
            DEFAULT_CLINIC_TIMEZONE.to_string()
        });

        let config = Self {
            supabase_url,
            supabase_anon_key,
            jwt_secret,
            storage_backend,
            clinic_timezone,
            slot_interval_minutes: parse_or_default(
                &lookup,
                "SLOT_INTERVAL_MINUTES",
                DEFAULT_SLOT_INTERVAL_MINUTES,
            ),
            cancellation_fee: parse_or_default(&lookup, "CANCELLATION_FEE", DEFAULT_CANCELLATION_FEE),
            port: parse_or_default(&lookup, "PORT", DEFAULT_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let storage_ready = match self.storage_backend {
            StorageBackend::Supabase => self.is_supabase_configured(),
            StorageBackend::Memory => true,
        };
        storage_ready && !self.jwt_secret.is_empty()
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default);
            default
        }),
        None => default,
    }
}
