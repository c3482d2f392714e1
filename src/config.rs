use std::path::PathBuf;
use std::str::FromStr;

/// How a candidate date selection is tested against existing bookings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Treat a sparse selection as reserving every day of its bounding range.
    #[default]
    BoundingRange,
    /// Intersect the reserved date sets exactly.
    ExactDates,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bounding-range" | "range" => Ok(ConflictPolicy::BoundingRange),
            "exact-dates" | "exact" => Ok(ConflictPolicy::ExactDates),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// Which bookings may open a pre-journey record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JourneyGuard {
    /// Any existing booking.
    #[default]
    AnyStatus,
    /// Only bookings in `confirmed`.
    RequireConfirmed,
}

impl FromStr for JourneyGuard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any-status" | "any" => Ok(JourneyGuard::AnyStatus),
            "require-confirmed" | "confirmed" => Ok(JourneyGuard::RequireConfirmed),
            other => Err(format!("unknown journey guard: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub conflict_policy: ConflictPolicy,
    pub journey_guard: JourneyGuard,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Read `CARSHARE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys fall back to defaults;
    /// set-but-unparseable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        fn parsed<T: FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>, String>
        where
            T::Err: std::fmt::Display,
        {
            match lookup(key) {
                Some(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|e| format!("{key}: {e}")),
                None => Ok(None),
            }
        }

        Ok(Self {
            bind: lookup("CARSHARE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "CARSHARE_PORT")?.unwrap_or(5433),
            data_dir: PathBuf::from(lookup("CARSHARE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("CARSHARE_PASSWORD").unwrap_or_else(|| "carshare".into()),
            max_connections: parsed(&lookup, "CARSHARE_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parsed(&lookup, "CARSHARE_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&lookup, "CARSHARE_METRICS_PORT")?,
            tls_cert: lookup("CARSHARE_TLS_CERT"),
            tls_key: lookup("CARSHARE_TLS_KEY"),
            engine: EngineConfig {
                conflict_policy: parsed(&lookup, "CARSHARE_CONFLICT_POLICY")?.unwrap_or_default(),
                journey_guard: parsed(&lookup, "CARSHARE_JOURNEY_GUARD")?.unwrap_or_default(),
            },
        })
    }
}
