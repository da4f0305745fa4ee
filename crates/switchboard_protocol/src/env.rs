//! Process environment handed to a worker at spawn time.
//!
//! Workers receive their listening configuration through environment variables,
//! never through command-line flags. A process that finds
//! [`WORKER_ID_VAR`] in its environment runs in worker mode.

use crate::error::ProtocolError;
use std::path::PathBuf;

pub const WORKER_ID_VAR: &str = "SWITCHBOARD_WORKER_ID";
pub const PORT_VAR: &str = "SWITCHBOARD_PORT";
pub const BIND_ADDR_VAR: &str = "SWITCHBOARD_BIND_ADDR";
pub const NO_TLS_VAR: &str = "SWITCHBOARD_NO_TLS";
pub const CONFIG_VAR: &str = "SWITCHBOARD_CONFIG";

/// Listening configuration for one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub worker_id: u32,
    pub port: u16,
    pub bind_address: String,
    pub no_tls: bool,
    /// Config file the worker re-reads for proxy trust and limits.
    pub config_path: Option<PathBuf>,
}

impl WorkerEnv {
    /// Environment variables to set on the spawned process.
    pub fn to_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (WORKER_ID_VAR, self.worker_id.to_string()),
            (PORT_VAR, self.port.to_string()),
            (BIND_ADDR_VAR, self.bind_address.clone()),
            (NO_TLS_VAR, if self.no_tls { "1" } else { "0" }.to_string()),
        ];
        if let Some(path) = &self.config_path {
            vars.push((CONFIG_VAR, path.to_string_lossy().into_owned()));
        }
        vars
    }

    /// Reads the worker environment through `lookup`.
    ///
    /// Returns `Ok(None)` when no worker id is present, i.e. the process is
    /// not a worker.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ProtocolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw_id) = lookup(WORKER_ID_VAR) else {
            return Ok(None);
        };
        let worker_id = raw_id.parse().map_err(|_| ProtocolError::InvalidEnv {
            name: WORKER_ID_VAR,
            value: raw_id.clone(),
        })?;

        let raw_port = lookup(PORT_VAR).unwrap_or_default();
        let port = raw_port.parse().map_err(|_| ProtocolError::InvalidEnv {
            name: PORT_VAR,
            value: raw_port.clone(),
        })?;

        let bind_address = lookup(BIND_ADDR_VAR)
            .filter(|addr| !addr.is_empty())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        // Any non-zero integer disables TLS.
        let no_tls = lookup(NO_TLS_VAR)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .is_some_and(|v| v != 0);

        Ok(Some(Self {
            worker_id,
            port,
            bind_address,
            no_tls,
            config_path: lookup(CONFIG_VAR).map(PathBuf::from),
        }))
    }

    pub fn from_process_env() -> Result<Option<Self>, ProtocolError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: Vec<(&'static str, String)>) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_round_trip() {
        let env = WorkerEnv {
            worker_id: 3,
            port: 8000,
            bind_address: "127.0.0.1".to_string(),
            no_tls: true,
            config_path: Some(PathBuf::from("/etc/switchboard.toml")),
        };
        let parsed = WorkerEnv::from_lookup(lookup_from(env.to_vars())).unwrap();
        assert_eq!(parsed, Some(env));
    }

    #[test]
    fn test_not_a_worker() {
        assert_eq!(WorkerEnv::from_lookup(|_| None), Ok(None));
    }

    #[test]
    fn test_invalid_port() {
        let lookup = lookup_from(vec![
            (WORKER_ID_VAR, "1".to_string()),
            (PORT_VAR, "http".to_string()),
        ]);
        assert!(matches!(
            WorkerEnv::from_lookup(lookup),
            Err(ProtocolError::InvalidEnv { name: PORT_VAR, .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let lookup = lookup_from(vec![
            (WORKER_ID_VAR, "1".to_string()),
            (PORT_VAR, "9000".to_string()),
            (NO_TLS_VAR, "0".to_string()),
        ]);
        let env = WorkerEnv::from_lookup(lookup).unwrap().unwrap();
        assert_eq!(env.bind_address, "0.0.0.0");
        assert!(!env.no_tls);
        assert!(env.config_path.is_none());
    }
}
