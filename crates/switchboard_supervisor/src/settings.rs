//! Network settings handed to every spawned worker, and the resolution rules
//! of `listen`.

use tracing::debug;

/// Cloud platforms announce the address to bind in these variables.
pub const CLOUD_IP_VAR: &str = "IP";
pub const CLOUD_PORT_VAR: &str = "PORT";

/// Stored network configuration. Workers spawned later, including
/// replacements for crashed workers, always use the current values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub port: u16,
    pub bind_address: String,
    /// Pool size used when `listen` is not given one. `0` means one worker per
    /// CPU core.
    pub workers: usize,
    /// Whether an encrypted listener is configured.
    pub tls: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            workers: 1,
            tls: false,
        }
    }
}

/// Explicit arguments of `listen`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenOptions {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub workers: Option<usize>,
}

impl NetworkSettings {
    /// Applies `listen` arguments and returns the number of workers to start.
    ///
    /// An explicit port wins and disables the encrypted listener. Without one,
    /// the cloud environment (`IP`, `PORT`) overrides both the bind address and
    /// the stored port. Unparsable environment values are ignored.
    pub fn resolve<F>(&mut self, options: ListenOptions, lookup: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut bind_address = options.bind_address;
        match options.port {
            Some(port) => {
                self.port = port;
                self.tls = false;
            }
            None => {
                if let Some(ip) = lookup(CLOUD_IP_VAR).filter(|ip| !ip.is_empty()) {
                    bind_address = Some(ip);
                }
                if let Some(port) = lookup(CLOUD_PORT_VAR) {
                    match port.parse::<u16>() {
                        Ok(port) => self.port = port,
                        Err(_) => debug!("Ignoring unparsable {}={:?}", CLOUD_PORT_VAR, port),
                    }
                }
            }
        }
        if let Some(bind_address) = bind_address {
            self.bind_address = bind_address;
        }

        match options.workers.unwrap_or(self.workers) {
            0 => num_cpus::get(),
            count => count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_explicit_port_disables_tls_and_ignores_cloud() {
        let mut settings = NetworkSettings {
            tls: true,
            ..Default::default()
        };
        let count = settings.resolve(
            ListenOptions {
                port: Some(9000),
                ..Default::default()
            },
            env(&[("PORT", "7000"), ("IP", "10.0.0.5")]),
        );
        assert_eq!(count, 1);
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.bind_address, "0.0.0.0");
        assert!(!settings.tls);
    }

    #[test]
    fn test_cloud_environment_overrides_stored_values() {
        let mut settings = NetworkSettings {
            tls: true,
            ..Default::default()
        };
        settings.resolve(
            ListenOptions {
                bind_address: Some("127.0.0.1".into()),
                ..Default::default()
            },
            env(&[("PORT", "7000"), ("IP", "10.0.0.5")]),
        );
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.bind_address, "10.0.0.5");
        assert!(settings.tls);
    }

    #[test]
    fn test_explicit_bind_used_without_cloud() {
        let mut settings = NetworkSettings::default();
        settings.resolve(
            ListenOptions {
                bind_address: Some("127.0.0.1".into()),
                ..Default::default()
            },
            env(&[("PORT", "not-a-port")]),
        );
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_worker_count() {
        let mut settings = NetworkSettings {
            workers: 3,
            ..Default::default()
        };
        assert_eq!(settings.resolve(ListenOptions::default(), env(&[])), 3);
        let explicit = ListenOptions {
            workers: Some(5),
            ..Default::default()
        };
        assert_eq!(settings.resolve(explicit, env(&[])), 5);

        settings.workers = 0;
        assert_eq!(settings.resolve(ListenOptions::default(), env(&[])), num_cpus::get());
    }
}
