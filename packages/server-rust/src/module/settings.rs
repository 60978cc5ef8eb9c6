//! Module process settings, read from flags or the environment.

use clap::Args;

/// Port a module listens on when `MODULE_PORT` is unset.
pub const DEFAULT_MODULE_PORT: u16 = 55190;

#[derive(Debug, Clone, Args)]
pub struct ModuleSettings {
    /// Base URL of the core, e.g. `http://127.0.0.1:55152`.
    #[arg(long = "core-url", env = "CONDUIT_CORE", default_value = "http://127.0.0.1:55152")]
    pub core_url: String,

    /// Address advertised to the core. Defaults to the bound loopback address.
    #[arg(long = "service-url", env = "SERVICE_URL")]
    pub service_url: Option<String>,

    #[arg(long = "module-host", env = "MODULE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// 0 picks a free port.
    #[arg(long = "module-port", env = "MODULE_PORT", default_value_t = DEFAULT_MODULE_PORT)]
    pub port: u16,

    /// Prometheus exporter port; metrics stay in-process when unset.
    #[arg(long = "metrics-port", env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            core_url: "http://127.0.0.1:55152".to_string(),
            service_url: None,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_MODULE_PORT,
            metrics_port: None,
        }
    }
}

impl ModuleSettings {
    /// Address the core should dial for this instance.
    #[must_use]
    pub fn advertised_address(&self, bound_port: u16) -> String {
        match &self.service_url {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://127.0.0.1:{bound_port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        module: ModuleSettings,
    }

    #[test]
    fn advertised_address_prefers_service_url() {
        let mut settings = ModuleSettings::default();
        assert_eq!(settings.advertised_address(4000), "http://127.0.0.1:4000");
        settings.service_url = Some("http://files:55190/".to_string());
        assert_eq!(settings.advertised_address(4000), "http://files:55190");
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from(["module", "--module-port", "0", "--core-url", "http://core:1"]);
        assert_eq!(cli.module.port, 0);
        assert_eq!(cli.module.core_url, "http://core:1");
        assert_eq!(cli.module.host, "0.0.0.0");
    }
}
