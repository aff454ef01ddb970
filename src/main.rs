// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin smoke-test harness for the flow-offload engine.
//!
//! Wires an [`OffloadCtx`] to a handful of mock netdevs (one physical port,
//! one vxlan port) and serves the admin dump endpoint over them. Useful for
//! exercising the engine by hand and as an end-to-end sanity check; it owns
//! no offload logic of its own.

use std::sync::Arc;

use clap::Parser;
use offload_core::{DpifClass, OdpPort, OffloadConfig};
use offload_engine::OffloadCtx;
use offload_netdev::mock::MockNetdevBackend;
use offload_netdev::PortKind;

/// Command-line arguments for the smoke-test harness.
#[derive(Parser, Debug)]
#[command(name = "flow-offload-cli", about = "Flow-offload engine smoke-test harness")]
struct Args {
    /// Path to a JSON config file; falls back to `OffloadConfig::default()`.
    #[arg(long = "config")]
    config_path: Option<String>,

    /// Overrides the admin HTTP bind address from the config file.
    #[arg(long = "admin-bind-address")]
    admin_bind_address: Option<String>,

    /// Number of physical ports to register on the mock backend.
    #[arg(long = "physical-ports", default_value_t = 2)]
    physical_ports: u32,

    /// Number of vxlan (tunnel) ports to register on the mock backend.
    #[arg(long = "vxlan-ports", default_value_t = 1)]
    vxlan_ports: u32,
}

fn load_config(args: &Args) -> OffloadConfig {
    let mut config = match &args.config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read config file '{path}': {e}"));
            OffloadConfig::from_json(&raw)
                .unwrap_or_else(|e| panic!("failed to parse config file '{path}': {e}"))
        }
        None => OffloadConfig::default(),
    };
    if let Some(addr) = &args.admin_bind_address {
        config.admin_bind_address = addr.clone();
    }
    config
}

fn build_mock_backend(args: &Args) -> Arc<MockNetdevBackend> {
    let backend = Arc::new(MockNetdevBackend::new());
    let dpif_class = DpifClass(0);
    for i in 0..args.physical_ports {
        let port = OdpPort(i + 1);
        let _ = backend.register_port(dpif_class, port, &format!("eth{i}"), PortKind::Physical);
    }
    let vxlan_base = args.physical_ports;
    for i in 0..args.vxlan_ports {
        let port = OdpPort(vxlan_base + i + 1);
        let _ = backend.register_port(dpif_class, port, &format!("vxlan{i}"), PortKind::Vxlan);
    }
    backend
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args);
    let backend = build_mock_backend(&args);

    tracing::info!(
        physical_ports = args.physical_ports,
        vxlan_ports = args.vxlan_ports,
        "mock netdev backend ready"
    );

    let ctx = OffloadCtx::new(&config, backend);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    // Held for the lifetime of the process: the admin server's graceful
    // shutdown only fires once this sender is dropped or signaled, and
    // this harness has no signal handling wired up to trigger either.
    let _shutdown_tx = shutdown_tx;

    if let Err(e) = offload_admin::run(&config.admin_bind_address, DpifClass(0), ctx, shutdown_rx).await {
        tracing::error!(error = %e, "admin server exited with an error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_register_expected_port_counts() {
        let args = Args::parse_from(["flow-offload-cli"]);
        let backend = build_mock_backend(&args);
        assert_eq!(backend.installed_count(), 0);
        assert!(backend
            .port_netdev(DpifClass(0), OdpPort(1))
            .is_some());
        assert!(backend
            .port_netdev(DpifClass(0), OdpPort(3))
            .is_some());
    }

    #[test]
    fn admin_bind_address_override_wins_over_config_default() {
        let args = Args::parse_from([
            "flow-offload-cli",
            "--admin-bind-address",
            "127.0.0.1:9999",
        ]);
        let config = load_config(&args);
        assert_eq!(config.admin_bind_address, "127.0.0.1:9999");
    }
}
