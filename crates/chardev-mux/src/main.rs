//! chardev-mux demo entry point.
//!
//! Builds the chardevs named in the configuration file, binds a console and
//! a monitor frontend to every mux (a single console frontend to every plain
//! chardev), and drives the readiness loop until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config_from(path)     -- argv[1] or the platform config path
//!  └─ ChardevRegistry::with_policy
//!       ├─ create(label, backend)         per [[chardevs]] entry
//!       └─ create_mux("{label}-mux", ...) when mux = true
//!  └─ bind frontends, install handlers
//!  └─ MainLoop::run(10 ms, ctrl_c)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chardev_core::ReadinessHost;
use chardev_mux::infrastructure::backends::BackendKind;
use chardev_mux::infrastructure::main_loop::MainLoop;
use chardev_mux::infrastructure::storage::config::{self, AppConfig, ChardevEntry};
use chardev_mux::{CharFrontend, Chardev, ChardevRegistry, Handlers, ReadPolicy};

const LOOP_PERIOD: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = match std::env::args_os().nth(1) {
        Some(p) => PathBuf::from(p),
        None => config::config_file_path().context("resolving config path")?,
    };
    let mut cfg = config::load_config_from(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level)),
        )
        .init();

    info!("chardev-mux starting (config {})", path.display());

    if cfg.chardevs.is_empty() {
        cfg.chardevs.push(ChardevEntry {
            label: "serial0".to_string(),
            kind: BackendKind::Memory,
            mux: true,
        });
    }

    let main_loop = Arc::new(MainLoop::new());
    let host: Arc<dyn ReadinessHost> = main_loop.clone();
    let registry = ChardevRegistry::with_policy(host, ReadPolicy::from(&cfg.io));

    let frontends = build_frontends(&registry, &cfg)?;
    info!(
        "{} chardev(s) ready: {}.  Press Ctrl-C to exit.",
        registry.len(),
        registry.labels().join(", ")
    );

    let iterations = main_loop
        .run(LOOP_PERIOD, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot listen for Ctrl-C: {e}");
            }
        })
        .await;

    info!("shutdown after {iterations} loop iterations");
    drop(frontends);
    info!("chardev-mux stopped");
    Ok(())
}

/// Creates every configured chardev and binds the demo frontends.
fn build_frontends(registry: &ChardevRegistry, cfg: &AppConfig) -> anyhow::Result<Vec<CharFrontend>> {
    let mut frontends = Vec::new();
    for entry in &cfg.chardevs {
        let base = registry
            .create(&entry.label, entry.kind.build())
            .with_context(|| format!("creating chardev '{}'", entry.label))?;

        if !entry.mux {
            frontends.push(attach(&base, "console")?);
            continue;
        }

        let mux_label = entry.mux_label();
        let mux = registry
            .create_mux(&mux_label, &entry.label)
            .with_context(|| format!("creating mux '{mux_label}'"))?;
        frontends.push(attach(&mux, "console")?);
        frontends.push(attach(&mux, "monitor")?);
    }
    Ok(frontends)
}

/// Binds a frontend named `name` to `chr` and installs logging handlers.
fn attach(chr: &Arc<Chardev>, name: &'static str) -> anyhow::Result<CharFrontend> {
    let mut fe = CharFrontend::new();
    let tag = fe
        .bind(chr)
        .with_context(|| format!("binding {name} to '{}'", chr.label()))?;

    let label = chr.label().to_string();
    fe.set_handlers(
        Handlers::new()
            .on_can_read(|| 256)
            .on_read(move |bytes| {
                info!("{name}@{label}: {}", String::from_utf8_lossy(bytes).trim_end());
            })
            .on_event(move |event| info!("{name}: {event:?}")),
        None,
        true,
    );
    fe.print(format_args!("{name} attached at slot {tag}\r\n"))
        .with_context(|| format!("greeting on '{}'", chr.label()))?;
    Ok(fe)
}
