//! Console demo host.
//!
//! Creates the manager, watches the framework events, loads every plugin
//! from a directory (default `dist/plugins`, built by `cargo xtask dist`),
//! and exercises default resolution, alias resolution, and the logger
//! service before unloading everything again.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use axon::{
    ComponentRegistered, Delivery, EventBusExt, Introspect, Manager, PluginLoadFailed,
    PluginLoaded,
};
use demo_api::{Logger, Simple};

/// Subscriber identity for the host's event callbacks.
struct HostObserver;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let plugin_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dist/plugins"));

    let manager = Manager::create();

    let observer = Arc::new(HostObserver);
    manager.subscribe_global(&observer, Delivery::Direct, |event: &ComponentRegistered| {
        info!(
            class = %event.class_id,
            alias = event.alias.as_deref().unwrap_or("-"),
            singleton = event.singleton,
            "component registered"
        );
    });
    manager.subscribe_global(&observer, Delivery::Direct, |event: &PluginLoaded| {
        info!(path = %event.path.display(), "plugin loaded");
    });
    manager.subscribe_global(&observer, Delivery::Direct, |event: &PluginLoadFailed| {
        warn!(path = %event.path.display(), error = %event.error, "plugin failed to load");
    });

    info!(dir = %plugin_dir.display(), "scanning for plugins");
    manager.load_plugins_from_dir(&plugin_dir, true);

    match manager.get_default::<dyn Simple>() {
        Ok(simple) => info!("default Simple says: {}", simple.simple_string()),
        Err(error) => warn!(%error, "no default Simple implementation"),
    }

    match manager.create_instance::<dyn Simple>("Simple.B") {
        Ok(simple) => info!("Simple.B says: {}", simple.simple_string()),
        Err(error) => warn!(%error, "Simple.B not available"),
    }

    match manager.get_service::<dyn Logger>("Logger.Default") {
        Ok(logger) => logger.log("demo host is alive"),
        Err(error) => warn!(%error, "Logger.Default not available"),
    }

    let query = manager
        .get_default::<dyn Introspect>()
        .expect("introspection is always resolvable");
    for details in query.components() {
        info!(
            class = %details.class_id,
            alias = details.alias.as_deref().unwrap_or("-"),
            source = %details
                .source
                .as_deref()
                .unwrap_or_else(|| std::path::Path::new("<host>"))
                .display(),
            "registered"
        );
    }
    drop(query);

    manager.unload_all();
    info!("unloaded; core services remain resolvable");
}
