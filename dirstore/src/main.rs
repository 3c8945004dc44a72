#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Image contents come from disk, so production code must not unwrap.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::path::Path;
use std::sync::Arc;

use dirstore::config::StoreConfig;
use dirstore::storage::{Directory, Key, NodeStore, read_image, write_image};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Directory written by `build`, and its parent.
const BUILD_DIR: Key = Key::stat_data(1, 2);
const BUILD_PARENT: Key = Key::stat_data(0, 1);

const USAGE: &str = "usage:\n  dirstore build <image> <name>...\n  dirstore check <image>";

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dirstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(
        "Loaded configuration: node_size={}, key_format={}",
        config.node_size,
        config.key_format
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.as_slice() {
        [cmd, image, names @ ..] if cmd == "build" && !names.is_empty() => {
            build(config, Path::new(image), names)
        }
        [cmd, image] if cmd == "check" => check(config, Path::new(image)),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

/// Build a directory holding `names` and write it to `image`.
fn build(config: StoreConfig, image: &Path, names: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(NodeStore::new(config));
    let dir = Directory::create(store, BUILD_DIR, BUILD_PARENT)?;
    for (objectid, name) in (100..).zip(names) {
        dir.add_entry(name.as_bytes(), Key::stat_data(BUILD_DIR.objectid(), objectid))?;
    }
    write_image(image, &dir)?;
    println!(
        "{}: {} entries in {} leaves",
        image.display(),
        names.len() + 2,
        dir.leaves().len()
    );
    Ok(())
}

/// Load `image`, checking every leaf, and list its entries.
fn check(config: StoreConfig, image: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let dir = read_image(image, config)?;
    let entries = dir.entries()?;
    for (name, target) in &entries {
        println!("{:>20}  {}", target.objectid(), String::from_utf8_lossy(name));
    }
    println!(
        "{}: ok, {} entries in {} leaves",
        image.display(),
        entries.len(),
        dir.leaves().len()
    );
    Ok(())
}
