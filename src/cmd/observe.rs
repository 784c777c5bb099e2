//! `stepwatch observe`: run the reference observer.

use anyhow::Result;

use stepwatch::observer::{ObserverConfig, start_observer};

pub async fn cmd_observe(host: &str, port: u16) -> Result<()> {
    let config = ObserverConfig {
        host: host.to_string(),
        port,
    };
    start_observer(config).await
}
