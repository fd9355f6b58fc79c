//! Track events while the network is down, then deliver them once it is back.

use eventstage::{PropertySet, Sdk, TransportError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("staging.jsonl");

    let online = Arc::new(AtomicBool::new(false));
    let link = online.clone();
    let upload = move |url: &str, batch: &[String]| -> Result<(), TransportError> {
        if !link.load(Ordering::SeqCst) {
            return Err("network unreachable".into());
        }
        println!("POST {url} ({} records)", batch.len());
        for record in batch {
            println!("  {record}");
        }
        Ok(())
    };

    let sdk = Sdk::builder(&path, "https://ingest.example.com/sa?project=demo", "device-7f3a")
        .flush_part_size(2)
        .init(upload)?;

    let mut plan = PropertySet::new();
    plan.set_string("plan", "free")?;
    sdk.register_super_properties(&plan)?;

    let mut props = PropertySet::new();
    props.set_string("screen", "home")?.set_int("load_ms", 182)?;
    sdk.track("AppViewScreen", &props)?;
    sdk.login("user-42")?;
    sdk.track_event("Checkout")?;

    if let Err(e) = sdk.flush() {
        println!("offline: {e}; {} record(s) stay staged", sdk.staged_count());
    }

    // Restart the client: staged records come back from disk.
    sdk.shutdown()?;
    drop(sdk);
    online.store(true, Ordering::SeqCst);

    let link = online.clone();
    let sdk = Sdk::builder(&path, "https://ingest.example.com/sa?project=demo", "user-42")
        .login_id(true)
        .init(move |url: &str, batch: &[String]| -> Result<(), TransportError> {
            assert!(link.load(Ordering::SeqCst));
            println!("POST {url} ({} records, after restart)", batch.len());
            Ok(())
        })?;
    println!("recovered {} staged record(s)", sdk.staged_count());
    println!("delivered {}", sdk.flush()?);

    sdk.shutdown()?;
    Ok(())
}
