/// Error type transports report. Any failure counts as a failed delivery.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Delivers a batch of serialized records to the ingestion server.
///
/// `batch` holds one JSON object per record, oldest first. Returning `Ok`
/// confirms the whole batch; any `Err` (network, timeout, rejection) is
/// treated as a uniform delivery failure. Timeouts are the transport's
/// concern.
///
/// Closures with the matching signature are transports:
///
/// ```
/// use eventstage::{Transport, TransportError};
///
/// let transport = |_url: &str, batch: &[String]| -> Result<(), TransportError> {
///     println!("would upload {} records", batch.len());
///     Ok(())
/// };
/// transport.send("https://ingest.example.com/sa", &[]).unwrap();
/// ```
pub trait Transport: Send + Sync {
    fn send(&self, server_url: &str, batch: &[String]) -> Result<(), TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&str, &[String]) -> Result<(), TransportError> + Send + Sync,
{
    fn send(&self, server_url: &str, batch: &[String]) -> Result<(), TransportError> {
        self(server_url, batch)
    }
}
