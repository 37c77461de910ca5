//! Back-end connection handler.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::parser::{self, Limits};
use crate::provider::SequenceProvider;

/// Reply sent when the sequence service call fails.
pub const PROVIDER_FAILURE: &str = "Failed to retrieve random sequence";

/// Handle one back-end connection.
///
/// Exactly one read is taken as the request. The reply is either the
/// provider's body or an error string, and the connection is shut down
/// afterwards either way.
pub async fn handle_connection<S>(
    mut stream: S,
    provider: &dyn SequenceProvider,
    limits: &Limits,
    read_limit: usize,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(read_limit);
    let n = stream.read(&mut buffer).await?;
    buffer.truncate(n);

    let data = String::from_utf8_lossy(&buffer);
    debug!(data = %data.trim(), "Data received");

    let reply = match parser::parse(&data, limits) {
        Ok(request) => match provider.fetch(&request).await {
            Ok(body) => {
                debug!(%request, bytes = body.len(), "Sequence retrieved");
                body
            }
            Err(e) => {
                warn!(error = %e, %request, "Sequence provider failed");
                PROVIDER_FAILURE.to_string()
            }
        },
        Err(e) => {
            info!(reason = %e, "Rejected request");
            e.to_string()
        }
    };

    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
