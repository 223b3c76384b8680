//! Stream transports used by the controller.

use crate::client::config::ControllerConfig;
use crate::client::sse::{Frame, SseDecoder};
use crate::error::{Result, SystemError};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::time::Duration;

/// Frames from one live connection.
///
/// An `Err` item or the end of the stream means the connection is dead.
/// Keep-alive frames carry no data but prove the peer is still there.
pub type MessageStream = BoxStream<'static, Result<Frame>>;

/// Opens stream connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. Resolves once the server accepted the stream,
    /// which is the controller's "connected" signal.
    async fn connect(&self) -> Result<MessageStream>;
}

/// SSE over HTTP, using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let url = stream_url(&config.base_url, config.interval_ms)?;
        let client = Client::builder()
            .user_agent(concat!("slice_of_pi/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// `<base>/api/stream?interval=<ms>`
pub fn stream_url(base_url: &str, interval_ms: u64) -> Result<Url> {
    let base = Url::parse(base_url)
        .map_err(|e| SystemError::config_error(format!("Invalid server URL {:?}: {}", base_url, e)))?;
    let mut url = base
        .join("/api/stream")
        .map_err(|e| SystemError::config_error(format!("Invalid server URL {:?}: {}", base_url, e)))?;
    url.query_pairs_mut()
        .append_pair("interval", &interval_ms.to_string());
    Ok(url)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<MessageStream> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SystemError::network_error(format!(
                "stream endpoint answered {}",
                status
            )));
        }

        let mut decoder = SseDecoder::new();
        let messages = response
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<Frame>> {
                let decoded = chunk
                    .map_err(SystemError::from)
                    .and_then(|bytes| decoder.push(&bytes));
                match decoded {
                    Ok(frames) => frames.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                }
            })
            .flat_map(stream::iter);

        Ok(messages.boxed())
    }
}
