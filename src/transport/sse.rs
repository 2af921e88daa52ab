//! Server-sent-events transport over reqwest.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use super::http::{build_stream_client, event_stream_headers, status_to_error};
use super::{StreamHandle, StreamRequest, StreamTransport};
use crate::config::ThreadlineConfig;
use crate::error::{Result, ThreadlineError};
use crate::types::{StreamEvent, StreamMode};

/// Longest line the decoder buffers before giving up on the stream.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental SSE decoder.
///
/// Feed raw body chunks in; complete `data:` payloads come out. Bytes are
/// buffered until a newline so multi-byte characters split across chunks
/// survive. Invalid UTF-8 and overlong lines are stream errors.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending_data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk and return every record it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            raw.truncate(line_end);
            let line = String::from_utf8(raw).map_err(|e| {
                ThreadlineError::Stream(format!("stream line is not valid UTF-8: {e}"))
            })?;
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if !self.pending_data.is_empty() {
                    records.push(self.pending_data.join("\n"));
                    self.pending_data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                self.pending_data
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // event:, id: and retry: fields carry nothing we use.
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            let len = self.buffer.len();
            self.buffer.clear();
            return Err(ThreadlineError::Stream(format!(
                "stream line exceeds {MAX_LINE_BYTES} bytes ({len} buffered)"
            )));
        }
        Ok(records)
    }

    /// Flush a record left unterminated at end of body.
    pub fn finish(&mut self) -> Result<Option<String>> {
        let mut tail = std::mem::take(&mut self.buffer);
        tail.extend_from_slice(b"\n\n");
        Ok(self.push(&tail)?.into_iter().next())
    }
}

/// Parse one SSE data payload into a stream event.
pub fn parse_record(data: &str) -> Result<StreamEvent> {
    if data.trim() == "[DONE]" {
        return Ok(StreamEvent::End);
    }
    serde_json::from_str(data).map_err(|e| {
        ThreadlineError::Stream(format!("malformed stream record: {e}"))
    })
}

/// [`StreamTransport`] reading the thread stream endpoint as server-sent events.
#[derive(Debug, Clone)]
pub struct HttpSseTransport {
    config: ThreadlineConfig,
    client: reqwest::Client,
}

impl HttpSseTransport {
    pub fn new(config: ThreadlineConfig) -> Result<Self> {
        config.validate()?;
        let client = build_stream_client(&config)?;
        Ok(Self { config, client })
    }

    fn query(request: &StreamRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("thread_id", request.thread_id.to_string())];
        if request.mode == StreamMode::Interpretation {
            query.push(("mode", "interpretation".to_string()));
        }
        query
    }
}

#[async_trait]
impl StreamTransport for HttpSseTransport {
    async fn open(&self, request: &StreamRequest) -> Result<StreamHandle> {
        let url = self.config.endpoint(&self.config.stream_path);
        debug!(thread_id = %request.thread_id, mode = ?request.mode, "Opening thread stream");

        let resp = self
            .client
            .get(&url)
            .headers(event_stream_headers(&self.config)?)
            .query(&Self::query(request))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ThreadlineError::Network(e));
                        return;
                    }
                };
                let records = match decoder.push(&chunk) {
                    Ok(records) => records,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for data in records {
                    let parsed = parse_record(&data);
                    let stop = !matches!(parsed, Ok(ref event) if !event.is_terminal());
                    yield parsed;
                    if stop {
                        return;
                    }
                }
            }

            match decoder.finish() {
                Ok(Some(data)) => {
                    yield parse_record(&data);
                }
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                }
            }
        };

        Ok(StreamHandle::new(Box::pin(stream)))
    }
}
