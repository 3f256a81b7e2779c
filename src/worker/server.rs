//! Worker-side request handling.
//!
//! A [`Worker`] runs inside a worker process (or a blocking thread in thread
//! mode). It owns at most one provider, rebuilt from the handle sent with
//! `setFlysystem`, and maps each RPC method onto a direct provider call.

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::protocol::{
    codes, decode_contents, encode_contents, methods, ErrorInfo, ListOrder, Payload, PathParams,
    ReadResponse, ReaddirParams, RenameParams, RenameResponse, RequestEnvelope, ResponseEnvelope,
    SetProviderParams, StatResponse, UnlinkResponse, WriteParams, WriteResponse,
};
use crate::provider::{Provider, ProviderError};

/// RPC handler holding one provider.
#[derive(Default)]
pub struct Worker {
    provider: Option<Box<dyn Provider>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("has_provider", &self.has_provider())
            .finish()
    }
}

fn parse<T: DeserializeOwned>(params: Payload) -> Result<T, ErrorInfo> {
    serde_json::from_value(params).map_err(|e| ErrorInfo::new(codes::INVALID_REQUEST, e.to_string()))
}

fn reply<T: Serialize>(value: T) -> Result<Payload, ErrorInfo> {
    serde_json::to_value(value).map_err(|e| ErrorInfo::new(codes::PROVIDER_ERROR, e.to_string()))
}

impl From<ProviderError> for ErrorInfo {
    fn from(err: ProviderError) -> Self {
        ErrorInfo::new(codes::PROVIDER_ERROR, err.to_string())
    }
}

impl Worker {
    /// A worker waiting for its `setFlysystem` call.
    pub fn new() -> Self {
        Self::default()
    }

    /// A worker that already holds a provider.
    pub fn with_provider(provider: Box<dyn Provider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&mut self, method: &str) -> Result<&mut Box<dyn Provider>, ErrorInfo> {
        self.provider.as_mut().ok_or_else(|| {
            ErrorInfo::new(
                codes::PROVIDER_NOT_SET,
                format!("`{method}` called before `{}`", methods::SET_PROVIDER),
            )
        })
    }

    /// Execute one method against the provider.
    pub fn handle(&mut self, method: &str, params: Payload) -> Result<Payload, ErrorInfo> {
        match method {
            methods::SET_PROVIDER => {
                let SetProviderParams { provider } = parse(params)?;
                debug!(?provider, "provider set");
                self.provider = Some(provider.connect()?);
                Ok(json!({}))
            }
            methods::UNLINK => {
                let PathParams { path } = parse(params)?;
                let deleted = self.provider(method)?.delete(&path)?;
                reply(UnlinkResponse { deleted })
            }
            methods::STAT => {
                let PathParams { path } = parse(params)?;
                let meta = self.provider(method)?.get_metadata(&path)?;
                reply(StatResponse {
                    size: meta.size,
                    atime: meta.timestamp,
                    mtime: meta.timestamp,
                    ctime: meta.timestamp,
                })
            }
            methods::READDIR => {
                let ReaddirParams { path, flags } = parse(params)?;
                let mut entries = self.provider(method)?.list_contents(&path)?;
                match flags {
                    ListOrder::None => {}
                    ListOrder::Ascending => entries.sort_by(|a, b| a.path.cmp(&b.path)),
                    ListOrder::Descending => entries.sort_by(|a, b| b.path.cmp(&a.path)),
                }
                reply(entries)
            }
            methods::READ => {
                let PathParams { path } = parse(params)?;
                let bytes = self.provider(method)?.read(&path)?;
                reply(ReadResponse {
                    contents: encode_contents(&bytes),
                })
            }
            methods::WRITE => {
                let WriteParams { path, contents } = parse(params)?;
                let bytes = decode_contents(&contents)
                    .map_err(|e| ErrorInfo::new(codes::INVALID_REQUEST, e.to_string()))?;
                let written = self.provider(method)?.write(&path, &bytes)?;
                reply(WriteResponse { written })
            }
            methods::RENAME => {
                let RenameParams { from, to } = parse(params)?;
                let renamed = self.provider(method)?.rename(&from, &to)?;
                reply(RenameResponse { renamed })
            }
            other => Err(ErrorInfo::new(
                codes::METHOD_NOT_FOUND,
                format!("unknown method `{other}`"),
            )),
        }
    }

    /// Answer one request envelope.
    pub fn handle_request(&mut self, request: RequestEnvelope) -> ResponseEnvelope {
        debug!(id = %request.id, method = %request.method, "handling request");
        match self.handle(&request.method, request.params) {
            Ok(result) => ResponseEnvelope::ok(request.id, result),
            Err(error) => {
                debug!(code = %error.code, message = %error.message, "request failed");
                ResponseEnvelope::err(request.id, error)
            }
        }
    }

    /// Serve NDJSON requests from `reader` until EOF, one at a time.
    ///
    /// Lines that are not valid requests are answered with `INVALID_REQUEST`
    /// when they carry an `id`, and skipped otherwise.
    pub fn serve<R: BufRead, W: Write>(&mut self, reader: R, mut writer: W) -> io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<RequestEnvelope>(&line) {
                Ok(request) => self.handle_request(request),
                Err(e) => {
                    let id = serde_json::from_str::<Payload>(&line)
                        .ok()
                        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from));
                    match id {
                        Some(id) => ResponseEnvelope::err(
                            id,
                            ErrorInfo::new(codes::INVALID_REQUEST, e.to_string()),
                        ),
                        None => {
                            warn!(error = %e, "skipping unparseable request line");
                            continue;
                        }
                    }
                }
            };

            serde_json::to_writer(&mut writer, &response)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }
}
