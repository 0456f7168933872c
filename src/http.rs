//! HTTP-backed raw data.
//!
//! The actual wire I/O sits behind [`RawTransport`] so trees can run
//! against any HTTP client, or against a canned transport in tests.
//! [`HttpSource`] turns selectors into URLs, decodes JSON response bodies
//! into raw records, and coalesces identical in-flight requests by URL.
//!
//! Failures on this path are lenient by policy: a non-success status, a
//! transport error, or an undecodable body is logged as a warning and
//! yields no records rather than failing the stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::error::{Result, SharedResult};
use crate::model::{OtherHasher, RawRecord};
use crate::raw::{sort_records, RawDataSource};
use crate::service::DataService;
use crate::stream::{Criteria, DataSelector, DataStream};

// ------------- Requests and responses -------------
#[derive(Clone, Debug)]
pub struct HttpRequest {
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    with_credentials: bool,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            headers: Vec::new(),
            body: None,
            with_credentials: false,
        }
    }
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_owned());
        self
    }
    pub fn with_credentials(mut self) -> Self {
        self.with_credentials = true;
        self
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
    pub fn sends_credentials(&self) -> bool {
        self.with_credentials
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: u16,
    body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
        }
    }
    pub fn status(&self) -> u16 {
        self.status
    }
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// The wire seam. Implementations resolve with the response for any status
/// code and reserve `Err` for requests that produced no response at all.
pub trait RawTransport: Send + Sync {
    fn fetch(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>>;
}

/// One shared in-flight value fetch per URL.
pub type HttpValueFuture = Shared<BoxFuture<'static, SharedResult<Option<Value>>>>;

// ------------- HttpSource -------------
/// A raw source serving records over HTTP. Cloning shares the transport
/// and the in-flight request registry.
#[derive(Clone)]
pub struct HttpSource {
    transport: Arc<dyn RawTransport>,
    url_for: Arc<dyn Fn(&DataSelector) -> String + Send + Sync>,
    in_flight: Arc<Mutex<HashMap<String, HttpValueFuture, OtherHasher>>>,
}

impl HttpSource {
    pub fn new(
        transport: Arc<dyn RawTransport>,
        url_for: impl Fn(&DataSelector) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            transport,
            url_for: Arc::new(url_for),
            in_flight: Arc::new(Mutex::new(HashMap::default())),
        }
    }
    /// Conventional REST layout: `{base}/{type}` with key-value criteria
    /// as percent-encoded query parameters.
    pub fn rest(transport: Arc<dyn RawTransport>, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_owned();
        Self::new(transport, move |selector| {
            let plain = format!("{}/{}", base, selector.type_name());
            let mut url = match Url::parse(&plain) {
                Ok(url) => url,
                Err(error) => {
                    warn!(url = %plain, %error, "unparsable request url");
                    return plain;
                }
            };
            if let Criteria::KeyValues(pairs) = selector.criteria() {
                if !pairs.is_empty() {
                    let mut query = url.query_pairs_mut();
                    for (name, value) in pairs {
                        match value {
                            Value::String(text) => query.append_pair(name, text),
                            other => query.append_pair(name, &other.to_string()),
                        };
                    }
                }
            }
            String::from(url)
        })
    }
    pub fn url_for(&self, selector: &DataSelector) -> String {
        (self.url_for)(selector)
    }
    /// Fetches one JSON value from a URL, deduplicating concurrent requests
    /// for the same URL onto one shared future. The registry entry is
    /// removed when the request settles, so a later call fetches fresh.
    pub fn fetch_http_object_property(&self, url: &str) -> HttpValueFuture {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(pending) = in_flight.get(url) {
            return pending.clone();
        }
        let transport = Arc::clone(&self.transport);
        let registry = Arc::clone(&self.in_flight);
        let key = url.to_owned();
        let fetch = async move {
            let outcome = fetch_value(transport, HttpRequest::get(&key)).await;
            registry.lock().unwrap().remove(&key);
            outcome
        }
        .boxed()
        .shared();
        in_flight.insert(url.to_owned(), fetch.clone());
        fetch
    }
}

async fn fetch_value(
    transport: Arc<dyn RawTransport>,
    request: HttpRequest,
) -> SharedResult<Option<Value>> {
    let url = request.url().to_owned();
    match transport.fetch(request).await {
        Ok(response) if response.status() >= 300 => {
            warn!(%url, status = response.status(), "request failed");
            Ok(None)
        }
        Ok(response) => match serde_json::from_str(response.body()) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(%url, %error, "undecodable response body");
                Ok(None)
            }
        },
        Err(error) => {
            warn!(%url, %error, "transport error");
            Ok(None)
        }
    }
}

fn decode_records(url: &str, body: &str) -> Vec<RawRecord> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                other => {
                    warn!(%url, item = %other, "non-object item in response array");
                    None
                }
            })
            .collect(),
        Ok(Value::Object(record)) => vec![record],
        Ok(other) => {
            warn!(%url, body = %other, "response body is not a record or array");
            Vec::new()
        }
        Err(error) => {
            warn!(%url, %error, "undecodable response body");
            Vec::new()
        }
    }
}

impl RawDataSource for HttpSource {
    // The server is trusted to have applied the criteria that went into the
    // URL; orderings are applied locally.
    fn fetch_raw_data(
        &self,
        service: DataService,
        selector: DataSelector,
        stream: DataStream,
    ) -> BoxFuture<'static, Result<()>> {
        let url = self.url_for(&selector);
        let transport = Arc::clone(&self.transport);
        async move {
            let mut records = match transport.fetch(HttpRequest::get(&url)).await {
                Ok(response) if response.status() >= 300 => {
                    warn!(%url, status = response.status(), "request failed");
                    Vec::new()
                }
                Ok(response) => decode_records(&url, response.body()),
                Err(error) => {
                    warn!(%url, %error, "transport error");
                    Vec::new()
                }
            };
            sort_records(&mut records, &selector);
            service.add_raw_data(&stream, records)?;
            service.raw_data_done(&stream);
            Ok(())
        }
        .boxed()
    }
}
