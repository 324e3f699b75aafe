//! Request handling.

use crate::error::ServerError;
use bytes::Bytes;
use kitten_protocol::Message;
use std::collections::HashMap;

/// Produces the payload answering one request.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Message) -> Result<Bytes, ServerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Message) -> Result<Bytes, ServerError> + Send + Sync,
{
    fn handle(&self, request: &Message) -> Result<Bytes, ServerError> {
        self(request)
    }
}

type MethodFn = Box<dyn Fn(&Message) -> Result<Bytes, ServerError> + Send + Sync>;

/// Dispatches requests on the `__METHOD` metadata entry.
#[derive(Default)]
pub struct Router {
    methods: HashMap<String, MethodFn>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method`, replacing any previous registration.
    pub fn register<F>(&mut self, method: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Message) -> Result<Bytes, ServerError> + Send + Sync + 'static,
    {
        self.methods.insert(method.into(), Box::new(f));
        self
    }

    pub fn with_method<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Message) -> Result<Bytes, ServerError> + Send + Sync + 'static,
    {
        self.register(method, f);
        self
    }

    /// Returns the registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }
}

impl RequestHandler for Router {
    fn handle(&self, request: &Message) -> Result<Bytes, ServerError> {
        let method = request.method().ok_or(ServerError::MissingMethod)?;
        let f = self
            .methods
            .get(method)
            .ok_or_else(|| ServerError::UnknownMethod(method.to_string()))?;
        f(request)
    }
}

/// Decides what, if anything, goes back to the peer for `request`.
///
/// - response frames are never answered
/// - heartbeats are echoed as heartbeat responses with the same sequence number
/// - one-way requests are handled but not answered
/// - handler errors become exception responses carrying the error text
pub fn respond(handler: &dyn RequestHandler, request: &Message) -> Option<Message> {
    let header = &request.header;
    if header.is_response() {
        return None;
    }

    if header.is_heartbeat() {
        return (!header.is_one_way()).then(|| Message::response_to(request));
    }

    let result = handler.handle(request);
    if header.is_one_way() {
        if let Err(e) = result {
            tracing::debug!("One-way request seq={} failed: {}", header.seq(), e);
        }
        return None;
    }

    Some(match result {
        Ok(payload) => Message::response_to(request).with_payload(payload),
        Err(e) => Message::exception_to(request, e.to_string()),
    })
}
