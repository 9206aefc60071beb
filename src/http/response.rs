use http::StatusCode;
use std::fmt;

/// Response produced by an HTTP request handler
///
/// `on_sent` runs after the response has been handed to the connection,
/// before the server closes it.
pub struct HttpResponse {
    pub body: String,
    on_sent: Option<Box<dyn FnOnce() + Send>>,
}

impl HttpResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            on_sent: None,
        }
    }

    pub fn with_on_sent<F>(mut self, on_sent: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_sent = Some(Box::new(on_sent));
        self
    }

    pub(crate) fn into_parts(self) -> (String, Option<Box<dyn FnOnce() + Send>>) {
        (self.body, self.on_sent)
    }
}

impl From<String> for HttpResponse {
    fn from(body: String) -> Self {
        Self::new(body)
    }
}

impl From<&str> for HttpResponse {
    fn from(body: &str) -> Self {
        Self::new(body)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("body", &self.body)
            .field("on_sent", &self.on_sent.is_some())
            .finish()
    }
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or_default()
    )
}

/// Header block of a successful response
///
/// Ends with a single CRLF: the newline delimiter appended on send completes
/// the blank line separating headers from the body.
pub(crate) fn ok_header(server_name: &str, content_length: usize) -> String {
    format!(
        "{}Server: {server_name}\r\nContent-Length: {content_length}\r\nContent-Type: text/html\r\nConnection: Closed\r\n",
        status_line(StatusCode::OK)
    )
}

/// Header block sent when no GET request could be parsed
pub(crate) fn not_implemented_header(server_name: &str) -> String {
    format!(
        "{}Server: {server_name}\r\nConnection: Closed\r\n",
        status_line(StatusCode::NOT_IMPLEMENTED)
    )
}
