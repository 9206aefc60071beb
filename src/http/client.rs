use crate::{Result, TcpComError};
use http::{Method, StatusCode, Uri};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::form_urlencoded;

/// Time allowed for connecting and for receiving the whole response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_HEADERS: usize = 64;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Response returned by [`get`], [`post`] and [`delete`]
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpReply {
    /// Value of the first header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// JSON object embedded in the body, see [`extract_json`]
    pub fn json(&self) -> Option<Value> {
        extract_json(&self.body)
    }
}

/// Performs a plain HTTP GET request
///
/// `params` are appended to the query string as given, without encoding.
/// Only `http://` URLs are supported.
///
/// # Examples
///
/// ```no_run
/// use tcpcom::http::client;
///
/// #[tokio::main]
/// async fn main() -> tcpcom::Result<()> {
///     let reply = client::get("http://192.168.0.10/led", &[("state", "on")]).await?;
///     println!("{} {}", reply.status, reply.body);
///     Ok(())
/// }
/// ```
pub async fn get(url: &str, params: &[(&str, &str)]) -> Result<HttpReply> {
    send_request(Method::GET, &with_params(url, params), None).await
}

/// Performs an HTTP POST request with `params` as a form-encoded body
pub async fn post(url: &str, params: &[(&str, &str)]) -> Result<HttpReply> {
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    send_request(Method::POST, url, Some((FORM_CONTENT_TYPE, body))).await
}

/// Performs an HTTP DELETE request; an empty `body` sends none
pub async fn delete(url: &str, body: &str) -> Result<HttpReply> {
    let body = (!body.is_empty()).then(|| (TEXT_CONTENT_TYPE, body.to_string()));
    send_request(Method::DELETE, url, body).await
}

/// Parses the JSON object spanning the first `{` to the last `}` of `text`
///
/// Anything around the object (status lines, headers, trailing newlines) is
/// ignored. Returns `None` when there is no such object or it is not valid
/// JSON.
///
/// ```
/// use tcpcom::http::client::extract_json;
///
/// let value = extract_json("HTTP/1.1 200 OK\r\n\r\n{\"temp\": 21.5}\n").unwrap();
/// assert_eq!(value["temp"], 21.5);
/// assert!(extract_json("no json here").is_none());
/// ```
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "No valid JSON object in text");
            None
        }
    }
}

async fn send_request(
    method: Method,
    url: &str,
    body: Option<(&str, String)>,
) -> Result<HttpReply> {
    let uri: Uri = url
        .parse()
        .map_err(|e| TcpComError::Http(format!("Invalid URL {url}: {e}")))?;

    match uri.scheme_str() {
        None | Some("http") => {}
        Some(scheme) => {
            return Err(TcpComError::Unsupported(format!("Scheme {scheme} is not supported")));
        }
    }
    let host = uri
        .host()
        .ok_or_else(|| TcpComError::Http(format!("URL {url} has no host")))?;
    let port = uri.port_u16().unwrap_or(80);
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());

    let mut stream = tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| TcpComError::Timeout(format!("Connecting to {host}:{port}")))??;

    let mut request = format!("{method} {target} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n");
    if let Some((content_type, body)) = &body {
        request.push_str(&format!(
            "Content-Type: {content_type}\r\nContent-Length: {}\r\n",
            body.len()
        ));
    }
    request.push_str("\r\n");
    if let Some((_, body)) = &body {
        request.push_str(body);
    }

    debug!(%method, %host, port, %target, "Sending request");
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    tokio::time::timeout(DEFAULT_TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .map_err(|_| TcpComError::Timeout(format!("Reading response from {host}:{port}")))??;

    parse_reply(&raw)
}

fn with_params(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

fn parse_reply(raw: &[u8]) -> Result<HttpReply> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let body_start = match response.parse(raw) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            return Err(TcpComError::Http("Incomplete HTTP response".to_string()));
        }
        Err(e) => return Err(TcpComError::Http(format!("Failed to parse response: {e}"))),
    };

    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| TcpComError::Http("Missing status code".to_string()))?;
    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let mut body = &raw[body_start..];
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());
    if let Some(len) = content_length {
        body = &body[..len.min(body.len())];
    }

    Ok(HttpReply {
        status,
        headers,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Request as seen by [`serve_once`]
    #[derive(Debug)]
    struct Captured {
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        body: String,
    }

    impl Captured {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }
    }

    /// Accepts one request, answers with `reply_body` and hands the request back
    async fn serve_once(reply_body: &'static str) -> (u16, oneshot::Receiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let captured = loop {
                let mut chunk = [0u8; 1024];
                let n = stream.read(&mut chunk).await.unwrap();
                raw.extend_from_slice(&chunk[..n]);

                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut request = httparse::Request::new(&mut headers);
                let httparse::Status::Complete(body_start) = request.parse(&raw).unwrap() else {
                    continue;
                };
                let headers: Vec<(String, String)> = request
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
                let length = headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                    .map_or(0, |(_, v)| v.parse::<usize>().unwrap());
                if raw.len() - body_start < length {
                    continue;
                }
                break Captured {
                    method: request.method.unwrap().to_string(),
                    path: request.path.unwrap().to_string(),
                    headers,
                    body: String::from_utf8_lossy(&raw[body_start..body_start + length]).into_owned(),
                };
            };

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{reply_body}",
                reply_body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(captured);
        });

        (port, rx)
    }

    #[test]
    fn test_with_params() {
        assert_eq!(with_params("http://h/p", &[]), "http://h/p");
        assert_eq!(with_params("http://h/p", &[("a", "1"), ("b", "2")]), "http://h/p?a=1&b=2");
        assert_eq!(with_params("http://h/p?x=0", &[("a", "1")]), "http://h/p?x=0&a=1");
    }

    #[test]
    fn test_parse_reply_truncates_to_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nServer: Test\r\nContent-Length: 5\r\n\nhello\n";
        let reply = parse_reply(raw).unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("server"), Some("Test"));
        assert_eq!(reply.body, "hello");
    }

    #[test]
    fn test_parse_reply_without_content_length() {
        let raw = b"HTTP/1.1 501 Not Implemented\r\nConnection: Closed\r\n\n";
        let reply = parse_reply(raw).unwrap();

        assert_eq!(reply.status, StatusCode::NOT_IMPLEMENTED);
        assert!(reply.body.is_empty());
    }

    #[test]
    fn test_parse_reply_incomplete() {
        assert!(matches!(parse_reply(b"HTTP/1.1 200 OK\r\n"), Err(TcpComError::Http(_))));
    }

    #[tokio::test]
    async fn test_https_is_unsupported() {
        let result = get("https://example.com/", &[]).await;
        assert!(matches!(result, Err(TcpComError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_post_sends_form_encoded_body() {
        let (port, request) = serve_once("stored").await;

        let url = format!("http://127.0.0.1:{port}/log");
        let reply = post(&url, &[("name", "temp sensor"), ("value", "21.5&up")])
            .await
            .unwrap();
        let request = request.await.unwrap();

        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/log");
        assert_eq!(request.body, "name=temp+sensor&value=21.5%26up");
        assert_eq!(request.header("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(
            request.header("content-length"),
            Some(request.body.len().to_string().as_str())
        );
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, "stored");
    }

    #[tokio::test]
    async fn test_delete_with_and_without_body() {
        let (port, request) = serve_once("").await;
        let url = format!("http://127.0.0.1:{port}/items/7");
        delete(&url, "").await.unwrap();
        let request = request.await.unwrap();

        assert_eq!(request.method, "DELETE");
        assert_eq!(request.path, "/items/7");
        assert!(request.body.is_empty());
        assert_eq!(request.header("content-length"), None);

        let (port, request) = serve_once("").await;
        let url = format!("http://127.0.0.1:{port}/items");
        delete(&url, "id=7").await.unwrap();
        let request = request.await.unwrap();

        assert_eq!(request.method, "DELETE");
        assert_eq!(request.body, "id=7");
        assert_eq!(request.header("content-length"), Some("4"));
    }

    #[tokio::test]
    async fn test_reply_json() {
        let (port, _request) = serve_once("{\"led\": \"on\", \"level\": 3}").await;
        let reply = get(&format!("http://127.0.0.1:{port}/status"), &[]).await.unwrap();

        assert_eq!(reply.json(), Some(json!({"led": "on", "level": 3})));
    }

    #[test]
    fn test_extract_json_from_surrounding_text() {
        let text = "HTTP/1.1 200 OK\r\nContent-Length: 24\r\n\r\n{\"a\": {\"b\": [1, 2]}}\n";
        assert_eq!(extract_json(text), Some(json!({"a": {"b": [1, 2]}})));
    }

    #[test]
    fn test_extract_json_rejects_missing_or_broken_objects() {
        assert_eq!(extract_json(""), None);
        assert_eq!(extract_json("plain text"), None);
        assert_eq!(extract_json("} before {"), None);
        assert_eq!(extract_json("{\"a\": }"), None);
    }
}
