use std::net::IpAddr;

/// A parsed GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Address of the requesting client
    pub client_ip: IpAddr,
    /// Requested path including the leading `/`
    pub path: String,
    /// Query parameters in request order; duplicates are kept
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parses the first `GET ` line found in `message`
    ///
    /// Query parameters are split on `&` and `=` without percent-decoding; a
    /// parameter without `=` gets an empty value. Returns `None` when no line
    /// carries a GET request with a target.
    ///
    /// # Examples
    ///
    /// ```
    /// use tcpcom::http::HttpRequest;
    /// use std::net::Ipv4Addr;
    ///
    /// let request = HttpRequest::parse("GET /led?state=on&x HTTP/1.1\r", Ipv4Addr::LOCALHOST.into())
    ///     .unwrap();
    /// assert_eq!(request.path, "/led");
    /// assert_eq!(request.param("state"), Some("on"));
    /// assert_eq!(request.param("x"), Some(""));
    /// ```
    pub fn parse(message: &str, client_ip: IpAddr) -> Option<HttpRequest> {
        let url = message
            .lines()
            .filter(|line| line.starts_with("GET "))
            .find_map(|line| line.split_whitespace().nth(1))?;

        let (path, params) = match url.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (url, Vec::new()),
        };

        Some(HttpRequest {
            client_ip,
            path: path.to_string(),
            params,
        })
    }

    /// Value of the first parameter named `key`
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (item.to_string(), String::new()),
        })
        .collect()
}
