use inflow_core::HeaderMap;

/// The request a response answers.
///
/// Built and dispatched by the connection layer; the response only keeps a
/// weak reference to it for inspection.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    method: String,
    uri: String,
    headers: HeaderMap,
}

impl ClientRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accessors() {
        let req = ClientRequest::new("GET", "/users?page=1", HeaderMap::new().with("Host", "example.com"));
        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri(), "/users?page=1");
        assert_eq!(req.headers().get("host"), Some("example.com"));
    }
}
