//! Request description handed to the gateway and the transport.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(RequestMethod::Get),
            "POST" => Ok(RequestMethod::Post),
            "PUT" => Ok(RequestMethod::Put),
            "PATCH" => Ok(RequestMethod::Patch),
            "DELETE" => Ok(RequestMethod::Delete),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

/// Whether a request reads through the cache or invalidates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Cached under `namespace`.
    Read { namespace: String },
    /// Invalidates `group` once the write is known (or suspected) to have landed.
    Write { group: String },
}

/// What feature code asks the gateway to do.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    method: RequestMethod,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    kind: RequestKind,
    cache_key: Option<String>,
}

impl RequestSpec {
    /// A cached `GET`.
    pub fn read(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: RequestMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
            kind: RequestKind::Read {
                namespace: namespace.into(),
            },
            cache_key: None,
        }
    }

    /// A mutation in invalidation group `group`.
    pub fn write(method: RequestMethod, path: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            kind: RequestKind::Write {
                group: group.into(),
            },
            cache_key: None,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Override the derived cache key.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Explicit key, else `path?k=v&...` with query pairs sorted.
    pub fn resolved_cache_key(&self) -> String {
        if let Some(key) = &self.cache_key {
            return key.clone();
        }
        if self.query.is_empty() {
            return self.path.clone();
        }

        let mut pairs: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort_unstable();
        format!("{}?{}", self.path, pairs.join("&"))
    }

    pub(crate) fn to_outbound(&self, headers: Vec<(String, String)>) -> OutboundRequest {
        OutboundRequest {
            method: self.method,
            path: self.path.clone(),
            query: self.query.clone(),
            headers,
            body: self.body.clone(),
        }
    }
}

/// A fully formed call for one transport attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: RequestMethod,
    /// Path relative to the transport's base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Extra headers, including `Authorization`.
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
