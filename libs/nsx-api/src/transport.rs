//! The narrow contract every NSX call goes through.
//!
//! A [`Transport`] sends one [`ApiRequest`] and hands back the raw
//! [`ApiResponse`]. Typed calls implement [`ApiCall`] and are run with
//! [`TransportExt::call`] or, for writes guarded by a section token,
//! [`TransportExt::call_if_match`].

use async_trait::async_trait;
pub use reqwest::Method;
use tracing::trace;

use crate::error::{NsxError, NsxResult};

/// Precondition header carrying a section's version token.
pub const IF_MATCH: &str = "If-Match";

/// A single request to the manager. Paths are relative to the manager URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Set a header on this request only. An existing header of the same
    /// name (case-insensitive) is replaced.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Raw response from the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Anything that can exchange a request for a response with the manager.
///
/// Implementations report only exchange failures as errors; any HTTP status
/// is a successful exchange and is judged by the caller.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, request: ApiRequest) -> NsxResult<ApiResponse>;
}

/// A typed API operation: how to build the request, which status means
/// success, and how to read the response.
pub trait ApiCall: Send + Sync {
    type Output: Send;

    fn request(&self) -> NsxResult<ApiRequest>;

    fn expected_status(&self) -> u16;

    fn parse(&self, response: ApiResponse) -> NsxResult<Self::Output>;
}

/// Run [`ApiCall`]s over any [`Transport`].
#[async_trait]
pub trait TransportExt: Transport {
    /// Run `call`, failing with [`NsxError::RemoteRejection`] unless the
    /// manager answers with the call's expected status.
    async fn call<C: ApiCall>(&self, call: &C) -> NsxResult<C::Output> {
        let request = call.request()?;
        dispatch(self, call, request).await
    }

    /// Same as [`call`], with `token` attached as the `If-Match` precondition.
    ///
    /// [`call`]: TransportExt::call
    async fn call_if_match<C: ApiCall>(&self, call: &C, token: &str) -> NsxResult<C::Output> {
        let request = call.request()?.header(IF_MATCH, token);
        dispatch(self, call, request).await
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

async fn dispatch<T, C>(transport: &T, call: &C, request: ApiRequest) -> NsxResult<C::Output>
where
    T: Transport + ?Sized,
    C: ApiCall,
{
    let method = request.method().clone();
    let path = request.path().to_owned();
    let response = transport.execute(request).await?;
    let status = response.status_code();
    trace!(%method, %path, status, "manager responded");
    if status != call.expected_status() {
        return Err(NsxError::RemoteRejection {
            status,
            body: response.into_body(),
        });
    }
    call.parse(response)
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct Canned {
        response: ApiResponse,
        seen: Mutex<Vec<ApiRequest>>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn execute(&self, request: ApiRequest) -> NsxResult<ApiResponse> {
            self.seen.lock().push(request);
            Ok(self.response.clone())
        }
    }

    struct Ping;

    impl ApiCall for Ping {
        type Output = String;

        fn request(&self) -> NsxResult<ApiRequest> {
            Ok(ApiRequest::get("/ping"))
        }

        fn expected_status(&self) -> u16 {
            200
        }

        fn parse(&self, response: ApiResponse) -> NsxResult<String> {
            Ok(response.into_body())
        }
    }

    #[test]
    fn test_request_headers_replace() {
        let req = ApiRequest::post("/x")
            .header("If-Match", "a")
            .header("if-match", "b");
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header_value("IF-MATCH"), Some("b"));
    }

    #[tokio::test]
    async fn test_call_expected_status() {
        let transport = Canned {
            response: ApiResponse::new(200, "pong"),
            seen: Mutex::new(Vec::new()),
        };
        assert_eq!(transport.call(&Ping).await.unwrap(), "pong");
        assert_eq!(transport.seen.lock()[0].header_value(IF_MATCH), None);
    }

    #[tokio::test]
    async fn test_call_unexpected_status() {
        let transport = Canned {
            response: ApiResponse::new(500, "boom"),
            seen: Mutex::new(Vec::new()),
        };
        let err = transport.call_if_match(&Ping, "T1").await.unwrap_err();
        assert!(matches!(err, NsxError::RemoteRejection { status: 500, ref body } if body == "boom"));
        assert_eq!(transport.seen.lock()[0].header_value(IF_MATCH), Some("T1"));
    }
}
