//! In-memory transport and SharePoint payload builders for unit tests

use crate::error::{Error, Result};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) struct FakeResponse {
    status: u16,
    body: Vec<u8>,
}

impl FakeResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
        }
    }

    pub fn bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::bytes(status, Vec::new())
    }
}

type Handler = Box<dyn Fn(&ApiRequest) -> Result<FakeResponse> + Send + Sync>;

struct Route {
    needle: String,
    handler: Handler,
}

/// Answers requests from routes matched by URL substring, first match wins.
/// Unmatched requests get a 404.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(&self, needle: &str, respond: F)
    where
        F: Fn(&ApiRequest) -> FakeResponse + Send + Sync + 'static,
    {
        self.push(needle, Box::new(move |request| Ok(respond(request))));
    }

    pub fn route_error<F>(&self, needle: &str, fail: F)
    where
        F: Fn() -> Error + Send + Sync + 'static,
    {
        self.push(needle, Box::new(move |_| Err(fail())));
    }

    fn push(&self, needle: &str, handler: Handler) {
        self.routes.lock().unwrap().push(Route {
            needle: needle.to_string(),
            handler,
        });
    }

    /// Token endpoint issuing `tok-1`, `tok-2`, ... valid for an hour.
    pub fn issue_tokens(&self) -> Arc<AtomicUsize> {
        let issued = Arc::new(AtomicUsize::new(0));
        let counter = issued.clone();
        self.route("tokens/OAuth/2", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            FakeResponse::json(
                200,
                json!({
                    "token_type": "Bearer",
                    "expires_in": "3599",
                    "access_token": format!("tok-{}", n),
                })
                .to_string(),
            )
        });
        issued
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of recorded requests whose URL contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(needle))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let routes = self.routes.lock().unwrap();
        let outcome = match routes.iter().find(|r| request.url.contains(&r.needle)) {
            Some(route) => (route.handler)(&request),
            None => Ok(FakeResponse::json(
                404,
                json!({"error": {"message": {"value": format!("no route for {}", request.url)}}})
                    .to_string(),
            )),
        };
        drop(routes);

        outcome.map(|r| ApiResponse::from_bytes(r.status, r.body))
    }
}

/// `{"d": {"results": [files...], "__next": ...}}`
pub(crate) fn files_page(files: &[(&str, u64)], next: Option<&str>) -> String {
    let results: Vec<_> = files
        .iter()
        .map(|(path, len)| {
            json!({
                "__metadata": {"type": "SP.File"},
                "Name": crate::site::file_name(path),
                "ServerRelativeUrl": path,
                "Length": len.to_string(),
                "TimeLastModified": "2024-05-01T08:30:00Z",
            })
        })
        .collect();
    page(results, next)
}

pub(crate) fn folders_page(folders: &[&str], next: Option<&str>) -> String {
    let results: Vec<_> = folders
        .iter()
        .map(|path| {
            json!({
                "__metadata": {"type": "SP.Folder"},
                "Name": crate::site::file_name(path),
                "ServerRelativeUrl": path,
            })
        })
        .collect();
    page(results, next)
}

fn page(results: Vec<serde_json::Value>, next: Option<&str>) -> String {
    let mut d = json!({ "results": results });
    if let Some(next) = next {
        d["__next"] = json!(next);
    }
    json!({ "d": d }).to_string()
}
