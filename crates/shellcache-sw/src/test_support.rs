//! Scripted transport for exercising the worker without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, StatusCode};
use shellcache_net::{Fetcher, NetError, Request, Response};
use url::Url;

use crate::fetch::FetchResponse;

#[derive(Clone)]
enum Scripted {
    Respond {
        status: u16,
        body: &'static str,
        final_path: Option<&'static str>,
    },
    Fail,
    Reject,
    Hang,
}

/// Answers by URL path; unscripted paths fail as if offline.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: HashMap<String, Scripted>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, path: &str, status: u16, body: &'static str) -> Self {
        self.routes.insert(
            path.to_string(),
            Scripted::Respond {
                status,
                body,
                final_path: None,
            },
        );
        self
    }

    /// Answer `path` as if redirects ended at `final_path`.
    pub fn redirect(mut self, path: &str, final_path: &'static str, body: &'static str) -> Self {
        self.routes.insert(
            path.to_string(),
            Scripted::Respond {
                status: 200,
                body,
                final_path: Some(final_path),
            },
        );
        self
    }

    pub fn fail(mut self, path: &str) -> Self {
        self.routes.insert(path.to_string(), Scripted::Fail);
        self
    }

    /// Refuse `path` before it reaches the network.
    pub fn reject(mut self, path: &str) -> Self {
        self.routes.insert(path.to_string(), Scripted::Reject);
        self
    }

    pub fn hang(mut self, path: &str) -> Self {
        self.routes.insert(path.to_string(), Scripted::Hang);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self.routes.get(request.url.path()).cloned();

        Box::pin(async move {
            match scripted {
                Some(Scripted::Respond {
                    status,
                    body,
                    final_path,
                }) => {
                    let mut url = request.url.clone();
                    if let Some(path) = final_path {
                        url.set_path(path);
                    }
                    Ok(Response {
                        request_id: request.id,
                        url,
                        status: StatusCode::from_u16(status).unwrap(),
                        headers: HeaderMap::new(),
                        redirected: final_path.is_some(),
                        body: Bytes::from_static(body.as_bytes()),
                    })
                }
                Some(Scripted::Hang) => futures::future::pending().await,
                Some(Scripted::Reject) => Err(NetError::InvalidUrl(request.url.to_string())),
                Some(Scripted::Fail) | None => {
                    Err(NetError::RequestFailed(format!("offline: {}", request.url)))
                }
            }
        })
    }
}

/// A plain 200 response for `url`.
pub fn ok_response(url: &Url, body: &str) -> FetchResponse {
    let mut response = FetchResponse::network_error();
    response.url = Some(url.clone());
    response.status = 200;
    response.status_text = "OK".to_string();
    response.body = body.as_bytes().to_vec();
    response.response_type = crate::fetch::ResponseType::Basic;
    response
}
