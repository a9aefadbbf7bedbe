//! In-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use civic_api::{ApiError, Document, Method, QueryParams, Transport, normalize_endpoint};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::stream::{Emission, Subscription};

type Reply = Result<Document, ApiError>;

#[derive(Clone)]
enum Canned {
    Ok(Document),
    Fail { status: u16, body: Value },
}

impl Canned {
    fn reply(&self) -> Reply {
        match self {
            Canned::Ok(doc) => Ok(doc.clone()),
            Canned::Fail { status, body } => Err(ApiError::Api {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}

#[derive(Default)]
struct Route {
    deferred: VecDeque<oneshot::Receiver<Reply>>,
    canned: Option<Canned>,
    calls: usize,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    write_replies: Mutex<HashMap<(Method, String), Canned>>,
    writes: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route<T>(&self, endpoint: &str, f: impl FnOnce(&mut Route) -> T) -> T {
        let mut routes = self.routes.lock().unwrap();
        f(routes.entry(normalize_endpoint(endpoint)).or_default())
    }

    /// Answer every later GET on `endpoint` with `document`.
    pub(crate) fn respond(&self, endpoint: &str, document: Document) {
        self.route(endpoint, |r| r.canned = Some(Canned::Ok(document)));
    }

    /// Answer every later GET on `endpoint` with a structured API error.
    pub(crate) fn fail(&self, endpoint: &str, status: u16, body: Value) {
        self.route(endpoint, |r| r.canned = Some(Canned::Fail { status, body }));
    }

    /// Hold the next GET on `endpoint` until the returned sender fires.
    /// Deferred replies are handed out in call order.
    pub(crate) fn defer(&self, endpoint: &str) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.route(endpoint, |r| r.deferred.push_back(rx));
        tx
    }

    pub(crate) fn get_calls(&self, endpoint: &str) -> usize {
        self.route(endpoint, |r| r.calls)
    }

    pub(crate) fn on_write(&self, method: Method, endpoint: &str, document: Document) {
        self.write_replies
            .lock()
            .unwrap()
            .insert((method, normalize_endpoint(endpoint)), Canned::Ok(document));
    }

    pub(crate) fn fail_write(&self, method: Method, endpoint: &str, status: u16, body: Value) {
        self.write_replies
            .lock()
            .unwrap()
            .insert((method, normalize_endpoint(endpoint)), Canned::Fail { status, body });
    }

    pub(crate) fn writes(&self) -> Vec<(Method, String, Option<Value>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, endpoint: &str, _query: &QueryParams) -> Result<Document, ApiError> {
        let (deferred, canned) = self.route(endpoint, |r| {
            r.calls += 1;
            (r.deferred.pop_front(), r.canned.clone())
        });

        match (deferred, canned) {
            (Some(rx), _) => rx.await.unwrap_or_else(|_| {
                Err(ApiError::Status {
                    status: 503,
                    body: "reply dropped".to_string(),
                })
            }),
            (None, Some(canned)) => canned.reply(),
            (None, None) => Err(ApiError::Status {
                status: 404,
                body: format!("no route for {endpoint}"),
            }),
        }
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Document, ApiError> {
        let endpoint = normalize_endpoint(endpoint);
        self.writes
            .lock()
            .unwrap()
            .push((method, endpoint.clone(), body.cloned()));

        let canned = self.write_replies.lock().unwrap().get(&(method, endpoint)).cloned();
        canned.map_or_else(|| Ok(Document::empty()), |c| c.reply())
    }
}

/// Next emission of a subscription, failing the test if none arrives.
pub(crate) async fn next(subscription: &mut Subscription) -> Emission {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("no emission within timeout")
        .expect("subscription closed")
}
