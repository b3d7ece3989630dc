//! Request gateway
//!
//! Authenticates the caller's key, forwards the request to the `KeyService`
//! and renders the outcome as a `(status, body)` pair. Transports (HTTP,
//! CLI) only translate to and from `Request` / `Response`.

use crate::auth::{CredentialRecord, KeyPair, Requester};
use crate::keys::{KeyError, KeyService, Regenerated};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

/// Operations callers can request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Issue a read/write pair for a new namespace
    Issue { namespace: String },
    /// Regenerate the keys of a namespace
    Regenerate { namespace: String },
    /// Look up keys by id
    LookupIds { ids: Vec<String> },
    /// Look up keys by namespace
    LookupNamespaces { namespaces: Vec<String> },
    /// Delete a single key
    DeleteId { id: String },
    /// Delete every key of a namespace
    DeleteNamespace { namespace: String },
}

/// Outcome classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Created,
    BadRequest,
    NotFound,
    Unauthorized,
    InternalFailure,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Ok | Status::Created)
    }

    /// Equivalent HTTP status code
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::Unauthorized => 401,
            Status::InternalFailure => 500,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::Created => "created",
            Status::BadRequest => "bad request",
            Status::NotFound => "not found",
            Status::Unauthorized => "unauthorized",
            Status::InternalFailure => "internal failure",
        };
        f.write_str(s)
    }
}

/// Response payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Body {
    Pair(KeyPair),
    Record(CredentialRecord),
    Records(Vec<CredentialRecord>),
    Message { message: String },
}

impl Body {
    fn message(message: impl Into<String>) -> Self {
        Body::Message {
            message: message.into(),
        }
    }

    /// A single match renders as one object, several as a collection
    fn records(mut records: Vec<CredentialRecord>) -> Self {
        if records.len() == 1 {
            Body::Record(records.remove(0))
        } else {
            Body::Records(records)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub status: Status,
    pub body: Body,
}

impl Response {
    pub fn new(status: Status, body: Body) -> Self {
        Self { status, body }
    }

    pub fn unauthorized() -> Self {
        Self::from(KeyError::Unauthorized)
    }
}

impl KeyError {
    pub fn status(&self) -> Status {
        match self {
            KeyError::Unauthorized | KeyError::NamespaceConflict { .. } => Status::Unauthorized,
            KeyError::NotFound => Status::NotFound,
            KeyError::InvalidIdentifier(_) | KeyError::InvalidNamespace(_) => Status::BadRequest,
            KeyError::Internal(_) => Status::InternalFailure,
        }
    }
}

impl From<KeyError> for Response {
    fn from(e: KeyError) -> Self {
        if let KeyError::Internal(cause) = &e {
            error!(error = %cause, "Request failed");
        }
        Response::new(e.status(), Body::message(e.to_string()))
    }
}

fn respond<T>(result: Result<T, KeyError>, render: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => render(value),
        Err(e) => Response::from(e),
    }
}

/// Dispatches authenticated requests to the key service
#[derive(Clone)]
pub struct Gateway {
    service: KeyService,
}

impl Gateway {
    pub fn new(service: KeyService) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &KeyService {
        &self.service
    }

    /// Resolve the caller's key, if any
    pub async fn authenticate(&self, key: Option<&str>) -> Option<Requester> {
        match key {
            Some(key) => self.service.authenticate(key).await,
            None => None,
        }
    }

    /// Authenticate `key` and run `request` on its behalf
    pub async fn handle(&self, key: Option<&str>, request: Request) -> Response {
        let Some(requester) = self.authenticate(key).await else {
            debug!("Rejected request without a valid API key");
            return Response::unauthorized();
        };

        self.dispatch(&requester, request).await
    }

    /// Run `request` for an already authenticated requester
    pub async fn dispatch(&self, requester: &Requester, request: Request) -> Response {
        debug!(namespace = %requester.namespace, level = %requester.level, ?request, "Dispatching request");

        match request {
            Request::Issue { namespace } => respond(
                self.service.issue_read_write(requester, &namespace).await,
                |pair| Response::new(Status::Created, Body::Pair(pair)),
            ),
            Request::Regenerate { namespace } => respond(
                self.service.regenerate(requester, &namespace).await,
                |regenerated| match regenerated {
                    Regenerated::Pair(pair) => Response::new(Status::Created, Body::Pair(pair)),
                    Regenerated::Super(record) => {
                        Response::new(Status::Created, Body::Record(record))
                    }
                },
            ),
            Request::LookupIds { ids } => respond(
                self.service.lookup_by_ids(requester, &ids).await,
                |records| Response::new(Status::Ok, Body::records(records)),
            ),
            Request::LookupNamespaces { namespaces } => respond(
                self.service.lookup_by_namespaces(requester, &namespaces).await,
                |records| Response::new(Status::Ok, Body::records(records)),
            ),
            Request::DeleteId { id } => respond(
                self.service.delete_by_id(requester, &id).await,
                |_| Response::new(Status::Ok, Body::message("API key deleted")),
            ),
            Request::DeleteNamespace { namespace } => respond(
                self.service.delete_by_namespace(requester, &namespace).await,
                |removed| {
                    Response::new(
                        Status::Ok,
                        Body::message(format!("{} API keys deleted for {}", removed, namespace)),
                    )
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeysConfig;
    use crate::storage::{MemoryStore, StorageError};
    use std::sync::Arc;

    async fn setup() -> (Gateway, String) {
        let service = KeyService::new(Arc::new(MemoryStore::new()), KeysConfig::default());
        let admin = service.seed_super(None).await.unwrap();
        (Gateway::new(service), admin.id.to_string())
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(KeyError::Unauthorized.status(), Status::Unauthorized);
        assert_eq!(
            KeyError::NamespaceConflict {
                candidate: "a".into(),
                existing: "ab".into()
            }
            .status(),
            Status::Unauthorized
        );
        assert_eq!(KeyError::NotFound.status(), Status::NotFound);
        assert_eq!(KeyError::InvalidIdentifier("x".into()).status(), Status::BadRequest);
        assert_eq!(
            KeyError::Internal(StorageError::Timeout).status(),
            Status::InternalFailure
        );
    }

    #[test]
    fn test_request_deserialize() {
        let request: Request =
            serde_json::from_str(r#"{"op":"issue","namespace":"com.acme"}"#).unwrap();
        assert_eq!(
            request,
            Request::Issue {
                namespace: "com.acme".into()
            }
        );

        let request: Request =
            serde_json::from_str(r#"{"op":"lookup_namespaces","namespaces":["com.acme"]}"#).unwrap();
        assert!(matches!(request, Request::LookupNamespaces { .. }));
    }

    #[tokio::test]
    async fn test_missing_or_unknown_key_is_unauthorized() {
        let (gateway, _admin) = setup().await;
        let request = Request::Issue {
            namespace: "com.acme".into(),
        };

        let response = gateway.handle(None, request.clone()).await;
        assert_eq!(response.status, Status::Unauthorized);

        let response = gateway.handle(Some("not-a-uuid"), request).await;
        assert_eq!(response.status, Status::Unauthorized);
    }

    #[tokio::test]
    async fn test_issue_then_lookup_single_record() {
        let (gateway, admin) = setup().await;

        let response = gateway
            .handle(Some(admin.as_str()), Request::Issue { namespace: "com.acme".into() })
            .await;
        assert_eq!(response.status, Status::Created);
        let Body::Pair(pair) = response.body else {
            panic!("expected a key pair");
        };

        let response = gateway
            .handle(
                Some(admin.as_str()),
                Request::LookupIds {
                    ids: vec![pair.write.id.to_string()],
                },
            )
            .await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, Body::Record(pair.write.clone()));

        let write_key = pair.write.id.to_string();
        let response = gateway
            .handle(
                Some(write_key.as_str()),
                Request::LookupNamespaces {
                    namespaces: vec!["com.acme".into()],
                },
            )
            .await;
        assert_eq!(response.status, Status::Ok);
        assert!(matches!(response.body, Body::Records(ref r) if r.len() == 2));
    }

    #[tokio::test]
    async fn test_regenerate_super_renders_single_record() {
        let (gateway, admin) = setup().await;

        let response = gateway
            .handle(
                Some(admin.as_str()),
                Request::Regenerate {
                    namespace: "*".into(),
                },
            )
            .await;

        assert_eq!(response.status, Status::Created);
        let Body::Record(record) = response.body else {
            panic!("expected the reissued super key");
        };
        assert_ne!(record.id.to_string(), admin);

        let json = serde_json::to_value(Body::Record(record)).unwrap();
        assert_eq!(json["level"], "super");
        assert!(json.get("super").is_none());
    }

    #[tokio::test]
    async fn test_internal_failure_is_opaque() {
        let response = Response::from(KeyError::Internal(StorageError::Database(
            "password authentication failed for user keys".into(),
        )));

        assert_eq!(response.status, Status::InternalFailure);
        assert_eq!(response.body, Body::message("internal failure"));
    }

    #[tokio::test]
    async fn test_bad_identifier() {
        let (gateway, admin) = setup().await;

        let response = gateway
            .handle(Some(admin.as_str()), Request::DeleteId { id: "nope".into() })
            .await;

        assert_eq!(response.status, Status::BadRequest);
        assert_eq!(response.status.code(), 400);
    }
}
