//! # HTTP Surface
//!
//! Transport agnostic request/response handling. The embedding HTTP server
//! builds a [`Request`], calls [`EnvironmentServer::handle_http`] and writes
//! the [`Response`] back.
//!
//! | Route             | Body in            | Body out                       |
//! |-------------------|--------------------|--------------------------------|
//! | `GET /media`      |                    | JSON [`MediaDescriptor`]       |
//! | `POST /login`     | JSON request       | JSON [`EnterDescriptor`]       |
//! | `GET /load`       |                    | binary entity descriptors      |
//! | `GET /update`     |                    | binary pending transactions    |
//! | `GET /logout`     |                    |                                |
//! | `POST /interact`  | binary interaction |                                |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use umi3d_shared::constants::PROTOCOL_VERSION;

use super::{Delivery, EnvironmentServer, UserId, UserStatus};
use crate::codec::to_bytes;
use crate::entity::EntityId;
use crate::error::ServerError;
use crate::protocol::{EntityDescriptor, Message};

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// One HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Method
    pub method: Method,
    /// Path, without the query
    pub path: String,
    /// Query parameters
    pub query: BTreeMap<String, String>,
    /// Raw body
    pub body: Vec<u8>,
}

impl Request {
    /// Parses `target` (`/load?user=1&pid=node_3`) into a request.
    #[must_use]
    pub fn new(method: Method, target: &str, body: Vec<u8>) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key.to_string(), value.to_string())
            })
            .collect();
        Self {
            method,
            path: path.to_string(),
            query,
            body,
        }
    }

    /// A GET request.
    #[must_use]
    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target, Vec::new())
    }

    /// A POST request.
    #[must_use]
    pub fn post(target: &str, body: Vec<u8>) -> Self {
        Self::new(Method::Post, target, body)
    }

    fn user(&self) -> Result<UserId, Response> {
        self.query
            .get("user")
            .and_then(|user| user.parse().ok())
            .map(UserId)
            .ok_or_else(|| Response::error(400, "missing or malformed user"))
    }
}

/// One HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: u16,
    /// Content type of the body
    pub content_type: &'static str,
    /// Body
    pub body: Vec<u8>,
}

impl Response {
    fn ok() -> Self {
        Self {
            status: 200,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }

    fn binary(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream",
            body,
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status: 200,
                content_type: "application/json",
                body,
            },
            Err(error) => {
                tracing::error!(%error, "response serialization failed");
                Self::error(500, "serialization failed")
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: message.as_bytes().to_vec(),
        }
    }

    fn from_server_error(error: &ServerError) -> Self {
        let status = match error {
            ServerError::UnknownUser(_) | ServerError::UnknownEntity(_) => 404,
            ServerError::Full(_) => 503,
            ServerError::Malformed(_) | ServerError::InternalInconsistency(_) => 400,
        };
        Self::error(status, &error.to_string())
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Answer of `GET /media`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Environment name
    pub name: String,
    /// Protocol version
    pub version: String,
    /// Socket port
    pub socket_port: u16,
    /// Ticks per second
    pub tick_rate: u32,
    /// Connected users
    pub users: usize,
    /// User limit
    pub max_users: usize,
}

/// Body of `POST /login`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    /// Login name
    pub login: String,
    /// Polls `/update` instead of using the socket
    #[serde(default)]
    pub polling: bool,
}

/// Answer of `POST /login`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterDescriptor {
    /// Assigned user
    pub user: UserId,
    /// Delivery mode in effect
    pub delivery: Delivery,
    /// Socket port
    pub socket_port: u16,
    /// Ticks per second
    pub tick_rate: u32,
}

impl EnvironmentServer {
    /// Answers one HTTP request.
    pub fn handle_http(&mut self, request: &Request) -> Response {
        let response = match (request.path.as_str(), request.method) {
            ("/media", Method::Get) => self.media(),
            ("/login", Method::Post) => self.login(&request.body),
            ("/load", Method::Get) => self.load(request),
            ("/update", Method::Get) => self.update(request),
            ("/logout", Method::Get) => self.logout(request),
            ("/interact", Method::Post) => self.interact(request),
            ("/media" | "/load" | "/update" | "/logout", Method::Post) | ("/login" | "/interact", Method::Get) => {
                Response::error(405, "method not allowed")
            }
            _ => Response::error(404, "no such route"),
        };
        if !response.is_success() {
            tracing::debug!(path = %request.path, status = response.status, "request refused");
        }
        response
    }

    fn media(&self) -> Response {
        let server = &self.config.server;
        Response::json(&MediaDescriptor {
            name: server.name.clone(),
            version: PROTOCOL_VERSION.to_string(),
            socket_port: server.socket_port,
            tick_rate: server.tick_rate,
            users: self.sessions.len(),
            max_users: server.max_users,
        })
    }

    fn login(&mut self, body: &[u8]) -> Response {
        let request: ConnectionRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(error) => return Response::error(400, &format!("malformed connection request: {error}")),
        };
        let delivery = if request.polling {
            Delivery::Polling
        } else {
            Delivery::Socket
        };
        match self.sessions.login(&request.login, delivery, self.tick) {
            Ok(user) => {
                tracing::info!(%user, login = %request.login, ?delivery, "user logged in");
                Response::json(&EnterDescriptor {
                    user,
                    delivery,
                    socket_port: self.config.server.socket_port,
                    tick_rate: self.config.server.tick_rate,
                })
            }
            Err(error) => {
                tracing::warn!(login = %request.login, %error, "login refused");
                Response::from_server_error(&error)
            }
        }
    }

    fn known_user(&mut self, request: &Request, status: Option<UserStatus>) -> Result<UserId, Response> {
        let user = request.user()?;
        if self.sessions.touch(user, self.tick, status) {
            Ok(user)
        } else {
            Err(Response::from_server_error(&ServerError::UnknownUser(user)))
        }
    }

    fn load(&mut self, request: &Request) -> Response {
        let parent = match request.query.get("pid").map(|pid| pid.parse::<EntityId>()) {
            None => None,
            Some(Ok(pid)) => Some(pid),
            Some(Err(())) => return Response::error(400, "malformed pid"),
        };
        let user = match self.known_user(request, Some(UserStatus::Ready)) {
            Ok(user) => user,
            Err(response) => return response,
        };
        if let Some(parent) = parent {
            if self.registry.descriptor(parent, user).is_none() {
                return Response::from_server_error(&ServerError::UnknownEntity(parent));
            }
        }

        let descriptors: Vec<EntityDescriptor> = self
            .registry
            .children(parent, user)
            .into_iter()
            .filter_map(|id| self.registry.descriptor(id, user))
            .collect();
        Response::binary(to_bytes(&descriptors))
    }

    fn update(&mut self, request: &Request) -> Response {
        match self.known_user(request, None) {
            Ok(user) => Response::binary(to_bytes(&self.sessions.take_pending(user).unwrap_or_default())),
            Err(response) => response,
        }
    }

    fn logout(&mut self, request: &Request) -> Response {
        let user = match request.user() {
            Ok(user) => user,
            Err(response) => return response,
        };
        if self.disconnect(user) {
            Response::ok()
        } else {
            Response::from_server_error(&ServerError::UnknownUser(user))
        }
    }

    fn interact(&mut self, request: &Request) -> Response {
        let user = match self.known_user(request, None) {
            Ok(user) => user,
            Err(response) => return response,
        };
        let message = match self.table.decode(&request.body) {
            Ok(message @ Message::Interaction(_)) => message,
            Ok(_) => return Response::error(400, "not an interaction"),
            Err(error) => {
                self.stats.malformed_messages += 1;
                return Response::from_server_error(&ServerError::Malformed(error));
            }
        };
        match self.handle_message(user, message) {
            Ok(()) => Response::ok(),
            Err(error) => Response::from_server_error(&error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::from_bytes;
    use crate::config::Umi3dConfig;
    use crate::entity::EntityDraft;
    use crate::protocol::{InteractionKind, InteractionRequest, Transaction};
    use std::time::Instant;
    use umi3d_shared::{keys, EntityCategory};

    fn login(server: &mut EnvironmentServer, body: &str) -> EnterDescriptor {
        let response = server.handle_http(&Request::post("/login", body.as_bytes().to_vec()));
        assert_eq!(response.status, 200);
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_query_parsing() {
        let request = Request::get("/load?user=4&pid=node_2&flag");
        assert_eq!(request.path, "/load");
        assert_eq!(request.query["user"], "4");
        assert_eq!(request.query["pid"], "node_2");
        assert_eq!(request.query["flag"], "");
    }

    #[test]
    fn test_media_and_login() {
        let (mut server, _handle) = EnvironmentServer::new(Umi3dConfig::default());
        let media = server.handle_http(&Request::get("/media"));
        let media: MediaDescriptor = serde_json::from_slice(&media.body).unwrap();
        assert_eq!(media.version, PROTOCOL_VERSION);

        let enter = login(&mut server, r#"{"login":"alice","polling":true}"#);
        assert_eq!(enter.delivery, Delivery::Polling);
        assert_eq!(server.sessions().get(enter.user).unwrap().login(), "alice");
    }

    #[test]
    fn test_status_codes() {
        let (mut server, _handle) = EnvironmentServer::new(Umi3dConfig::default());
        assert_eq!(server.handle_http(&Request::post("/login", b"not json".to_vec())).status, 400);
        assert_eq!(server.handle_http(&Request::get("/login")).status, 405);
        assert_eq!(server.handle_http(&Request::get("/nowhere")).status, 404);
        assert_eq!(server.handle_http(&Request::get("/load?user=9")).status, 404);
        assert_eq!(server.handle_http(&Request::get("/load")).status, 400);
        assert_eq!(server.handle_http(&Request::get("/logout?user=9")).status, 404);

        let enter = login(&mut server, r#"{"login":"alice"}"#);
        let load = format!("/load?user={}&pid=object3d_9", enter.user.0);
        assert_eq!(server.handle_http(&Request::get(&load)).status, 404);
        let load = format!("/load?user={}&pid=garbage", enter.user.0);
        assert_eq!(server.handle_http(&Request::get(&load)).status, 400);
    }

    #[test]
    fn test_load_respects_visibility_and_parent() {
        let (mut server, _handle) = EnvironmentServer::new(Umi3dConfig::default());
        let alice = login(&mut server, r#"{"login":"alice"}"#).user;
        let registry = server.registry_mut();
        let scene = registry.register(EntityDraft::new(EntityCategory::Scene));
        let shown = registry.register(EntityDraft::new(EntityCategory::Object3D).with_parent(scene));
        let hidden = registry.register(
            EntityDraft::new(EntityCategory::Object3D)
                .with_parent(scene)
                .with_property(keys::ACTIVE, true),
        );
        registry.set_property_for(hidden, alice, keys::ACTIVE, false);

        let roots = server.handle_http(&Request::get(&format!("/load?user={}", alice.0)));
        let roots: Vec<EntityDescriptor> = from_bytes(&roots.body, "descriptors").unwrap();
        assert_eq!(roots.iter().map(|d| d.id).collect::<Vec<_>>(), vec![scene]);

        let children = server.handle_http(&Request::get(&format!("/load?user={}&pid={scene}", alice.0)));
        let children: Vec<EntityDescriptor> = from_bytes(&children.body, "descriptors").unwrap();
        assert_eq!(children.iter().map(|d| d.id).collect::<Vec<_>>(), vec![shown]);
        assert_eq!(server.sessions().get(alice).unwrap().status(), UserStatus::Ready);
    }

    #[test]
    fn test_polling_user_reads_updates() {
        let (mut server, _handle) = EnvironmentServer::new(Umi3dConfig::default());
        let bob = login(&mut server, r#"{"login":"bob","polling":true}"#).user;
        server.handle_http(&Request::get(&format!("/load?user={}", bob.0)));

        let id = server.registry_mut().register(EntityDraft::new(EntityCategory::Object3D));
        server.flush(Instant::now());

        let update = server.handle_http(&Request::get(&format!("/update?user={}", bob.0)));
        let pending: Vec<Transaction> = from_bytes(&update.body, "transactions").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operations[0].entity(), id);

        let again = server.handle_http(&Request::get(&format!("/update?user={}", bob.0)));
        assert!(from_bytes::<Vec<Transaction>>(&again.body, "transactions").unwrap().is_empty());
    }

    #[test]
    fn test_interact() {
        let (mut server, _handle) = EnvironmentServer::new(Umi3dConfig::default());
        let alice = login(&mut server, r#"{"login":"alice"}"#).user;
        let id = server.registry_mut().register(EntityDraft::new(EntityCategory::Interactable));
        let request = InteractionRequest {
            user: alice,
            entity: id,
            kind: InteractionKind::Trigger,
            payload: vec![1, 2],
        };
        let target = format!("/interact?user={}", alice.0);

        let body = Message::Interaction(request.clone()).to_bytes();
        assert_eq!(server.handle_http(&Request::post(&target, body)).status, 200);
        assert_eq!(server.drain_interactions(), vec![request.clone()]);

        assert_eq!(server.handle_http(&Request::post(&target, vec![3, 0])).status, 400);

        let forged = Message::Interaction(InteractionRequest {
            user: UserId(alice.0 + 100),
            ..request
        });
        assert_eq!(server.handle_http(&Request::post(&target, forged.to_bytes())).status, 400);
    }
}
