use crate::application::engine::NodeEngine;
use crate::domain::account::Principal;
use crate::domain::endpoint::SourceAddress;
use crate::domain::node::{NodeId, NodeView};
use crate::domain::request::{ModifyRequest, NodeRequest};
use crate::domain::vector::CreateRequest;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Boundary response: `{"ok": ...}` or `{"err": "message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response<T> {
    Ok(T),
    Err(String),
}

impl<T> Response<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Response::Ok(value) => Some(value),
            Response::Err(_) => None,
        }
    }

    pub fn err(&self) -> Option<&str> {
        match self {
            Response::Ok(_) => None,
            Response::Err(message) => Some(message),
        }
    }
}

impl<T> From<Result<T>> for Response<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Response::Ok(value),
            Err(e) => Response::Err(e.to_string()),
        }
    }
}

pub type CreateNodeResp = Response<NodeView>;
pub type ModifyNodeResp = Response<NodeView>;

/// Translates caller requests into engine operations. Every error becomes an
/// `err` response; nothing here panics or propagates.
#[derive(Clone)]
pub struct RequestRouter {
    engine: Arc<NodeEngine>,
}

impl RequestRouter {
    pub fn new(engine: Arc<NodeEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<NodeEngine> {
        &self.engine
    }

    pub async fn create_node(
        &self,
        caller: &Principal,
        request: NodeRequest,
        create: CreateRequest,
    ) -> CreateNodeResp {
        respond(
            "create_node",
            self.engine.create_node(caller, request, create).await,
        )
    }

    pub async fn modify_node(
        &self,
        caller: &Principal,
        id: NodeId,
        request: ModifyRequest,
    ) -> ModifyNodeResp {
        respond(
            "modify_node",
            self.engine.modify_node(caller, id, request).await,
        )
    }

    pub async fn get_node(&self, id: NodeId) -> Response<Option<NodeView>> {
        respond("get_node", self.engine.get_node(id).await)
    }

    pub async fn get_node_address(&self, id: NodeId) -> Response<Vec<SourceAddress>> {
        respond("get_node_address", self.engine.get_node_address(id).await)
    }

    pub async fn get_controller_nodes(&self, controller: &Principal) -> Response<Vec<NodeView>> {
        respond(
            "get_controller_nodes",
            self.engine.nodes_by_controller(controller).await,
        )
    }

    pub async fn start(&self) -> Response<()> {
        respond("start", self.engine.start().await)
    }

    pub fn stop(&self) -> Response<()> {
        self.engine.stop();
        Response::Ok(())
    }

    pub async fn stop_node(&self, caller: &Principal, id: NodeId) -> Response<NodeView> {
        respond(
            "stop_node",
            self.engine.set_node_active(caller, id, false).await,
        )
    }

    pub async fn start_node(&self, caller: &Principal, id: NodeId) -> Response<NodeView> {
        respond(
            "start_node",
            self.engine.set_node_active(caller, id, true).await,
        )
    }
}

fn respond<T>(operation: &'static str, result: Result<T>) -> Response<T> {
    if let Err(e) = &result {
        warn!(operation, error = %e, "request failed");
    }
    result.into()
}
