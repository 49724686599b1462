//! Request/response messages exchanged during a session
//!
//! Every client request gets exactly one response. Messages travel inside an
//! [`Envelope`] that carries the protocol version and a correlation id the
//! server echoes back.

use serde::{Deserialize, Serialize};

use crate::{Ciphertext, Direction, Path, Record};

/// Current wire protocol version
pub const PROTOCOL_VERSION: u16 = 1;

/// Versioned, correlated wrapper around a request or response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u16,
    pub id: u64,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(id: u64, body: T) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            body,
        }
    }
}

/// Insert a value into the slot the client's walk ended at
///
/// - `parent == None`: the tree must be empty; `value` becomes the root.
/// - `parent == Some(value)`: duplicate; only a new record is stored.
/// - otherwise `value` becomes the `direction` child of `parent`, and `path`
///   must be the path of that empty slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub parent: Option<Ciphertext>,
    pub value: Ciphertext,
    pub direction: Option<Direction>,
    pub path: Path,
}

/// Client-to-server messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    GetRoot,
    MoveLeft(Ciphertext),
    MoveRight(Ciphertext),
    Insert(InsertRequest),
    FindNodePath(Vec<Ciphertext>),
    GetCommonNode(Ciphertext, Ciphertext),
    Query(Ciphertext),
    RangeQuery {
        min: Option<Ciphertext>,
        max: Option<Ciphertext>,
    },
}

impl Request {
    /// Move request for the child of `value` in `direction`
    pub fn step(value: Ciphertext, direction: Direction) -> Self {
        match direction {
            Direction::Left => Request::MoveLeft(value),
            Direction::Right => Request::MoveRight(value),
        }
    }

    /// Stable name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Request::GetRoot => "get_root",
            Request::MoveLeft(_) => "move_left",
            Request::MoveRight(_) => "move_right",
            Request::Insert(_) => "insert",
            Request::FindNodePath(_) => "find_node_path",
            Request::GetCommonNode(..) => "get_common_node",
            Request::Query(_) => "query",
            Request::RangeQuery { .. } => "range_query",
        }
    }
}

/// Structured error reply; the session ends after it is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: String,
    pub message: String,
}

/// Server-to-client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Root(Option<Ciphertext>),
    Child(Option<Ciphertext>),
    Inserted(Option<Ciphertext>),
    NodePaths(Vec<Path>),
    CommonNode { value: Ciphertext, path: Path },
    Records(Vec<Record>),
    Error(ErrorReply),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Root(_) => "root",
            Response::Child(_) => "child",
            Response::Inserted(_) => "inserted",
            Response::NodePaths(_) => "node_paths",
            Response::CommonNode { .. } => "common_node",
            Response::Records(_) => "records",
            Response::Error(_) => "error",
        }
    }
}
