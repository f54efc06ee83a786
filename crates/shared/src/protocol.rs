use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NormalizedError;

/// The CRUD operations an entity slice understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    Create,
    GetMany,
    GetOne,
    Delete,
    Update,
    Patch,
}

impl Op {
    pub const ALL: [Op; 6] = [
        Op::Create,
        Op::GetMany,
        Op::GetOne,
        Op::Delete,
        Op::Update,
        Op::Patch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::GetMany => "getMany",
            Op::GetOne => "getOne",
            Op::Delete => "delete",
            Op::Update => "update",
            Op::Patch => "patch",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound push message: `{"type": "truck", "id": "42"}`. The `id` field is
/// optional; its absence means the whole collection changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The resolved outcome of one asynchronous operation. A transport reply is
/// always a settlement, whether it carried data or an error payload;
/// settlements are dispatched either way and the slice decides what to do.
#[derive(Debug, Clone)]
pub enum Settlement {
    Data(Value),
    Error(NormalizedError),
}

impl Settlement {
    pub fn data(&self) -> Option<&Value> {
        match self {
            Settlement::Data(body) => Some(body),
            Settlement::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Settlement::Error(_))
    }
}
