use serde::{Deserialize, Serialize};

use crate::model::{Message, UserId};

/// Client→server send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFrame {
    pub recipient: UserId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub username: String,
}

/// Server→client frames. Untagged: clients tell them apart by which key is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Online {
        online: Vec<OnlineUser>,
    },
    Message(Message),
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}
