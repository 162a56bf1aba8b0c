//! Cookie-session keys. The login flow that writes them lives upstream of this server.

pub const USER_ID: &str = "user_id";
