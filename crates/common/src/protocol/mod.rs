// Wire protocol between the client replica and the server gateway.

pub mod push;

pub const API_PUSH_PATH: &str = "/api/push";
pub const API_REPLICA_PATH: &str = "/api/replica";
pub const API_GUEST_AUTH_PATH: &str = "/api/auth/guest";
pub const HEALTH_PATH: &str = "/healthz";
