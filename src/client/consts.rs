pub const URL_VAR: &str = "VOICE_SESSION_URL";
pub const TOKEN_VAR: &str = "VOICE_SESSION_TOKEN";

pub const DEFAULT_URL: &str = "ws://localhost:8000/listen";
pub const DEFAULT_CAPACITY: usize = 64;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
