pub mod admin_rate_limit;
pub mod audit_recorder;
pub mod client_ip;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
