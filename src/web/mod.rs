//! HTTP surface: the proxy data plane and the admin/audit/auth control plane.

pub mod admin;
pub mod audit;
pub mod auth_routes;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod status;

pub use routes::create_router;
