//! Axum HTTP surface (spec §6.1), built on `crewai-rust`'s `app_router` shape.

pub mod routes;

pub use routes::app_router;
