//! Analytical query engine behind the OOH advertising dashboard.
//!
//! Campaign records are normalized once into a canonical in-memory view.
//! Each filter change compiles to parameterized predicates (one main, five
//! exclude-self) and the engine answers with six result shapes in a single
//! bundle. A [`session::Session`] debounces filter changes, tags requests
//! with increasing ids and drops superseded results.

pub mod auth;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod loader;
pub mod manifest;
pub mod normalize;
pub mod output;
pub mod plan;
pub mod reports;
pub mod sequencer;
pub mod session;
pub mod transport;
pub mod types;
pub mod util;
pub mod worker;

pub use auth::{authenticate, Role};
pub use config::Config;
pub use engine::{DatasetView, Engine};
pub use error::{DashboardError, LoadError, QueryError};
pub use filters::{Dimension, FilterSelection};
pub use loader::DataSource;
pub use session::{Session, SessionState};
pub use types::{Count, QueryBundle, Record};
