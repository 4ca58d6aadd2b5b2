//! District device sync: keeps Entra ID groups, Intune records and Active
//! Directory computer objects in line with the helpdesk asset inventory.

pub mod ad;
pub mod audit;
pub mod cmd;
pub mod config;
pub mod error;
pub mod graph;
pub mod helpdesk;
pub mod reconcile;

pub use error::{EduSyncError, Result};
