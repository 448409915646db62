//! # Core Module
//!
//! Shared-state primitives used by the task manager and the pool director.
//!
//! Both coordinators keep their bookkeeping on the "main side" behind a single
//! [`MtResource`]. Execution contexts never receive a strong handle to that
//! state: they are given an [`MtWeak`] so a dropped coordinator is not kept
//! alive by its own background workers.
//!
//! ## Usage
//! ```ignore
//! use worker_task_engine::core::MtResource;
//!
//! let counter = MtResource::new(0);
//! *counter.get_mut() += 1;
//! assert_eq!(*counter.get(), 1);
//!
//! let weak = counter.downgrade();
//! assert!(weak.upgrade().is_some());
//! ```

pub mod mt_resource;

pub use mt_resource::{MtResource, MtWeak};
