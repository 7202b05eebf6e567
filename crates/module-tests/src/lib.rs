//! Live Module Test Suite
//!
//! Runs the four lifecycle scenarios (validate, plan, apply, idempotence)
//! against a real module directory with the real provisioning tool. Apply
//! and idempotence create real infrastructure.
//!
//! # Features
//!
//! - `live`: enable the scenario tests (none run without it)
//!
//! # Prerequisites
//!
//! 1. The provisioning tool on `PATH` (or `IAC_TOOL_BINARY`)
//! 2. `IAC_MODULE_DIR` pointing at a module with an `example.tfvars`
//! 3. For `IAC_CLOUD=gcp`: `GOOGLE_PROJECT_ID` and `GOOGLE_ORG_ID`, plus
//!    credentials the provider can find
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 module-tests (no default features)
//! cargo test
//!
//! # Full lifecycle against a GCP module
//! IAC_MODULE_DIR=../modules/cloud_ngfw IAC_CLOUD=gcp \
//!     cargo test -p module-tests --features live
//! ```

pub mod environment;
