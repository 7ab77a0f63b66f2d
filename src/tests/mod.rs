//! Consolidated test modules.
//!
//! This module contains end-to-end tests that run the coordinator against a
//! mocked Parcel API.
