// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow classification: the exact-match key, its extractor, flow actions and
//! the per-worker flow table.

#![deny(clippy::all, clippy::pedantic)]

pub mod action;
pub mod clock;
pub mod extract;
pub mod key;
pub mod table;

pub use action::{Action, ActionList, MAX_ACTIONS};
pub use clock::CycleClock;
pub use extract::{extract, extract_burst};
pub use key::{FlowKey, FragKind, signature};
pub use table::{FlowEntry, FlowHandle, FlowStats, FlowTable, FlowTableError};
