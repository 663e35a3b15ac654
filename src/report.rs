// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User-facing reporting helpers.
//!
//! Shared handling of platform failures, plus the small amount of formatting
//! the `list` commands need: tables and relative timestamps.

use crate::api::ApiError;

use chrono::{DateTime, Utc};
use chrono_humanize::HumanTime;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Row, Table};
use tracing::error;

/// Tell the user what to do about an authentication or authorization
/// failure.
///
/// Returns `true` if the error was one of the two. Other errors are left for
/// the caller to report.
pub fn warn_unauthenticated(err: &ApiError) -> bool {
    if err.is_unauthorized() {
        error!(
            "Authentication failed. Please refresh by running `village logout` and then `village login`."
        );
        return true;
    }

    if err.is_forbidden() {
        error!(
            "You do not have permission to perform this action. Please contact your workspace administrator."
        );
        return true;
    }

    false
}

/// Terminal table with target header row.
pub fn table(head: impl Into<Row>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED).set_header(head);
    table
}

/// Describe distance between two points in time in words, e.g.,
/// "3 hours ago" or "in 3 days".
pub fn time_since(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    HumanTime::from(then - now).to_string()
}
